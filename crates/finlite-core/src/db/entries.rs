//! Statement entry repository

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    currency_col, decimal_col, decimal_to_sql, opt_uuid_col, timestamp_col, timestamp_to_sql,
    uuid_col,
};
use crate::error::{Error, Result};
use crate::models::{EntryStatus, Metadata, StatementEntry};

const COLUMNS: &str = "id, batch_id, external_id, payee, memo, amount, currency, occurred_at, \
                       status, suggested_account_id, transaction_id, metadata_json, created_at, updated_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<StatementEntry> {
    let status_text: String = row.get(8)?;
    let status: EntryStatus = status_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown entry status: {status_text}").into(),
        )
    })?;
    let metadata_json: String = row.get(11)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StatementEntry {
        id: uuid_col(row, 0)?,
        batch_id: uuid_col(row, 1)?,
        external_id: row.get(2)?,
        payee: row.get(3)?,
        memo: row.get(4)?,
        amount: decimal_col(row, 5)?,
        currency: currency_col(row, 6)?,
        occurred_at: timestamp_col(row, 7)?,
        status,
        suggested_account_id: opt_uuid_col(row, 9)?,
        transaction_id: opt_uuid_col(row, 10)?,
        metadata,
        created_at: timestamp_col(row, 12)?,
        updated_at: timestamp_col(row, 13)?,
    })
}

/// Statement entry capability surface on the unit of work.
pub struct EntryRepo<'a> {
    conn: &'a Connection,
}

impl<'a> EntryRepo<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn add(&self, entry: &StatementEntry) -> Result<()> {
        let duplicate: Option<String> = self
            .conn
            .query_row(
                "SELECT external_id FROM statement_entries WHERE batch_id = ? AND external_id = ?",
                params![entry.batch_id.to_string(), entry.external_id],
                |row| row.get(0),
            )
            .optional()?;
        if duplicate.is_some() {
            return Err(Error::DuplicateStatementEntry(entry.external_id.clone()));
        }

        self.conn.execute(
            &format!(
                "INSERT INTO statement_entries ({COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                entry.id.to_string(),
                entry.batch_id.to_string(),
                entry.external_id,
                entry.payee,
                entry.memo,
                decimal_to_sql(entry.amount),
                entry.currency.as_str(),
                timestamp_to_sql(entry.occurred_at),
                entry.status.as_str(),
                entry.suggested_account_id.map(|id| id.to_string()),
                entry.transaction_id.map(|id| id.to_string()),
                serde_json::to_string(&entry.metadata)?,
                timestamp_to_sql(entry.created_at),
                timestamp_to_sql(entry.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Persist status/suggestion/transaction changes made on the domain object.
    pub fn save(&self, entry: &StatementEntry) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE statement_entries SET status = ?, suggested_account_id = ?, transaction_id = ?, \
             metadata_json = ?, updated_at = ? WHERE id = ?",
            params![
                entry.status.as_str(),
                entry.suggested_account_id.map(|id| id.to_string()),
                entry.transaction_id.map(|id| id.to_string()),
                serde_json::to_string(&entry.metadata)?,
                timestamp_to_sql(entry.updated_at),
                entry.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::StatementEntryNotFound(entry.id));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<StatementEntry> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM statement_entries WHERE id = ?"),
                params![id.to_string()],
                entry_from_row,
            )
            .optional()?
            .ok_or(Error::StatementEntryNotFound(id))
    }

    pub fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<StatementEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM statement_entries WHERE batch_id = ? ORDER BY occurred_at, external_id"
        ))?;
        let rows = stmt.query_map(params![batch_id.to_string()], entry_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_status(&self, status: EntryStatus) -> Result<Vec<StatementEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM statement_entries WHERE status = ? ORDER BY occurred_at, external_id"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], entry_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_batch_and_status(
        &self,
        batch_id: Uuid,
        status: EntryStatus,
    ) -> Result<Vec<StatementEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM statement_entries WHERE batch_id = ? AND status = ? \
             ORDER BY occurred_at, external_id"
        ))?;
        let rows = stmt.query_map(
            params![batch_id.to_string(), status.as_str()],
            entry_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_by_batch(&self, batch_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM statement_entries WHERE batch_id = ?",
            params![batch_id.to_string()],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::db::Database;
    use crate::error::Error;
    use crate::models::{EntryStatus, ImportBatch, ImportSource, Metadata, StatementEntry};
    use crate::money::Currency;

    fn seeded_batch(uow: &crate::db::UnitOfWork) -> Uuid {
        let batch = ImportBatch::new(
            ImportSource::NubankCsv,
            "aug.csv",
            &"aa".repeat(32),
            Metadata::new(),
        );
        uow.batches().add(&batch).unwrap();
        batch.id
    }

    fn entry(batch_id: Uuid, external_id: &str) -> StatementEntry {
        StatementEntry::new(
            batch_id,
            external_id,
            None,
            "UBER TRIP",
            dec!(-45.10),
            Currency::new("BRL").unwrap(),
            Utc::now(),
            Metadata::new(),
        )
    }

    #[test]
    fn test_round_trip() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let batch_id = seeded_batch(&uow);

        let e = entry(batch_id, "row:1");
        uow.entries().add(&e).unwrap();

        let loaded = uow.entries().get(e.id).unwrap();
        assert_eq!(loaded.memo, "UBER TRIP");
        assert_eq!(loaded.amount, dec!(-45.1000));
        assert_eq!(loaded.status, EntryStatus::Imported);
    }

    #[test]
    fn test_duplicate_external_id_within_batch_rejected() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let batch_id = seeded_batch(&uow);

        uow.entries().add(&entry(batch_id, "row:1")).unwrap();
        let result = uow.entries().add(&entry(batch_id, "row:1"));
        assert!(matches!(result, Err(Error::DuplicateStatementEntry(_))));
    }

    #[test]
    fn test_status_queries_track_saves() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let batch_id = seeded_batch(&uow);

        let mut e = entry(batch_id, "row:1");
        uow.entries().add(&e).unwrap();
        assert_eq!(
            uow.entries()
                .find_by_batch_and_status(batch_id, EntryStatus::Imported)
                .unwrap()
                .len(),
            1
        );

        e.suggest_account(Uuid::new_v4()).unwrap();
        // suggested account does not exist as a row; clear it so the FK holds
        e.suggested_account_id = None;
        uow.entries().save(&e).unwrap();

        assert_eq!(
            uow.entries()
                .find_by_status(EntryStatus::Matched)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            uow.entries()
                .find_by_batch_and_status(batch_id, EntryStatus::Imported)
                .unwrap()
                .len(),
            0
        );
    }
}
