//! Transaction and posting repository

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    currency_col, date_col, decimal_col, decimal_to_sql, opt_uuid_col, timestamp_col,
    timestamp_to_sql, uuid_col,
};
use crate::error::{Error, Result};
use crate::models::{Posting, Transaction};
use crate::money::Money;

const COLUMNS: &str =
    "id, date, description, reference, tags_json, notes, import_batch_id, created_at, updated_at";

struct TransactionRow {
    id: Uuid,
    date: NaiveDate,
    description: String,
    reference: Option<String>,
    tags_json: String,
    notes: Option<String>,
    import_batch_id: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn transaction_row(row: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: uuid_col(row, 0)?,
        date: date_col(row, 1)?,
        description: row.get(2)?,
        reference: row.get(3)?,
        tags_json: row.get(4)?,
        notes: row.get(5)?,
        import_batch_id: opt_uuid_col(row, 6)?,
        created_at: timestamp_col(row, 7)?,
        updated_at: timestamp_col(row, 8)?,
    })
}

fn posting_from_row(row: &Row<'_>) -> rusqlite::Result<Posting> {
    Ok(Posting {
        account_id: uuid_col(row, 0)?,
        amount: Money {
            amount: decimal_col(row, 1)?,
            currency: currency_col(row, 2)?,
        },
        notes: row.get(3)?,
    })
}

/// Transaction capability surface on the unit of work.
pub struct TransactionRepo<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionRepo<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Persist a transaction and its postings.
    pub fn add(&self, transaction: &Transaction) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO transactions ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                transaction.id.to_string(),
                transaction.date.to_string(),
                transaction.description,
                transaction.reference,
                serde_json::to_string(&transaction.tags)?,
                transaction.notes,
                transaction.import_batch_id.map(|id| id.to_string()),
                timestamp_to_sql(transaction.created_at),
                timestamp_to_sql(transaction.updated_at),
            ],
        )?;
        self.insert_postings(transaction)?;
        Ok(())
    }

    /// Persist a wholesale posting replacement (and header changes).
    pub fn save(&self, transaction: &Transaction) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE transactions SET date = ?, description = ?, reference = ?, tags_json = ?, \
             notes = ?, updated_at = ? WHERE id = ?",
            params![
                transaction.date.to_string(),
                transaction.description,
                transaction.reference,
                serde_json::to_string(&transaction.tags)?,
                transaction.notes,
                timestamp_to_sql(transaction.updated_at),
                transaction.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::TransactionNotFound(transaction.id));
        }
        self.conn.execute(
            "DELETE FROM postings WHERE transaction_id = ?",
            params![transaction.id.to_string()],
        )?;
        self.insert_postings(transaction)?;
        Ok(())
    }

    fn insert_postings(&self, transaction: &Transaction) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO postings (id, transaction_id, account_id, amount, currency, notes) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for posting in &transaction.postings {
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                transaction.id.to_string(),
                posting.account_id.to_string(),
                decimal_to_sql(posting.amount.amount),
                posting.amount.currency.as_str(),
                posting.notes,
            ])?;
        }
        Ok(())
    }

    fn load_postings(&self, transaction_id: Uuid) -> Result<Vec<Posting>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id, amount, currency, notes FROM postings \
             WHERE transaction_id = ? ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![transaction_id.to_string()], posting_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn hydrate(&self, row: TransactionRow) -> Result<Transaction> {
        let postings = self.load_postings(row.id)?;
        Ok(Transaction {
            id: row.id,
            date: row.date,
            description: row.description,
            postings,
            tags: serde_json::from_str(&row.tags_json)?,
            reference: row.reference,
            notes: row.notes,
            import_batch_id: row.import_batch_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Transaction> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM transactions WHERE id = ?"),
                params![id.to_string()],
                transaction_row,
            )
            .optional()?
            .ok_or(Error::TransactionNotFound(id))?;
        self.hydrate(row)
    }

    /// Transactions with `from <= date <= to`, ordered by (date, id).
    pub fn find_by_date_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE date >= ? AND date <= ? ORDER BY date, id"
        ))?;
        let rows = stmt.query_map(
            params![from.to_string(), to.to_string()],
            transaction_row,
        )?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    /// Transactions with `date <= at`, ordered by (date, id).
    pub fn find_up_to(&self, at: NaiveDate) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE date <= ? ORDER BY date, id"
        ))?;
        let rows = stmt.query_map(params![at.to_string()], transaction_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    pub fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE import_batch_id = ? ORDER BY date, id"
        ))?;
        let rows = stmt.query_map(params![batch_id.to_string()], transaction_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    /// All transactions, ordered by (date, id). Used by the exporter.
    pub fn list_all(&self) -> Result<Vec<Transaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM transactions ORDER BY date, id"))?;
        let rows = stmt.query_map([], transaction_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }
}
