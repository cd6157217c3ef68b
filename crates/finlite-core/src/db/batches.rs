//! Import batch repository

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{opt_timestamp_col, timestamp_col, timestamp_to_sql, uuid_col};
use crate::error::{Error, Result};
use crate::models::{BatchStatus, ImportBatch, ImportSource, Metadata};

const COLUMNS: &str = "id, source, external_id, filename, file_sha256, status, transaction_count, \
                       error_message, metadata_json, started_at, completed_at, created_at, updated_at";

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    let source_text: String = row.get(1)?;
    let status_text: String = row.get(5)?;
    let metadata_json: String = row.get(8)?;

    let source: ImportSource = source_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown import source: {source_text}").into(),
        )
    })?;
    let status: BatchStatus = status_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown batch status: {status_text}").into(),
        )
    })?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ImportBatch {
        id: uuid_col(row, 0)?,
        source,
        external_id: row.get(2)?,
        filename: row.get(3)?,
        file_sha256: row.get(4)?,
        status,
        transaction_count: row.get(6)?,
        error_message: row.get(7)?,
        metadata,
        started_at: timestamp_col(row, 9)?,
        completed_at: opt_timestamp_col(row, 10)?,
        created_at: timestamp_col(row, 11)?,
        updated_at: timestamp_col(row, 12)?,
    })
}

/// Import batch capability surface on the unit of work.
pub struct BatchRepo<'a> {
    conn: &'a Connection,
}

impl<'a> BatchRepo<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn add(&self, batch: &ImportBatch) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO import_batches ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                batch.id.to_string(),
                batch.source.as_str(),
                batch.external_id,
                batch.filename,
                batch.file_sha256,
                batch.status.as_str(),
                batch.transaction_count,
                batch.error_message,
                serde_json::to_string(&batch.metadata)?,
                timestamp_to_sql(batch.started_at),
                batch.completed_at.map(timestamp_to_sql),
                timestamp_to_sql(batch.created_at),
                timestamp_to_sql(batch.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Persist status/count/error changes made on the domain object.
    pub fn save(&self, batch: &ImportBatch) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE import_batches SET status = ?, transaction_count = ?, error_message = ?, \
             metadata_json = ?, completed_at = ?, updated_at = ? WHERE id = ?",
            params![
                batch.status.as_str(),
                batch.transaction_count,
                batch.error_message,
                serde_json::to_string(&batch.metadata)?,
                batch.completed_at.map(timestamp_to_sql),
                timestamp_to_sql(batch.updated_at),
                batch.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::ImportBatchNotFound(batch.id));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<ImportBatch> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM import_batches WHERE id = ?"),
                params![id.to_string()],
                batch_from_row,
            )
            .optional()?
            .ok_or(Error::ImportBatchNotFound(id))
    }

    /// The non-reversed batch holding this content hash, if any.
    ///
    /// This is the lookup behind hash-based import idempotency; reversed
    /// batches release their hash slot.
    pub fn find_by_sha256_active(&self, file_sha256: &str) -> Result<Option<ImportBatch>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM import_batches \
                     WHERE file_sha256 = ? AND status <> 'reversed' LIMIT 1"
                ),
                params![file_sha256],
                batch_from_row,
            )
            .optional()?)
    }

    pub fn list_recent(&self, limit: i64) -> Result<Vec<ImportBatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM import_batches ORDER BY started_at DESC, id LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![limit], batch_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
