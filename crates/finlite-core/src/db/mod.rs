//! Persistence layer: connection pooling, schema, and the unit of work
//!
//! This module is organized by aggregate:
//! - `accounts` - Chart of accounts repository
//! - `transactions` - Transaction + posting repository
//! - `batches` - Import batch repository
//! - `entries` - Statement entry repository
//! - `cards` - Card statement repository
//!
//! All writes go through a [`UnitOfWork`]: one pooled connection holding an
//! open SQLite transaction. Committing consumes the unit of work; dropping
//! it without committing rolls every staged write back.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::money::Currency;

mod accounts;
mod batches;
mod cards;
mod entries;
mod transactions;

pub use accounts::AccountRepo;
pub use batches::BatchRepo;
pub use cards::CardStatementRepo;
pub use entries::EntryRepo;
pub use transactions::TransactionRepo;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Database wrapper with connection pooling.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open (creating if needed) the database at the settings' path.
    pub fn open(settings: &Settings) -> Result<Self> {
        settings.ensure_data_dir()?;
        let path = settings.database_path();
        Self::open_path(path.to_string_lossy().as_ref())
    }

    /// Open a database at an explicit path.
    pub fn open_path(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            // Foreign keys are per-connection in SQLite; WAL is sticky but
            // harmless to re-issue.
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;\n\
                 PRAGMA journal_mode = WAL;\n\
                 PRAGMA synchronous = NORMAL;",
            )
        });

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Create a throwaway database for tests.
    ///
    /// Uses a unique file under the system temp dir rather than `:memory:`
    /// so every pooled connection sees the same database.
    pub fn for_tests() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "finlite_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);
        Self::open_path(path.to_string_lossy().as_ref())
    }

    /// Path to the database file.
    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Begin a writing unit of work (`BEGIN IMMEDIATE`).
    ///
    /// The engine targets a single writer; a second concurrent writer
    /// surfaces as [`Error::StorageConflict`].
    pub fn unit_of_work(&self) -> Result<UnitOfWork> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE;")
            .map_err(map_storage_err)?;
        Ok(UnitOfWork {
            conn,
            finished: false,
        })
    }

    /// Begin a read-only unit of work (`BEGIN DEFERRED`).
    ///
    /// Readers run in parallel with the writer under WAL.
    pub fn reader(&self) -> Result<UnitOfWork> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN DEFERRED;")
            .map_err(map_storage_err)?;
        Ok(UnitOfWork {
            conn,
            finished: false,
        })
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Chart of accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                currency TEXT NOT NULL,
                parent_id TEXT REFERENCES accounts(id),
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_type ON accounts(type);
            CREATE INDEX IF NOT EXISTS idx_accounts_parent ON accounts(parent_id);

            -- Import batches (one per statement file, addressed by sha256)
            CREATE TABLE IF NOT EXISTS import_batches (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_sha256 TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                transaction_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(source, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_import_batches_sha256 ON import_batches(file_sha256);
            CREATE INDEX IF NOT EXISTS idx_import_batches_status ON import_batches(status);
            -- Hash-based idempotency: one live batch per file content
            CREATE UNIQUE INDEX IF NOT EXISTS idx_import_batches_sha256_active
                ON import_batches(file_sha256) WHERE status <> 'reversed';

            -- Balanced transactions
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                description TEXT NOT NULL,
                reference TEXT,
                tags_json TEXT NOT NULL DEFAULT '[]',
                notes TEXT,
                import_batch_id TEXT REFERENCES import_batches(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_batch ON transactions(import_batch_id);

            -- Transaction legs; an account referenced here cannot be deleted
            CREATE TABLE IF NOT EXISTS postings (
                id TEXT PRIMARY KEY,
                transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
                amount TEXT NOT NULL CHECK (amount NOT IN ('0', '0.0000')),
                currency TEXT NOT NULL,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_postings_transaction ON postings(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_postings_account ON postings(account_id);

            -- Parsed statement rows awaiting classification and posting
            CREATE TABLE IF NOT EXISTS statement_entries (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL,
                payee TEXT,
                memo TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'imported',
                suggested_account_id TEXT REFERENCES accounts(id),
                transaction_id TEXT REFERENCES transactions(id),
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(batch_id, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_statement_entries_status ON statement_entries(status);
            CREATE INDEX IF NOT EXISTS idx_statement_entries_occurred_at ON statement_entries(occurred_at);
            CREATE INDEX IF NOT EXISTS idx_statement_entries_transaction ON statement_entries(transaction_id);

            -- Credit card statement summaries
            CREATE TABLE IF NOT EXISTS card_statements (
                id TEXT PRIMARY KEY,
                card_account_id TEXT NOT NULL REFERENCES accounts(id),
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                closing_day INTEGER NOT NULL,
                due_date TEXT NOT NULL,
                currency TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                items_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_card_statements_account ON card_statements(card_account_id);
            CREATE INDEX IF NOT EXISTS idx_card_statements_status ON card_statements(status);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

/// A scoped storage transaction exposing per-aggregate repositories.
///
/// Writes staged through the repositories become visible to reads on the
/// same unit of work immediately (read-your-writes) and to other units of
/// work only after [`UnitOfWork::commit`] returns. Dropping without commit
/// rolls back.
pub struct UnitOfWork {
    conn: DbConn,
    finished: bool,
}

impl UnitOfWork {
    /// Commit all staged writes, consuming the unit of work.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT;").map_err(map_storage_err)?;
        self.finished = true;
        Ok(())
    }

    /// Explicitly discard all staged writes.
    pub fn rollback(mut self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK;")
            .map_err(map_storage_err)?;
        self.finished = true;
        Ok(())
    }

    pub fn accounts(&self) -> AccountRepo<'_> {
        AccountRepo::new(&self.conn)
    }

    pub fn transactions(&self) -> TransactionRepo<'_> {
        TransactionRepo::new(&self.conn)
    }

    pub fn batches(&self) -> BatchRepo<'_> {
        BatchRepo::new(&self.conn)
    }

    pub fn entries(&self) -> EntryRepo<'_> {
        EntryRepo::new(&self.conn)
    }

    pub fn card_statements(&self) -> CardStatementRepo<'_> {
        CardStatementRepo::new(&self.conn)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK;");
        }
    }
}

/// Map SQLite busy/locked conditions to the storage-conflict error kind.
pub(crate) fn map_storage_err(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(code, ref message) = err {
        use rusqlite::ErrorCode;
        if matches!(code.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return Error::StorageConflict(
                message.clone().unwrap_or_else(|| "database busy".to_string()),
            );
        }
    }
    Error::Database(err)
}

// --- column conversion helpers -------------------------------------------
//
// Entities are stored with textual ids, decimals, and RFC 3339 timestamps.
// These helpers convert on read, reporting malformed cells as conversion
// failures on the originating column.

fn conversion_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Uuid::parse_str(&t).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn currency_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Currency> {
    let text: String = row.get(idx)?;
    Currency::new(&text).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn opt_timestamp_col(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

pub(crate) fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

/// Render a decimal for storage at the money scale.
pub(crate) fn decimal_to_sql(amount: Decimal) -> String {
    format!("{amount:.4}")
}

pub(crate) fn timestamp_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_runs_migrations() {
        let db = Database::for_tests().unwrap();
        let uow = db.reader().unwrap();
        let count: i64 = uow
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('accounts', 'transactions', 'postings', 'import_batches', 'statement_entries', 'card_statements')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_rollback_on_drop() {
        let db = Database::for_tests().unwrap();

        {
            let uow = db.unit_of_work().unwrap();
            uow.connection()
                .execute(
                    "INSERT INTO import_batches (id, source, external_id, filename, file_sha256, started_at, created_at, updated_at) \
                     VALUES ('x', 'ofx', 'f', 'f', 'h', 't', 't', 't')",
                    [],
                )
                .unwrap();
            // dropped without commit
        }

        let uow = db.reader().unwrap();
        let count: i64 = uow
            .connection()
            .query_row("SELECT COUNT(*) FROM import_batches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_read_your_writes_before_commit() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        uow.connection()
            .execute(
                "INSERT INTO import_batches (id, source, external_id, filename, file_sha256, started_at, created_at, updated_at) \
                 VALUES ('x', 'ofx', 'f', 'f', 'h', 't', 't', 't')",
                [],
            )
            .unwrap();

        let count: i64 = uow
            .connection()
            .query_row("SELECT COUNT(*) FROM import_batches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        uow.rollback().unwrap();
    }

    #[test]
    fn test_commit_is_visible_to_later_readers() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        uow.connection()
            .execute(
                "INSERT INTO import_batches (id, source, external_id, filename, file_sha256, started_at, created_at, updated_at) \
                 VALUES ('x', 'ofx', 'f', 'f', 'h', 't', 't', 't')",
                [],
            )
            .unwrap();
        uow.commit().unwrap();

        let reader = db.reader().unwrap();
        let count: i64 = reader
            .connection()
            .query_row("SELECT COUNT(*) FROM import_batches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
