//! Posting engine: convert matched statement entries into transactions
//!
//! Each posted entry becomes a balanced two-leg transaction in the entry's
//! currency: the source account receives the statement-signed amount (money
//! into the account is positive) and the suggested account receives the
//! negation. A salary credit of +5000 therefore debits the bank account and
//! credits the income account.

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::models::{EntryStatus, Posting, StatementEntry, Transaction};
use crate::money::{Currency, Money};

/// A successfully posted entry, for display by the caller.
#[derive(Debug, Clone)]
pub struct PostedEntry {
    pub entry_id: Uuid,
    pub external_id: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub transaction_id: Uuid,
    pub source_account: String,
    pub target_account: String,
}

/// Aggregate result of a posting run.
#[derive(Debug, Clone, Default)]
pub struct PostOutcome {
    pub total_entries: usize,
    pub posted_count: usize,
    pub skipped_count: usize,
    pub posted: Vec<PostedEntry>,
    pub errors: Vec<(Uuid, String)>,
}

/// Converts MATCHED statement entries into balanced transactions.
pub struct PostingEngine<'a> {
    db: &'a Database,
    bus: &'a EventBus,
}

impl<'a> PostingEngine<'a> {
    pub fn new(db: &'a Database, bus: &'a EventBus) -> Self {
        Self { db, bus }
    }

    /// Post pending entries against a source account.
    ///
    /// With `auto_post` only MATCHED entries are considered; without it,
    /// IMPORTED entries are selected as well (they lack a suggestion and are
    /// counted as skipped). Per-entry failures are collected in `errors` and
    /// never abort the run; `dry_run` previews without writing.
    pub fn post_pending(
        &self,
        batch_id: Option<Uuid>,
        source_account_code: &str,
        auto_post: bool,
        dry_run: bool,
    ) -> Result<PostOutcome> {
        let uow = self.db.unit_of_work()?;

        let source = uow
            .accounts()
            .find_by_code(source_account_code)?
            .ok_or_else(|| Error::AccountNotFound(source_account_code.to_string()))?;

        let mut entries = self.select_entries(&uow, batch_id, EntryStatus::Matched)?;
        if !auto_post {
            entries.extend(self.select_entries(&uow, batch_id, EntryStatus::Imported)?);
        }

        let mut outcome = PostOutcome {
            total_entries: entries.len(),
            ..Default::default()
        };
        let mut events = Vec::new();

        for mut entry in entries {
            let Some(target_id) = entry.suggested_account_id else {
                outcome.skipped_count += 1;
                continue;
            };

            match self.post_one(&uow, &mut entry, source.id, target_id) {
                Ok(posted) => {
                    events.push(DomainEvent::StatementPosted {
                        entry_id: posted.entry_id,
                        batch_id: entry.batch_id,
                        transaction_id: posted.transaction_id,
                        account_id: target_id,
                        amount: posted.amount,
                        currency: posted.currency.to_string(),
                    });
                    outcome.posted_count += 1;
                    outcome.posted.push(PostedEntry {
                        source_account: source.code.clone(),
                        ..posted
                    });
                }
                Err(err) => {
                    outcome.errors.push((entry.id, err.to_string()));
                }
            }
        }

        if dry_run {
            uow.rollback()?;
        } else {
            uow.commit()?;
            for event in &events {
                self.bus.publish(event);
            }
            info!(
                "Posted {}/{} entries ({} skipped, {} errors)",
                outcome.posted_count,
                outcome.total_entries,
                outcome.skipped_count,
                outcome.errors.len()
            );
        }

        Ok(outcome)
    }

    fn select_entries(
        &self,
        uow: &crate::db::UnitOfWork,
        batch_id: Option<Uuid>,
        status: EntryStatus,
    ) -> Result<Vec<StatementEntry>> {
        match batch_id {
            Some(batch_id) => uow.entries().find_by_batch_and_status(batch_id, status),
            None => uow.entries().find_by_status(status),
        }
    }

    fn post_one(
        &self,
        uow: &crate::db::UnitOfWork,
        entry: &mut StatementEntry,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<PostedEntry> {
        let target = uow.accounts().get(target_id)?;

        let currency = entry.currency.clone();
        let postings = vec![
            Posting::new(target_id, Money::new(-entry.amount, currency.clone()), None)?,
            Posting::new(source_id, Money::new(entry.amount, currency.clone()), None)?,
        ];

        let description = if entry.memo.is_empty() {
            entry.payee.clone().unwrap_or_default()
        } else {
            entry.memo.clone()
        };
        let tags = vec!["imported".to_string(), format!("batch:{}", entry.batch_id)];

        let transaction = Transaction::create(
            entry.occurred_at.date_naive(),
            &description,
            postings,
            tags,
            None,
            Some(entry.batch_id),
        )?;
        uow.transactions().add(&transaction)?;

        entry.mark_posted(transaction.id)?;
        uow.entries().save(entry)?;

        Ok(PostedEntry {
            entry_id: entry.id,
            external_id: entry.external_id.clone(),
            description,
            amount: entry.amount,
            currency,
            transaction_id: transaction.id,
            source_account: String::new(),
            target_account: target.code,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::db::Database;
    use crate::models::{AccountType, ImportBatch, ImportSource, Metadata};

    fn brl() -> Currency {
        Currency::new("BRL").unwrap()
    }

    struct Fixture {
        db: Database,
        batch_id: Uuid,
        salary_id: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();

        let accounts = uow.accounts();
        accounts.seed_default_chart(&brl()).unwrap();
        accounts
            .create("Assets:Bank", "Bank", AccountType::Asset, brl())
            .unwrap();
        accounts
            .create("Assets:Bank:Checking", "Checking", AccountType::Asset, brl())
            .unwrap();
        let salary = accounts
            .create("Income:Salary", "Salary", AccountType::Income, brl())
            .unwrap();

        let batch = ImportBatch::new(
            ImportSource::NubankCsv,
            "aug.csv",
            &"ab".repeat(32),
            Metadata::new(),
        );
        uow.batches().add(&batch).unwrap();
        uow.commit().unwrap();

        Fixture {
            db,
            batch_id: batch.id,
            salary_id: salary.id,
        }
    }

    fn matched_entry(fx: &Fixture, external_id: &str, amount: Decimal) -> Uuid {
        let uow = fx.db.unit_of_work().unwrap();
        let mut entry = crate::models::StatementEntry::new(
            fx.batch_id,
            external_id,
            None,
            "Salario Empresa",
            amount,
            brl(),
            Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap(),
            Metadata::new(),
        );
        entry.suggest_account(fx.salary_id).unwrap();
        uow.entries().add(&entry).unwrap();
        uow.commit().unwrap();
        entry.id
    }

    #[test]
    fn test_post_builds_source_counterweight() {
        let fx = fixture();
        let entry_id = matched_entry(&fx, "row:1", dec!(5000));

        let bus = EventBus::new();
        let engine = PostingEngine::new(&fx.db, &bus);
        let outcome = engine
            .post_pending(Some(fx.batch_id), "Assets:Bank:Checking", true, false)
            .unwrap();

        assert_eq!(outcome.posted_count, 1);
        assert!(outcome.errors.is_empty());

        let uow = fx.db.reader().unwrap();
        let entry = uow.entries().get(entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Posted);
        let txn = uow.transactions().get(entry.transaction_id.unwrap()).unwrap();

        // income credited, bank debited
        assert_eq!(txn.postings.len(), 2);
        assert_eq!(txn.postings[0].amount.amount, dec!(-5000.0000));
        assert_eq!(txn.postings[1].amount.amount, dec!(5000.0000));
        assert!(txn.is_balanced());
        assert_eq!(txn.date.to_string(), "2025-08-01");
        assert_eq!(txn.import_batch_id, Some(fx.batch_id));
        assert!(txn.tags.contains(&"imported".to_string()));
        assert!(txn.tags.contains(&format!("batch:{}", fx.batch_id)));
    }

    #[test]
    fn test_missing_source_account_fails() {
        let fx = fixture();
        let bus = EventBus::new();
        let engine = PostingEngine::new(&fx.db, &bus);
        let result = engine.post_pending(None, "Assets:Nope", true, false);
        assert!(matches!(result, Err(Error::AccountNotFound(_))));
    }

    #[test]
    fn test_entries_without_suggestion_are_skipped() {
        let fx = fixture();
        let uow = fx.db.unit_of_work().unwrap();
        let entry = crate::models::StatementEntry::new(
            fx.batch_id,
            "row:9",
            None,
            "UNMATCHED",
            dec!(-10),
            brl(),
            Utc::now(),
            Metadata::new(),
        );
        uow.entries().add(&entry).unwrap();
        uow.commit().unwrap();

        let bus = EventBus::new();
        let engine = PostingEngine::new(&fx.db, &bus);
        // auto_post = false also selects IMPORTED entries
        let outcome = engine
            .post_pending(Some(fx.batch_id), "Assets:Bank:Checking", false, false)
            .unwrap();
        assert_eq!(outcome.total_entries, 1);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.posted_count, 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = fixture();
        let entry_id = matched_entry(&fx, "row:1", dec!(5000));

        let bus = EventBus::new();
        let engine = PostingEngine::new(&fx.db, &bus);
        let outcome = engine
            .post_pending(Some(fx.batch_id), "Assets:Bank:Checking", true, true)
            .unwrap();
        assert_eq!(outcome.posted_count, 1);

        let uow = fx.db.reader().unwrap();
        let entry = uow.entries().get(entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Matched);
        assert!(entry.transaction_id.is_none());
        assert!(uow.transactions().list_all().unwrap().is_empty());
    }

    #[test]
    fn test_zero_amount_entry_is_recorded_as_error() {
        let fx = fixture();
        let uow = fx.db.unit_of_work().unwrap();
        let mut entry = crate::models::StatementEntry::new(
            fx.batch_id,
            "row:0",
            None,
            "Salario Empresa",
            dec!(0),
            brl(),
            Utc::now(),
            Metadata::new(),
        );
        entry.suggest_account(fx.salary_id).unwrap();
        uow.entries().add(&entry).unwrap();
        uow.commit().unwrap();

        let bus = EventBus::new();
        let engine = PostingEngine::new(&fx.db, &bus);
        let outcome = engine
            .post_pending(Some(fx.batch_id), "Assets:Bank:Checking", true, false)
            .unwrap();
        assert_eq!(outcome.posted_count, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, entry.id);
    }
}
