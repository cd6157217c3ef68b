//! Finlite Core Library
//!
//! The double-entry bookkeeping kernel for the finlite personal finance
//! tool:
//! - Fixed-scale money arithmetic with currency tagging
//! - Hierarchical chart of accounts
//! - Balanced transaction aggregate (postings sum to zero)
//! - Statement ingestion (Nubank CSV, OFX) with content-addressed batches
//! - Rule-based entry classification
//! - Posting engine converting classified entries into transactions
//! - Balance sheet and cashflow reports, Beancount export
//! - Unit-of-work persistence over SQLite
//! - In-process domain event bus

pub mod cards;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod ingest;
pub mod models;
pub mod money;
pub mod posting;
pub mod reports;
pub mod rules;

pub use cards::{pay_card, PayCardOutcome};
pub use config::Settings;
pub use db::{Database, UnitOfWork};
pub use error::{Error, Result};
pub use events::{DomainEvent, EventBus};
pub use export::export_beancount;
pub use ingest::{
    file_sha256, parse_nubank_csv, parse_ofx, parse_statement, ImportOutcome, ParsedEntry,
    StatementImporter,
};
pub use models::{
    Account, AccountType, BatchStatus, CardStatement, CardStatementItem, CardStatementStatus,
    EntryStatus, ImportBatch, ImportSource, Metadata, Posting, StatementEntry, Transaction,
};
pub use money::{parse_amount, Currency, Money};
pub use posting::{PostOutcome, PostedEntry, PostingEngine};
pub use reports::{balance_sheet, cashflow, BalanceSheetReport, CashflowReport, CategoryTotal};
pub use rules::{
    add_rule, find_matching_rule, load_rules, match_account, save_rules, ApplyOutcome, Confidence,
    Rule, RuleApplication, RuleEngine, RuleType,
};
