//! Domain models for finlite
//!
//! Entities and value objects of the ledger kernel: the chart of accounts,
//! the double-entry transaction aggregate, and the statement ingestion
//! aggregates (import batches, statement entries, card statements).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::money::{quantize, Currency, Money};

/// The five fundamental account types of double-entry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
            Self::Equity => "EQUITY",
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }

    /// True when a debit (positive posting) increases the balance.
    ///
    /// ASSET and EXPENSE accounts have debit nature; LIABILITY, EQUITY and
    /// INCOME accounts have credit nature.
    pub fn is_debit_positive(&self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }

    /// Accounts that appear on the balance sheet (position at a point in time).
    pub fn is_balance_sheet_account(&self) -> bool {
        matches!(self, Self::Asset | Self::Liability | Self::Equity)
    }

    /// Accounts that appear on the income statement (flow over a period).
    pub fn is_income_statement_account(&self) -> bool {
        matches!(self, Self::Income | Self::Expense)
    }

    /// +1 for debit-nature accounts, -1 for credit-nature accounts.
    pub fn sign_multiplier(&self) -> i32 {
        if self.is_debit_positive() {
            1
        } else {
            -1
        }
    }

    /// The account type implied by the root segment of a `:`-joined code.
    pub fn for_code_root(root: &str) -> Option<Self> {
        match root {
            "Assets" => Some(Self::Asset),
            "Liabilities" => Some(Self::Liability),
            "Equity" => Some(Self::Equity),
            "Income" => Some(Self::Income),
            "Expenses" => Some(Self::Expense),
            _ => None,
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ASSET" => Ok(Self::Asset),
            "LIABILITY" => Ok(Self::Liability),
            "EQUITY" => Ok(Self::Equity),
            "INCOME" => Ok(Self::Income),
            "EXPENSE" => Ok(Self::Expense),
            _ => Err(Error::InvalidAccountType(s.to_string())),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An account in the chart of accounts.
///
/// Accounts are addressed by a hierarchical `:`-joined code such as
/// `Assets:Bank:Checking`. The `parent_id` is a denormalization of the code
/// path, kept consistent at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Factory for a new account.
    ///
    /// Validates that the root segment of the code agrees with the account
    /// type family (`Assets:` codes are ASSET accounts, and so on).
    pub fn new(
        code: &str,
        name: &str,
        account_type: AccountType,
        currency: Currency,
        parent_id: Option<Uuid>,
    ) -> Result<Self> {
        let root = code.split(':').next().unwrap_or_default();
        match AccountType::for_code_root(root) {
            Some(family) if family == account_type => {}
            Some(family) => {
                return Err(Error::InvalidAccountType(format!(
                    "code {code} belongs to the {family} family, not {account_type}"
                )))
            }
            None => {
                return Err(Error::InvalidAccountType(format!(
                    "code {code} does not start with a known root segment"
                )))
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            currency,
            parent_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// The parent code implied by this account's code, if any.
    pub fn parent_code(&self) -> Option<&str> {
        self.code.rsplit_once(':').map(|(parent, _)| parent)
    }

    pub fn rename(&mut self, new_name: &str) {
        self.name = new_name.to_string();
        self.updated_at = Utc::now();
    }

    pub fn archive(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn reactivate(&mut self) {
        self.is_active = true;
        self.updated_at = Utc::now();
    }
}

/// One leg of a double-entry transaction.
///
/// Positive amounts are debits, negative amounts are credits. A posting can
/// never carry a zero amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account_id: Uuid,
    pub amount: Money,
    pub notes: Option<String>,
}

impl Posting {
    pub fn new(account_id: Uuid, amount: Money, notes: Option<&str>) -> Result<Self> {
        if amount.is_zero() {
            return Err(Error::ZeroAmountPosting);
        }
        let notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Ok(Self {
            account_id,
            amount,
            notes,
        })
    }

    pub fn is_debit(&self) -> bool {
        self.amount.is_positive()
    }

    pub fn is_credit(&self) -> bool {
        self.amount.is_negative()
    }

    /// Flipped-sign copy, used when reversing a transaction.
    pub fn invert(&self) -> Self {
        Self {
            account_id: self.account_id,
            amount: -self.amount.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Validate the double-entry invariant over a set of postings.
///
/// Requires at least two postings, a single currency, and a zero sum at the
/// money storage scale.
pub fn validate_postings(postings: &[Posting]) -> Result<()> {
    if postings.len() < 2 {
        return Err(Error::UnbalancedTransaction(format!(
            "at least 2 postings required, got {}",
            postings.len()
        )));
    }

    let currency = &postings[0].amount.currency;
    if postings.iter().any(|p| &p.amount.currency != currency) {
        return Err(Error::UnbalancedTransaction(
            "postings mix more than one currency".to_string(),
        ));
    }

    let total: Decimal = postings.iter().map(|p| quantize(p.amount.amount)).sum();
    if !quantize(total).is_zero() {
        return Err(Error::UnbalancedTransaction(format!(
            "postings sum to {total} {currency}, expected 0"
        )));
    }

    Ok(())
}

/// Normalize transaction tags: lowercase, trimmed, first-occurrence dedup.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = Vec::new();
    for tag in tags {
        let normalized = tag.as_ref().trim().to_lowercase();
        if !normalized.is_empty() && !seen.contains(&normalized) {
            seen.push(normalized);
        }
    }
    seen
}

/// A balanced double-entry transaction (aggregate root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub date: NaiveDate,
    pub description: String,
    pub postings: Vec<Posting>,
    pub tags: Vec<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub import_batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction, running the balancing check immediately.
    pub fn create(
        date: NaiveDate,
        description: &str,
        postings: Vec<Posting>,
        tags: Vec<String>,
        notes: Option<&str>,
        import_batch_id: Option<Uuid>,
    ) -> Result<Self> {
        validate_postings(&postings)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            date,
            description: description.to_string(),
            postings,
            tags: normalize_tags(tags),
            reference: None,
            notes: notes
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            import_batch_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace all postings wholesale, re-running the balancing check.
    ///
    /// Postings are never patched individually; a failed replacement leaves
    /// the transaction unchanged.
    pub fn replace_postings(&mut self, new_postings: Vec<Posting>) -> Result<()> {
        validate_postings(&new_postings)?;
        self.postings = new_postings;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_balanced(&self) -> bool {
        validate_postings(&self.postings).is_ok()
    }

    /// Per-currency posting totals. A valid transaction reports zero for
    /// every currency key; this is an integrity probe, not a balance query.
    pub fn total_by_currency(&self) -> HashMap<Currency, Decimal> {
        let mut totals: HashMap<Currency, Decimal> = HashMap::new();
        for posting in &self.postings {
            let entry = totals
                .entry(posting.amount.currency.clone())
                .or_insert(Decimal::ZERO);
            *entry += quantize(posting.amount.amount);
        }
        totals
    }

    /// The single currency shared by all postings.
    pub fn currency(&self) -> &Currency {
        &self.postings[0].amount.currency
    }
}

/// Recognized statement sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    NubankCsv,
    Ofx,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NubankCsv => "nubank_csv",
            Self::Ofx => "ofx",
        }
    }
}

impl std::str::FromStr for ImportSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nubank_csv" | "nubank" | "csv" => Ok(Self::NubankCsv),
            "ofx" => Ok(Self::Ofx),
            _ => Err(Error::InvalidData(format!("unknown import source: {s}"))),
        }
    }
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of an import batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        }
    }

    /// Allowed transitions: PENDING -> COMPLETED | FAILED; COMPLETED -> REVERSED.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Reversed)
        )
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "reversed" => Ok(Self::Reversed),
            _ => Err(Error::InvalidData(format!("unknown batch status: {s}"))),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata map attached to batches and entries, stored as JSON.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The record of a single statement file import (aggregate root).
///
/// Identified by the SHA-256 of the file bytes; at most one non-reversed
/// batch may exist per hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub source: ImportSource,
    /// Per-batch unique value stored alongside the source (the batch's own
    /// id); never the filename, which banks reuse across exports.
    pub external_id: String,
    pub filename: String,
    pub file_sha256: String,
    pub status: BatchStatus,
    pub transaction_count: i64,
    pub error_message: Option<String>,
    pub metadata: Metadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportBatch {
    pub fn new(source: ImportSource, filename: &str, file_sha256: &str, metadata: Metadata) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            source,
            external_id: id.to_string(),
            filename: filename.to_string(),
            file_sha256: file_sha256.to_string(),
            status: BatchStatus::Pending,
            transaction_count: 0,
            error_message: None,
            metadata,
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: BatchStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, transaction_count: i64) -> Result<()> {
        self.transition(BatchStatus::Completed)?;
        self.transaction_count = transaction_count;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error_message: &str) -> Result<()> {
        self.transition(BatchStatus::Failed)?;
        self.error_message = Some(error_message.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Release the batch's hash slot so the same file can be imported again.
    pub fn reverse(&mut self) -> Result<()> {
        self.transition(BatchStatus::Reversed)
    }
}

/// Lifecycle of a statement entry. Monotonic; never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Imported,
    Matched,
    Posted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Matched => "matched",
            Self::Posted => "posted",
        }
    }

    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Imported, Self::Matched) | (Self::Matched, Self::Posted)
        )
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "imported" => Ok(Self::Imported),
            "matched" => Ok(Self::Matched),
            "posted" => Ok(Self::Posted),
            _ => Err(Error::InvalidData(format!("unknown entry status: {s}"))),
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed statement row awaiting classification and posting.
///
/// `(batch_id, external_id)` is unique; `transaction_id` is set exactly when
/// the entry reaches POSTED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub external_id: String,
    pub payee: Option<String>,
    pub memo: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub suggested_account_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatementEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch_id: Uuid,
        external_id: &str,
        payee: Option<&str>,
        memo: &str,
        amount: Decimal,
        currency: Currency,
        occurred_at: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            external_id: external_id.to_string(),
            payee: payee.map(str::to_string),
            memo: memo.to_string(),
            amount: quantize(amount),
            currency,
            occurred_at,
            status: EntryStatus::Imported,
            suggested_account_id: None,
            transaction_id: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Negative amounts are debits against the statement holder (expenses).
    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    fn transition(&mut self, next: EntryStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach a suggested account and move to MATCHED.
    pub fn suggest_account(&mut self, account_id: Uuid) -> Result<()> {
        self.transition(EntryStatus::Matched)?;
        self.suggested_account_id = Some(account_id);
        Ok(())
    }

    /// Record the created transaction and move to POSTED.
    pub fn mark_posted(&mut self, transaction_id: Uuid) -> Result<()> {
        self.transition(EntryStatus::Posted)?;
        self.transaction_id = Some(transaction_id);
        Ok(())
    }

    pub fn add_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
        self.updated_at = Utc::now();
    }
}

/// Lifecycle of a credit card statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardStatementStatus {
    Open,
    Paid,
}

impl CardStatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Paid => "PAID",
        }
    }
}

impl std::str::FromStr for CardStatementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "PAID" => Ok(Self::Paid),
            _ => Err(Error::InvalidData(format!(
                "unknown card statement status: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for CardStatementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An individual charge inside a card statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardStatementItem {
    pub transaction_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub category_code: String,
    pub category_name: String,
    pub installment_number: Option<i32>,
    pub installment_total: Option<i32>,
}

/// A persisted credit card statement summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardStatement {
    pub id: Uuid,
    pub card_account_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub closing_day: u32,
    pub due_date: NaiveDate,
    pub currency: Currency,
    pub total_amount: Decimal,
    pub items: Vec<CardStatementItem>,
    pub status: CardStatementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardStatement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        card_account_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
        closing_day: u32,
        due_date: NaiveDate,
        currency: Currency,
        total_amount: Decimal,
        items: Vec<CardStatementItem>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            card_account_id,
            period_start,
            period_end,
            closing_day,
            due_date,
            currency,
            total_amount: quantize(total_amount),
            items,
            status: CardStatementStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_paid(&mut self) {
        self.status = CardStatementStatus::Paid;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn posting(amount: Decimal) -> Posting {
        Posting::new(Uuid::new_v4(), Money::new(amount, usd()), None).unwrap()
    }

    #[test]
    fn test_account_type_nature() {
        assert!(AccountType::Asset.is_debit_positive());
        assert!(AccountType::Expense.is_debit_positive());
        assert!(!AccountType::Income.is_debit_positive());
        assert_eq!(AccountType::Income.sign_multiplier(), -1);
        assert!(AccountType::Equity.is_balance_sheet_account());
        assert!(AccountType::Expense.is_income_statement_account());
    }

    #[test]
    fn test_account_code_family_check() {
        let account = Account::new(
            "Assets:Bank:Checking",
            "Checking",
            AccountType::Asset,
            usd(),
            None,
        )
        .unwrap();
        assert_eq!(account.parent_code(), Some("Assets:Bank"));

        let wrong_family = Account::new(
            "Assets:Bank:Checking",
            "Checking",
            AccountType::Income,
            usd(),
            None,
        );
        assert!(matches!(wrong_family, Err(Error::InvalidAccountType(_))));

        let unknown_root = Account::new("Banks:Checking", "Checking", AccountType::Asset, usd(), None);
        assert!(matches!(unknown_root, Err(Error::InvalidAccountType(_))));
    }

    #[test]
    fn test_posting_rejects_zero() {
        let result = Posting::new(Uuid::new_v4(), Money::zero(usd()), None);
        assert!(matches!(result, Err(Error::ZeroAmountPosting)));
    }

    #[test]
    fn test_posting_invert() {
        let p = posting(dec!(100));
        assert!(p.is_debit());
        let inverted = p.invert();
        assert!(inverted.is_credit());
        assert_eq!(inverted.amount.amount, dec!(-100));
    }

    #[test]
    fn test_transaction_balances() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let txn = Transaction::create(
            date,
            "Salary",
            vec![posting(dec!(5000)), posting(dec!(-5000))],
            vec![],
            None,
            None,
        )
        .unwrap();
        assert!(txn.is_balanced());
        let totals = txn.total_by_currency();
        assert_eq!(totals[&usd()], Decimal::ZERO);
    }

    #[test]
    fn test_transaction_rejects_unbalanced() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let result = Transaction::create(
            date,
            "Broken",
            vec![posting(dec!(100)), posting(dec!(-50))],
            vec![],
            None,
            None,
        );
        assert!(matches!(result, Err(Error::UnbalancedTransaction(_))));
    }

    #[test]
    fn test_transaction_rejects_single_posting() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let result = Transaction::create(date, "Lonely", vec![posting(dec!(1))], vec![], None, None);
        assert!(matches!(result, Err(Error::UnbalancedTransaction(_))));
    }

    #[test]
    fn test_transaction_rejects_mixed_currency() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let brl = Currency::new("BRL").unwrap();
        let other = Posting::new(Uuid::new_v4(), Money::new(dec!(-100), brl), None).unwrap();
        let result = Transaction::create(
            date,
            "Mixed",
            vec![posting(dec!(100)), other],
            vec![],
            None,
            None,
        );
        assert!(matches!(result, Err(Error::UnbalancedTransaction(_))));
    }

    #[test]
    fn test_replace_postings_keeps_old_on_failure() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let mut txn = Transaction::create(
            date,
            "Replace",
            vec![posting(dec!(10)), posting(dec!(-10))],
            vec![],
            None,
            None,
        )
        .unwrap();

        let result = txn.replace_postings(vec![posting(dec!(10)), posting(dec!(-7))]);
        assert!(result.is_err());
        assert!(txn.is_balanced());
        assert_eq!(txn.postings[0].amount.amount, dec!(10));
    }

    #[test]
    fn test_tag_normalization() {
        let tags = normalize_tags(["  Imported ", "IMPORTED", "Batch:1", ""]);
        assert_eq!(tags, vec!["imported".to_string(), "batch:1".to_string()]);
    }

    #[test]
    fn test_batch_external_id_is_its_own_id() {
        // filenames repeat across bank exports; the (source, external_id)
        // pair must stay unique regardless
        let a = ImportBatch::new(ImportSource::NubankCsv, "stmt.csv", &"aa".repeat(32), Metadata::new());
        let b = ImportBatch::new(ImportSource::NubankCsv, "stmt.csv", &"bb".repeat(32), Metadata::new());
        assert_eq!(a.external_id, a.id.to_string());
        assert_eq!(a.filename, "stmt.csv");
        assert_ne!(a.external_id, b.external_id);
    }

    #[test]
    fn test_batch_status_machine() {
        let mut batch = ImportBatch::new(ImportSource::NubankCsv, "stmt.csv", "ab".repeat(32).as_str(), Metadata::new());
        assert_eq!(batch.status, BatchStatus::Pending);

        batch.complete(3).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.transaction_count, 3);
        assert!(batch.completed_at.is_some());

        // completed batches cannot fail, only reverse
        assert!(batch.fail("late").is_err());
        batch.reverse().unwrap();
        assert_eq!(batch.status, BatchStatus::Reversed);
    }

    #[test]
    fn test_entry_status_monotonic() {
        let mut entry = StatementEntry::new(
            Uuid::new_v4(),
            "row:1",
            None,
            "UBER TRIP",
            dec!(-45.10),
            usd(),
            Utc::now(),
            Metadata::new(),
        );
        assert!(entry.is_debit());
        assert_eq!(entry.status, EntryStatus::Imported);

        // cannot post before matching
        assert!(entry.clone().mark_posted(Uuid::new_v4()).is_err());

        entry.suggest_account(Uuid::new_v4()).unwrap();
        assert_eq!(entry.status, EntryStatus::Matched);

        let txn_id = Uuid::new_v4();
        entry.mark_posted(txn_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Posted);
        assert_eq!(entry.transaction_id, Some(txn_id));

        // never backwards
        assert!(entry.suggest_account(Uuid::new_v4()).is_err());
    }
}
