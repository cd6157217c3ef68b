//! Balance and cashflow reports
//!
//! Pure read paths: postings are aggregated per account over a date window
//! and classified by account type. All returned amounts are quantized to
//! two decimal places (half-up).

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Account, AccountType};
use crate::money::Currency;

/// Reporting scale (two fractional digits, half-up).
fn report_scale(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One account's aggregate within a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTotal {
    pub account_code: String,
    pub account_name: String,
    pub amount: Decimal,
    pub transaction_count: i64,
}

/// Income and spending over a period, single currency.
#[derive(Debug, Clone)]
pub struct CashflowReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub currency: Currency,
    pub income_categories: Vec<CategoryTotal>,
    pub total_income: Decimal,
    pub expense_categories: Vec<CategoryTotal>,
    pub total_expenses: Decimal,
    pub net: Decimal,
    pub asset_balances: Vec<CategoryTotal>,
}

/// Financial position at a date, single currency.
#[derive(Debug, Clone)]
pub struct BalanceSheetReport {
    pub at: NaiveDate,
    pub currency: Currency,
    pub assets: Vec<CategoryTotal>,
    pub liabilities: Vec<CategoryTotal>,
    pub equity: Vec<CategoryTotal>,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub total_equity: Decimal,
    pub net_worth: Decimal,
}

/// Sum postings per account over a set of transactions, in one currency.
/// Postings in other currencies are skipped silently.
fn aggregate_postings(
    transactions: &[crate::models::Transaction],
    currency: &Currency,
) -> HashMap<Uuid, (Decimal, i64)> {
    let mut aggregated: HashMap<Uuid, (Decimal, i64)> = HashMap::new();
    for transaction in transactions {
        for posting in &transaction.postings {
            if &posting.amount.currency != currency {
                continue;
            }
            let slot = aggregated
                .entry(posting.account_id)
                .or_insert((Decimal::ZERO, 0));
            slot.0 += posting.amount.amount;
            slot.1 += 1;
        }
    }
    aggregated
}

fn account_index(accounts: Vec<Account>) -> HashMap<Uuid, Account> {
    accounts
        .into_iter()
        .map(|account| (account.id, account))
        .collect()
}

fn sort_by_magnitude(categories: &mut [CategoryTotal]) {
    categories.sort_by(|a, b| b.amount.abs().cmp(&a.amount.abs()));
}

/// Cashflow over `[from, to]` (inclusive) for one currency.
///
/// Income accounts are reported sign-inverted (credits become positive
/// receipts), expense accounts keep their debit-positive sign, and asset
/// accounts carry their raw net movement. Liability and equity accounts are
/// not part of the cashflow view.
pub fn cashflow(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
    currency: &Currency,
) -> Result<CashflowReport> {
    let uow = db.reader()?;
    let transactions = uow.transactions().find_by_date_range(from, to)?;
    let accounts = account_index(uow.accounts().list_all(true)?);
    let aggregated = aggregate_postings(&transactions, currency);

    let mut income_categories = Vec::new();
    let mut expense_categories = Vec::new();
    let mut asset_balances = Vec::new();

    for (account_id, (sum, count)) in aggregated {
        let Some(account) = accounts.get(&account_id) else {
            continue;
        };

        let (bucket, amount) = match account.account_type {
            AccountType::Income => (&mut income_categories, -sum),
            AccountType::Expense => (&mut expense_categories, sum),
            AccountType::Asset => (&mut asset_balances, sum),
            _ => continue,
        };
        bucket.push(CategoryTotal {
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            amount: report_scale(amount),
            transaction_count: count,
        });
    }

    sort_by_magnitude(&mut income_categories);
    sort_by_magnitude(&mut expense_categories);
    sort_by_magnitude(&mut asset_balances);

    let total_income: Decimal = income_categories.iter().map(|c| c.amount.abs()).sum();
    let total_expenses: Decimal = expense_categories.iter().map(|c| c.amount.abs()).sum();

    Ok(CashflowReport {
        from,
        to,
        currency: currency.clone(),
        income_categories,
        total_income: report_scale(total_income),
        expense_categories,
        total_expenses: report_scale(total_expenses),
        net: report_scale(total_income - total_expenses),
        asset_balances,
    })
}

/// Balance sheet at `at` for one currency.
///
/// Credit-nature balances (liabilities, equity) are sign-flipped so healthy
/// positions read positive. Net worth is assets minus liabilities.
pub fn balance_sheet(db: &Database, at: NaiveDate, currency: &Currency) -> Result<BalanceSheetReport> {
    let uow = db.reader()?;
    let transactions = uow.transactions().find_up_to(at)?;
    let accounts = account_index(uow.accounts().list_all(true)?);
    let aggregated = aggregate_postings(&transactions, currency);

    let mut assets = Vec::new();
    let mut liabilities = Vec::new();
    let mut equity = Vec::new();

    for (account_id, (sum, count)) in aggregated {
        let Some(account) = accounts.get(&account_id) else {
            continue;
        };
        if !account.account_type.is_balance_sheet_account() {
            continue;
        }

        let presented = sum * Decimal::from(account.account_type.sign_multiplier());
        let bucket = match account.account_type {
            AccountType::Asset => &mut assets,
            AccountType::Liability => &mut liabilities,
            _ => &mut equity,
        };
        bucket.push(CategoryTotal {
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            amount: report_scale(presented),
            transaction_count: count,
        });
    }

    sort_by_magnitude(&mut assets);
    sort_by_magnitude(&mut liabilities);
    sort_by_magnitude(&mut equity);

    let total_assets: Decimal = assets.iter().map(|c| c.amount).sum();
    let total_liabilities: Decimal = liabilities.iter().map(|c| c.amount).sum();
    let total_equity: Decimal = equity.iter().map(|c| c.amount).sum();

    Ok(BalanceSheetReport {
        at,
        currency: currency.clone(),
        assets,
        liabilities,
        equity,
        total_assets: report_scale(total_assets),
        total_liabilities: report_scale(total_liabilities),
        total_equity: report_scale(total_equity),
        net_worth: report_scale(total_assets - total_liabilities),
    })
}
