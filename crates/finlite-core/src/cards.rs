//! Credit card payments
//!
//! A card payment is a transfer from an asset account to a liability
//! account: the card is debited (debt shrinks) and the bank account is
//! credited (money leaves). When an open card statement matches the paid
//! amount it is marked PAID.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{AccountType, Posting, Transaction};
use crate::money::{Currency, Money};

/// Result of a card payment.
#[derive(Debug, Clone)]
pub struct PayCardOutcome {
    pub transaction_id: Uuid,
    pub card_account_code: String,
    pub payment_account_code: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub date: NaiveDate,
    /// The open statement settled by this payment, if one matched.
    pub settled_statement_id: Option<Uuid>,
}

/// Record a credit card invoice payment.
///
/// The card account must be a LIABILITY and the payment account an ASSET;
/// the amount must be positive.
#[allow(clippy::too_many_arguments)]
pub fn pay_card(
    db: &Database,
    card_account_code: &str,
    payment_account_code: &str,
    amount: Decimal,
    currency: Currency,
    date: NaiveDate,
    description: Option<&str>,
) -> Result<PayCardOutcome> {
    if amount <= Decimal::ZERO {
        return Err(Error::ParseAmount(format!(
            "payment amount must be positive, got {amount}"
        )));
    }

    let uow = db.unit_of_work()?;

    let card = uow
        .accounts()
        .find_by_code(card_account_code)?
        .ok_or_else(|| Error::AccountNotFound(card_account_code.to_string()))?;
    if card.account_type != AccountType::Liability {
        return Err(Error::InvalidAccountType(format!(
            "{card_account_code} is not a LIABILITY account"
        )));
    }

    let payment = uow
        .accounts()
        .find_by_code(payment_account_code)?
        .ok_or_else(|| Error::AccountNotFound(payment_account_code.to_string()))?;
    if payment.account_type != AccountType::Asset {
        return Err(Error::InvalidAccountType(format!(
            "{payment_account_code} is not an ASSET account"
        )));
    }

    let money = Money::new(amount, currency.clone());
    let postings = vec![
        // debit the card: debt shrinks
        Posting::new(card.id, money.clone(), None)?,
        // credit the bank account: money leaves
        Posting::new(payment.id, -money.clone(), None)?,
    ];

    let transaction = Transaction::create(
        date,
        description.unwrap_or("Credit card payment"),
        postings,
        vec!["card-payment".to_string()],
        None,
        None,
    )?;
    uow.transactions().add(&transaction)?;

    // settle the oldest open statement whose total matches the payment
    let mut settled_statement_id = None;
    for mut statement in uow.card_statements().find_open_for_account(card.id)? {
        if statement.currency == currency && statement.total_amount == money.amount {
            statement.mark_paid();
            uow.card_statements().save(&statement)?;
            settled_statement_id = Some(statement.id);
            break;
        }
    }

    uow.commit()?;
    info!(
        "Paid {} {} on {} from {}",
        amount, currency, card_account_code, payment_account_code
    );

    Ok(PayCardOutcome {
        transaction_id: transaction.id,
        card_account_code: card.code,
        payment_account_code: payment.code,
        amount,
        currency,
        date,
        settled_statement_id,
    })
}
