//! Beancount journal export
//!
//! Emits the whole ledger as a deterministic Beancount document: same data,
//! byte-identical output. Transactions are ordered by (date, id); amounts
//! are written at scale 4 with trailing zeros trimmed.

use std::collections::HashMap;
use std::io::Write;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::money::quantize;

/// Format an amount for the journal: scale 4, trailing zeros trimmed.
fn format_amount(amount: Decimal) -> String {
    let text = format!("{:.4}", quantize(amount));
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write all transactions in Beancount journal format.
pub fn export_beancount<W: Write>(db: &Database, handle: &mut W, operating_currency: &str) -> Result<()> {
    writeln!(handle, "option \"title\" \"Finlite Ledger\"")?;
    writeln!(handle, "option \"operating_currency\" \"{operating_currency}\"")?;
    writeln!(handle)?;

    let uow = db.reader()?;
    let accounts: HashMap<Uuid, String> = uow
        .accounts()
        .list_all(true)?
        .into_iter()
        .map(|account| (account.id, account.code))
        .collect();

    for transaction in uow.transactions().list_all()? {
        let mut header = format!("{} * \"{}\"", transaction.date, transaction.description);
        if let Some(reference) = &transaction.reference {
            header.push_str(&format!(" ; ref:{reference}"));
        }
        writeln!(handle, "{header}")?;

        for posting in &transaction.postings {
            let code = accounts
                .get(&posting.account_id)
                .map(String::as_str)
                .unwrap_or("Unknown");
            let mut line = format!(
                "  {:<40} {} {}",
                code,
                format_amount(posting.amount.amount),
                posting.amount.currency
            );
            if let Some(notes) = &posting.notes {
                line.push_str(&format!(" ; {notes}"));
            }
            writeln!(handle, "{line}")?;
        }

        // metadata comments, sorted by key
        if let Some(batch_id) = transaction.import_batch_id {
            writeln!(handle, "  ; import_batch: {batch_id}")?;
        }
        if !transaction.tags.is_empty() {
            writeln!(handle, "  ; tags: {}", transaction.tags.join(" "))?;
        }

        writeln!(handle)?;
    }

    Ok(())
}
