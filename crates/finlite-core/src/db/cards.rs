//! Card statement repository

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{currency_col, date_col, decimal_col, decimal_to_sql, timestamp_col, timestamp_to_sql, uuid_col};
use crate::error::{Error, Result};
use crate::models::{CardStatement, CardStatementItem, CardStatementStatus};

const COLUMNS: &str = "id, card_account_id, period_start, period_end, closing_day, due_date, \
                       currency, total_amount, status, items_json, created_at, updated_at";

fn statement_from_row(row: &Row<'_>) -> rusqlite::Result<CardStatement> {
    let status_text: String = row.get(8)?;
    let status: CardStatementStatus = status_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown card statement status: {status_text}").into(),
        )
    })?;
    let items_json: String = row.get(9)?;
    let items: Vec<CardStatementItem> = serde_json::from_str(&items_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CardStatement {
        id: uuid_col(row, 0)?,
        card_account_id: uuid_col(row, 1)?,
        period_start: date_col(row, 2)?,
        period_end: date_col(row, 3)?,
        closing_day: row.get(4)?,
        due_date: date_col(row, 5)?,
        currency: currency_col(row, 6)?,
        total_amount: decimal_col(row, 7)?,
        status,
        items,
        created_at: timestamp_col(row, 10)?,
        updated_at: timestamp_col(row, 11)?,
    })
}

/// Card statement capability surface on the unit of work.
pub struct CardStatementRepo<'a> {
    conn: &'a Connection,
}

impl<'a> CardStatementRepo<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn add(&self, statement: &CardStatement) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO card_statements ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                statement.id.to_string(),
                statement.card_account_id.to_string(),
                statement.period_start.to_string(),
                statement.period_end.to_string(),
                statement.closing_day,
                statement.due_date.to_string(),
                statement.currency.as_str(),
                decimal_to_sql(statement.total_amount),
                statement.status.as_str(),
                serde_json::to_string(&statement.items)?,
                timestamp_to_sql(statement.created_at),
                timestamp_to_sql(statement.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn save(&self, statement: &CardStatement) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE card_statements SET status = ?, total_amount = ?, items_json = ?, \
             updated_at = ? WHERE id = ?",
            params![
                statement.status.as_str(),
                decimal_to_sql(statement.total_amount),
                serde_json::to_string(&statement.items)?,
                timestamp_to_sql(statement.updated_at),
                statement.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::StatementEntryNotFound(statement.id));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<CardStatement> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM card_statements WHERE id = ?"),
                params![id.to_string()],
                statement_from_row,
            )
            .optional()?
            .ok_or(Error::StatementEntryNotFound(id))
    }

    /// Open statements for a card account, oldest period first.
    pub fn find_open_for_account(&self, card_account_id: Uuid) -> Result<Vec<CardStatement>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM card_statements \
             WHERE card_account_id = ? AND status = 'OPEN' ORDER BY period_start"
        ))?;
        let rows = stmt.query_map(params![card_account_id.to_string()], statement_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::db::Database;
    use crate::models::{AccountType, CardStatement, CardStatementStatus};
    use crate::money::Currency;

    #[test]
    fn test_round_trip_and_mark_paid() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();

        let brl = Currency::new("BRL").unwrap();
        uow.accounts().seed_default_chart(&brl).unwrap();
        let card = uow
            .accounts()
            .create("Liabilities:CreditCard", "Card", AccountType::Liability, brl.clone())
            .unwrap();

        let mut statement = CardStatement::new(
            card.id,
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(),
            31,
            NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
            brl,
            dec!(1500.00),
            vec![],
        );
        uow.card_statements().add(&statement).unwrap();

        assert_eq!(
            uow.card_statements()
                .find_open_for_account(card.id)
                .unwrap()
                .len(),
            1
        );

        statement.mark_paid();
        uow.card_statements().save(&statement).unwrap();

        let loaded = uow.card_statements().get(statement.id).unwrap();
        assert_eq!(loaded.status, CardStatementStatus::Paid);
        assert!(uow
            .card_statements()
            .find_open_for_account(card.id)
            .unwrap()
            .is_empty());
    }
}
