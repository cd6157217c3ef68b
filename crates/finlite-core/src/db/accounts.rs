//! Chart of accounts repository

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{currency_col, opt_uuid_col, timestamp_col, timestamp_to_sql, uuid_col};
use crate::error::{Error, Result};
use crate::models::{Account, AccountType};
use crate::money::Currency;

const COLUMNS: &str = "id, code, name, type, currency, parent_id, is_active, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let type_text: String = row.get(3)?;
    let account_type: AccountType = type_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown account type: {type_text}").into(),
        )
    })?;

    Ok(Account {
        id: uuid_col(row, 0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        account_type,
        currency: currency_col(row, 4)?,
        parent_id: opt_uuid_col(row, 5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        created_at: timestamp_col(row, 7)?,
        updated_at: timestamp_col(row, 8)?,
    })
}

/// Account capability surface on the unit of work.
pub struct AccountRepo<'a> {
    conn: &'a Connection,
}

impl<'a> AccountRepo<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create an account under a `:`-joined code.
    ///
    /// The parent is resolved from the code path; for non-root codes it must
    /// already exist and not be archived. The stored `parent_id` is a
    /// denormalization of that resolution.
    pub fn create(
        &self,
        code: &str,
        name: &str,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<Account> {
        if self.find_by_code(code)?.is_some() {
            return Err(Error::DuplicateAccount(code.to_string()));
        }

        let parent_id = match code.rsplit_once(':') {
            Some((parent_code, _)) => {
                let parent = self
                    .find_by_code(parent_code)?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| Error::AccountNotFound(parent_code.to_string()))?;
                Some(parent.id)
            }
            None => None,
        };

        let account = Account::new(code, name, account_type, currency, parent_id)?;
        self.insert(&account)?;
        Ok(account)
    }

    fn insert(&self, account: &Account) -> Result<()> {
        self.conn.execute(
            "INSERT INTO accounts (id, code, name, type, currency, parent_id, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                account.id.to_string(),
                account.code,
                account.name,
                account.account_type.as_str(),
                account.currency.as_str(),
                account.parent_id.map(|id| id.to_string()),
                account.is_active as i64,
                timestamp_to_sql(account.created_at),
                timestamp_to_sql(account.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Account> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM accounts WHERE id = ?"),
                params![id.to_string()],
                account_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::AccountNotFound(id.to_string()))
    }

    pub fn find_by_code(&self, code: &str) -> Result<Option<Account>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM accounts WHERE code = ?"),
                params![code],
                account_from_row,
            )
            .optional()?)
    }

    pub fn find_by_type(&self, account_type: AccountType) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE type = ? ORDER BY code"
        ))?;
        let rows = stmt.query_map(params![account_type.as_str()], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn children_of(&self, id: Uuid) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE parent_id = ? ORDER BY code"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn roots(&self) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE parent_id IS NULL ORDER BY code"
        ))?;
        let rows = stmt.query_map([], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_all(&self, include_archived: bool) -> Result<Vec<Account>> {
        let sql = if include_archived {
            format!("SELECT {COLUMNS} FROM accounts ORDER BY code")
        } else {
            format!("SELECT {COLUMNS} FROM accounts WHERE is_active = 1 ORDER BY code")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn rename(&self, id: Uuid, new_name: &str) -> Result<Account> {
        let mut account = self.get(id)?;
        account.rename(new_name);
        self.update(&account)?;
        Ok(account)
    }

    /// Soft-delete an account.
    ///
    /// An archived account may not be the parent of an active one, so the
    /// account must have no active children.
    pub fn archive(&self, id: Uuid) -> Result<Account> {
        let mut account = self.get(id)?;
        let active_children: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE parent_id = ? AND is_active = 1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if active_children > 0 {
            return Err(Error::AccountHasActiveChildren(account.code));
        }
        account.archive();
        self.update(&account)?;
        Ok(account)
    }

    pub fn reactivate(&self, id: Uuid) -> Result<Account> {
        let mut account = self.get(id)?;
        if let Some(parent_id) = account.parent_id {
            let parent = self.get(parent_id)?;
            if !parent.is_active {
                return Err(Error::AccountNotFound(parent.code));
            }
        }
        account.reactivate();
        self.update(&account)?;
        Ok(account)
    }

    /// Hard-delete an account. Only permitted while no posting references it.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let account = self.get(id)?;
        let references: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM postings WHERE account_id = ?",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if references > 0 {
            return Err(Error::AccountInUse(account.code));
        }
        self.conn.execute(
            "DELETE FROM accounts WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn update(&self, account: &Account) -> Result<()> {
        self.conn.execute(
            "UPDATE accounts SET name = ?, is_active = ?, updated_at = ? WHERE id = ?",
            params![
                account.name,
                account.is_active as i64,
                timestamp_to_sql(account.updated_at),
                account.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Create the five root accounts if they do not exist yet. Idempotent.
    pub fn seed_default_chart(&self, currency: &Currency) -> Result<()> {
        let chart = [
            ("Assets", AccountType::Asset),
            ("Liabilities", AccountType::Liability),
            ("Equity", AccountType::Equity),
            ("Income", AccountType::Income),
            ("Expenses", AccountType::Expense),
        ];
        for (code, account_type) in chart {
            if self.find_by_code(code)?.is_none() {
                self.create(code, code, account_type, currency.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::error::Error;
    use crate::models::AccountType;
    use crate::money::Currency;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        let root = accounts
            .create("Assets", "Assets", AccountType::Asset, usd())
            .unwrap();
        let bank = accounts
            .create("Assets:Bank", "Bank", AccountType::Asset, usd())
            .unwrap();

        assert_eq!(bank.parent_id, Some(root.id));
        assert_eq!(accounts.get(bank.id).unwrap().code, "Assets:Bank");
        assert_eq!(
            accounts.find_by_code("Assets:Bank").unwrap().unwrap().id,
            bank.id
        );
        assert_eq!(accounts.children_of(root.id).unwrap().len(), 1);
        assert_eq!(accounts.roots().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        accounts
            .create("Assets", "Assets", AccountType::Asset, usd())
            .unwrap();
        let result = accounts.create("Assets", "Again", AccountType::Asset, usd());
        assert!(matches!(result, Err(Error::DuplicateAccount(_))));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let result = uow
            .accounts()
            .create("Assets:Bank", "Bank", AccountType::Asset, usd());
        assert!(matches!(result, Err(Error::AccountNotFound(_))));
    }

    #[test]
    fn test_archive_requires_no_active_children() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        let root = accounts
            .create("Expenses", "Expenses", AccountType::Expense, usd())
            .unwrap();
        let food = accounts
            .create("Expenses:Food", "Food", AccountType::Expense, usd())
            .unwrap();

        assert!(matches!(
            accounts.archive(root.id),
            Err(Error::AccountHasActiveChildren(_))
        ));

        accounts.archive(food.id).unwrap();
        let root = accounts.archive(root.id).unwrap();
        assert!(!root.is_active);

        // archived parent blocks new children
        let result = accounts.create("Expenses:Rent", "Rent", AccountType::Expense, usd());
        assert!(matches!(result, Err(Error::AccountNotFound(_))));
    }

    #[test]
    fn test_reactivate_under_archived_parent_rejected() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        accounts
            .create("Income", "Income", AccountType::Income, usd())
            .unwrap();
        let salary = accounts
            .create("Income:Salary", "Salary", AccountType::Income, usd())
            .unwrap();
        accounts.archive(salary.id).unwrap();
        let root = accounts.find_by_code("Income").unwrap().unwrap();
        accounts.archive(root.id).unwrap();

        assert!(accounts.reactivate(salary.id).is_err());
    }

    #[test]
    fn test_list_all_respects_archive_flag() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        accounts.seed_default_chart(&usd()).unwrap();
        let equity = accounts.find_by_code("Equity").unwrap().unwrap();
        accounts.archive(equity.id).unwrap();

        assert_eq!(accounts.list_all(false).unwrap().len(), 4);
        assert_eq!(accounts.list_all(true).unwrap().len(), 5);
    }

    #[test]
    fn test_seed_default_chart_idempotent() {
        let db = Database::for_tests().unwrap();
        let uow = db.unit_of_work().unwrap();
        let accounts = uow.accounts();

        accounts.seed_default_chart(&usd()).unwrap();
        accounts.seed_default_chart(&usd()).unwrap();
        assert_eq!(accounts.roots().unwrap().len(), 5);
    }
}
