use async_trait::async_trait;
use divvy_core::{ExpenseId, ItemId, ItemRecord, Money};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

use crate::collection::{ItemCollection, StoreError};

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            expense_id INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            name TEXT NOT NULL,
            price TEXT NOT NULL,
            users TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (expense_id) REFERENCES expenses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS items_by_expense ON items (expense_id, idx)")
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expense {
    pub id: ExpenseId,
    pub description: String,
    pub created_at: String,
}

pub async fn create_expense(pool: &DbPool, description: &str) -> Result<ExpenseId, sqlx::Error> {
    let (id,) = sqlx::query_as::<_, (i64,)>(
        "INSERT INTO expenses (description) VALUES (?) RETURNING id",
    )
    .bind(description)
    .fetch_one(pool)
    .await?;
    Ok(ExpenseId(id))
}

pub async fn get_expense(pool: &DbPool, id: ExpenseId) -> Result<Option<Expense>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, description, created_at FROM expenses WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Expense {
        id: ExpenseId(r.0),
        description: r.1,
        created_at: r.2,
    }))
}

/// Handle on the `items` rows of one expense.
#[derive(Debug, Clone)]
pub struct ExpenseItems {
    pool: DbPool,
    expense_id: ExpenseId,
}

impl ExpenseItems {
    pub fn new(pool: DbPool, expense_id: ExpenseId) -> Self {
        Self { pool, expense_id }
    }

    pub fn expense_id(&self) -> ExpenseId {
        self.expense_id
    }
}

fn row_to_record(row: (i64, i64, String, String, String)) -> Result<ItemRecord, StoreError> {
    let (id, idx, name, price, users) = row;
    let index = u32::try_from(idx)
        .map_err(|_| StoreError::Corrupt(format!("item {id}: index {idx} out of range")))?;
    let price: Money = price
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("item {id}: {e}")))?;
    let users = serde_json::from_str(&users)
        .map_err(|e| StoreError::Corrupt(format!("item {id}: users: {e}")))?;
    Ok(ItemRecord {
        id: Some(ItemId(id)),
        index,
        name,
        price,
        users,
    })
}

#[async_trait]
impl ItemCollection for ExpenseItems {
    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, String)>(
            "SELECT id, idx, name, price, users FROM items WHERE expense_id = ? ORDER BY idx, id",
        )
        .bind(self.expense_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn delete(&self, id: ItemId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM items WHERE id = ? AND expense_id = ?")
            .bind(id.0)
            .bind(self.expense_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn add(&self, record: &ItemRecord) -> Result<ItemId, StoreError> {
        let users = serde_json::to_string(&record.users)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let (id,) = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO items (expense_id, idx, name, price, users) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(self.expense_id.0)
        .bind(i64::from(record.index))
        .bind(&record.name)
        .bind(record.price.amount().to_string())
        .bind(users)
        .fetch_one(&self.pool)
        .await?;
        Ok(ItemId(id))
    }
}
