//! PostgreSQL backend

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::{LedgerBackend, LedgerTx};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::model::{Account, CatalogItem, HistoryRecord, InventoryRecord, NewHistoryRecord};

/// Ledger backend over a sqlx connection pool
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Open a connection pool
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    username: String,
    counterparty: String,
    direction: String,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = StorageError;

    fn try_from(row: HistoryRow) -> StorageResult<Self> {
        let direction = row
            .direction
            .parse()
            .map_err(|msg: String| StorageError::Database(sqlx::Error::Decode(msg.into())))?;

        Ok(HistoryRecord {
            username: row.username,
            counterparty: row.counterparty,
            direction,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

#[async_trait::async_trait]
impl LedgerBackend for PgBackend {
    type Tx = PgTx;

    async fn begin(&self) -> StorageResult<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn insert_account(&self, account: &Account) -> StorageResult<()> {
        sqlx::query("INSERT INTO accounts (username, password_hash) VALUES ($1, $2)")
            .bind(&account.username)
            .bind(&account.password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_account(&self, username: &str) -> StorageResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT username, password_hash FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_balance(&self, username: &str, coins: i64) -> StorageResult<()> {
        sqlx::query("INSERT INTO balances (username, coins) VALUES ($1, $2)")
            .bind(username)
            .bind(coins)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_balance(&self, username: &str) -> StorageResult<Option<i64>> {
        let coins = sqlx::query_scalar::<_, i64>("SELECT coins FROM balances WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(coins)
    }

    async fn fetch_catalog_item(&self, item_type: &str) -> StorageResult<Option<CatalogItem>> {
        let item = sqlx::query_as::<_, CatalogItem>(
            "SELECT item_type, price FROM catalog WHERE item_type = $1",
        )
        .bind(item_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    async fn fetch_inventory(&self, username: &str) -> StorageResult<Vec<InventoryRecord>> {
        let records = sqlx::query_as::<_, InventoryRecord>(
            "SELECT username, item_type, quantity FROM inventory WHERE username = $1 ORDER BY item_type",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn fetch_history(&self, username: &str) -> StorageResult<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT username, counterparty, direction, amount, created_at
            FROM history
            WHERE username = $1
            ORDER BY id
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }
}

/// An open Postgres transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl LedgerTx for PgTx {
    async fn adjust_balance(&mut self, username: &str, delta: i64) -> StorageResult<Option<i64>> {
        let coins = sqlx::query_scalar::<_, i64>(
            "UPDATE balances SET coins = coins + $2 WHERE username = $1 RETURNING coins",
        )
        .bind(username)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(coins)
    }

    async fn append_history(&mut self, record: &NewHistoryRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO history (username, counterparty, direction, amount) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.username)
        .bind(&record.counterparty)
        .bind(record.direction.as_str())
        .bind(record.amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn add_inventory(
        &mut self,
        username: &str,
        item_type: &str,
        quantity: i64,
    ) -> StorageResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO inventory (username, item_type, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (username, item_type)
            DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity
            RETURNING quantity
            "#,
        )
        .bind(username)
        .bind(item_type)
        .bind(quantity)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(total)
    }

    async fn commit(self) -> StorageResult<()> {
        self.tx.commit().await.map_err(|err| match StorageError::from(err) {
            StorageError::Connection(msg) | StorageError::Timeout(msg) => {
                StorageError::CommitOutcomeUnknown(msg)
            }
            other => other,
        })
    }

    async fn rollback(self) -> StorageResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
