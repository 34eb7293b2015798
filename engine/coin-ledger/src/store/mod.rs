//! Storage capability traits and backends
//!
//! The Ledger Store is written against [`LedgerBackend`] and [`LedgerTx`]. Two
//! implementations ship with the crate: [`PgBackend`] for production and
//! [`MemoryBackend`] for tests.

pub mod memory;
pub mod postgres;

pub use memory::{default_catalog, Fault, FaultKind, FaultPoint, MemoryBackend, MemoryTx};
pub use postgres::{PgBackend, PgTx};

use crate::error::StorageResult;
use crate::model::{Account, CatalogItem, HistoryRecord, InventoryRecord, NewHistoryRecord};

/// Point reads, point writes and transaction begin
#[async_trait::async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    /// Transaction handle produced by [`LedgerBackend::begin`]
    type Tx: LedgerTx;

    /// Open a new transaction
    async fn begin(&self) -> StorageResult<Self::Tx>;

    /// Insert an account row; a taken username is `StorageError::UniqueViolation`
    async fn insert_account(&self, account: &Account) -> StorageResult<()>;

    async fn fetch_account(&self, username: &str) -> StorageResult<Option<Account>>;

    /// Insert the balance row for an account
    async fn insert_balance(&self, username: &str, coins: i64) -> StorageResult<()>;

    async fn fetch_balance(&self, username: &str) -> StorageResult<Option<i64>>;

    async fn fetch_catalog_item(&self, item_type: &str) -> StorageResult<Option<CatalogItem>>;

    async fn fetch_inventory(&self, username: &str) -> StorageResult<Vec<InventoryRecord>>;

    /// History rows for a user, oldest first
    async fn fetch_history(&self, username: &str) -> StorageResult<Vec<HistoryRecord>>;
}

/// Mutations inside one open transaction
///
/// Dropping a transaction without calling [`LedgerTx::commit`] rolls it back.
#[async_trait::async_trait]
pub trait LedgerTx: Send + Sized {
    /// Add `delta` to a balance and return the new value.
    ///
    /// Returns `None` when the user has no balance row. The new value may be
    /// negative; the caller decides whether to commit.
    async fn adjust_balance(&mut self, username: &str, delta: i64) -> StorageResult<Option<i64>>;

    async fn append_history(&mut self, record: &NewHistoryRecord) -> StorageResult<()>;

    /// Increment an inventory count, creating the row if needed. Returns the new quantity.
    async fn add_inventory(
        &mut self,
        username: &str,
        item_type: &str,
        quantity: i64,
    ) -> StorageResult<i64>;

    /// Make all mutations durable.
    ///
    /// A connectivity failure here is `StorageError::CommitOutcomeUnknown`.
    async fn commit(self) -> StorageResult<()>;

    async fn rollback(self) -> StorageResult<()>;
}
