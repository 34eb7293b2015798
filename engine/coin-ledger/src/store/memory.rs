//! In-process backend used by tests
//!
//! All tables live behind one `tokio::sync::Mutex`. A transaction holds the lock
//! for its whole lifetime together with a snapshot taken at begin; rollback (or
//! drop) restores the snapshot. Faults can be injected at every storage call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerBackend, LedgerTx};
use crate::error::{StorageError, StorageResult};
use crate::model::{Account, CatalogItem, HistoryRecord, InventoryRecord, NewHistoryRecord};

/// Merch list seeded into a fresh store
pub fn default_catalog() -> Vec<CatalogItem> {
    [
        ("t-shirt", 80),
        ("cup", 20),
        ("book", 50),
        ("pen", 10),
        ("powerbank", 200),
        ("hoody", 300),
        ("umbrella", 200),
        ("socks", 10),
        ("wallet", 50),
        ("pink-hoody", 500),
    ]
    .into_iter()
    .map(|(item_type, price)| CatalogItem { item_type: item_type.to_string(), price })
    .collect()
}

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    balances: HashMap<String, i64>,
    catalog: HashMap<String, CatalogItem>,
    inventory: BTreeMap<(String, String), i64>,
    history: Vec<HistoryRecord>,
}

/// Storage call at which a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    InsertAccount,
    FetchAccount,
    InsertBalance,
    FetchBalance,
    FetchCatalogItem,
    FetchInventory,
    FetchHistory,
    AdjustBalance,
    AppendHistory,
    AddInventory,
    Commit,
}

/// What an injected fault looks like to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Reported as `StorageError::Connection`; at `Commit` the transaction is
    /// rolled back and reported as `StorageError::CommitOutcomeUnknown`
    Transient,
    /// Reported as `StorageError::ConstraintViolation`
    Terminal,
    /// At `Commit` the transaction is applied and then reported as
    /// `StorageError::CommitOutcomeUnknown`; elsewhere only the error is returned
    OutcomeUnknown,
}

impl FaultKind {
    fn error(self, point: FaultPoint) -> StorageError {
        let msg = format!("injected fault at {point:?}");
        match self {
            FaultKind::Transient => StorageError::Connection(msg),
            FaultKind::Terminal => StorageError::ConstraintViolation(msg),
            FaultKind::OutcomeUnknown => StorageError::CommitOutcomeUnknown(msg),
        }
    }
}

/// A fault rule
#[derive(Debug, Clone)]
pub struct Fault {
    point: FaultPoint,
    kind: FaultKind,
    skip: u32,
    remaining: Option<u32>,
}

impl Fault {
    pub fn new(point: FaultPoint, kind: FaultKind) -> Self {
        Self { point, kind, skip: 0, remaining: None }
    }

    pub fn transient(point: FaultPoint) -> Self {
        Self::new(point, FaultKind::Transient)
    }

    pub fn terminal(point: FaultPoint) -> Self {
        Self::new(point, FaultKind::Terminal)
    }

    /// Let the first `n` matching calls through
    pub fn skip(mut self, n: u32) -> Self {
        self.skip = n;
        self
    }

    /// Fire at most `n` times, then disarm
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    rules: Vec<Fault>,
    calls: HashMap<FaultPoint, u32>,
}

impl FaultPlan {
    /// Record a call at `point` and return the fault to raise, if any.
    fn check(&mut self, point: FaultPoint) -> Option<FaultKind> {
        *self.calls.entry(point).or_insert(0) += 1;

        let rule = self
            .rules
            .iter_mut()
            .find(|rule| rule.point == point && rule.remaining != Some(0))?;

        if rule.skip > 0 {
            rule.skip -= 1;
            return None;
        }

        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }

        Some(rule.kind)
    }
}

/// In-memory ledger backend
#[derive(Clone)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<FaultPlan>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty store seeded with [`default_catalog`]
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    pub fn with_catalog(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let tables = Tables {
            catalog: items.into_iter().map(|item| (item.item_type.clone(), item)).collect(),
            ..Default::default()
        };

        Self {
            tables: Arc::new(Mutex::new(tables)),
            faults: Arc::new(Mutex::new(FaultPlan::default())),
        }
    }

    /// Arm a fault rule
    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.rules.push(fault);
    }

    /// Remove all fault rules (call counters are kept)
    pub async fn clear_faults(&self) {
        self.faults.lock().await.rules.clear();
    }

    /// Number of calls observed at `point`, including faulted ones
    pub async fn calls(&self, point: FaultPoint) -> u32 {
        self.faults.lock().await.calls.get(&point).copied().unwrap_or(0)
    }

    /// Overwrite a balance directly, bypassing the ledger
    pub async fn set_balance(&self, username: &str, coins: i64) {
        self.tables.lock().await.balances.insert(username.to_string(), coins);
    }

    /// Sum of all balances
    pub async fn total_coins(&self) -> i64 {
        self.tables.lock().await.balances.values().sum()
    }

    /// Number of history rows across all users
    pub async fn history_len(&self) -> usize {
        self.tables.lock().await.history.len()
    }

    async fn trip(&self, point: FaultPoint) -> StorageResult<()> {
        trip(&self.faults, point).await
    }
}

async fn trip(faults: &Mutex<FaultPlan>, point: FaultPoint) -> StorageResult<()> {
    match faults.lock().await.check(point) {
        Some(kind) => Err(kind.error(point)),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl LedgerBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> StorageResult<MemoryTx> {
        self.trip(FaultPoint::Begin).await?;

        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();

        Ok(MemoryTx { guard, snapshot: Some(snapshot), faults: self.faults.clone() })
    }

    async fn insert_account(&self, account: &Account) -> StorageResult<()> {
        self.trip(FaultPoint::InsertAccount).await?;

        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(&account.username) {
            return Err(StorageError::UniqueViolation(format!(
                "accounts_pkey: {}",
                account.username
            )));
        }

        tables.accounts.insert(account.username.clone(), account.clone());
        Ok(())
    }

    async fn fetch_account(&self, username: &str) -> StorageResult<Option<Account>> {
        self.trip(FaultPoint::FetchAccount).await?;
        Ok(self.tables.lock().await.accounts.get(username).cloned())
    }

    async fn insert_balance(&self, username: &str, coins: i64) -> StorageResult<()> {
        self.trip(FaultPoint::InsertBalance).await?;

        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(username) {
            return Err(StorageError::ConstraintViolation(format!(
                "balances_username_fkey: {username}"
            )));
        }
        if tables.balances.contains_key(username) {
            return Err(StorageError::UniqueViolation(format!("balances_pkey: {username}")));
        }

        tables.balances.insert(username.to_string(), coins);
        Ok(())
    }

    async fn fetch_balance(&self, username: &str) -> StorageResult<Option<i64>> {
        self.trip(FaultPoint::FetchBalance).await?;
        Ok(self.tables.lock().await.balances.get(username).copied())
    }

    async fn fetch_catalog_item(&self, item_type: &str) -> StorageResult<Option<CatalogItem>> {
        self.trip(FaultPoint::FetchCatalogItem).await?;
        Ok(self.tables.lock().await.catalog.get(item_type).cloned())
    }

    async fn fetch_inventory(&self, username: &str) -> StorageResult<Vec<InventoryRecord>> {
        self.trip(FaultPoint::FetchInventory).await?;

        let tables = self.tables.lock().await;
        Ok(tables
            .inventory
            .iter()
            .filter(|((owner, _), _)| owner == username)
            .map(|((owner, item_type), quantity)| InventoryRecord {
                username: owner.clone(),
                item_type: item_type.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn fetch_history(&self, username: &str) -> StorageResult<Vec<HistoryRecord>> {
        self.trip(FaultPoint::FetchHistory).await?;

        let tables = self.tables.lock().await;
        Ok(tables.history.iter().filter(|record| record.username == username).cloned().collect())
    }
}

/// Transaction over the in-memory tables
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
    faults: Arc<Mutex<FaultPlan>>,
}

impl MemoryTx {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.restore();
    }
}

#[async_trait::async_trait]
impl LedgerTx for MemoryTx {
    async fn adjust_balance(&mut self, username: &str, delta: i64) -> StorageResult<Option<i64>> {
        trip(&self.faults, FaultPoint::AdjustBalance).await?;

        let Some(coins) = self.guard.balances.get_mut(username) else {
            return Ok(None);
        };

        *coins = coins
            .checked_add(delta)
            .ok_or_else(|| StorageError::ConstraintViolation(format!("coins out of range: {username}")))?;

        Ok(Some(*coins))
    }

    async fn append_history(&mut self, record: &NewHistoryRecord) -> StorageResult<()> {
        trip(&self.faults, FaultPoint::AppendHistory).await?;

        if !self.guard.accounts.contains_key(&record.username) {
            return Err(StorageError::ConstraintViolation(format!(
                "history_username_fkey: {}",
                record.username
            )));
        }

        self.guard.history.push(HistoryRecord {
            username: record.username.clone(),
            counterparty: record.counterparty.clone(),
            direction: record.direction,
            amount: record.amount,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn add_inventory(
        &mut self,
        username: &str,
        item_type: &str,
        quantity: i64,
    ) -> StorageResult<i64> {
        trip(&self.faults, FaultPoint::AddInventory).await?;

        if !self.guard.catalog.contains_key(item_type) {
            return Err(StorageError::ConstraintViolation(format!(
                "inventory_item_type_fkey: {item_type}"
            )));
        }

        let count =
            self.guard.inventory.entry((username.to_string(), item_type.to_string())).or_insert(0);
        *count += quantity;
        Ok(*count)
    }

    async fn commit(mut self) -> StorageResult<()> {
        match self.faults.lock().await.check(FaultPoint::Commit) {
            Some(FaultKind::OutcomeUnknown) => {
                // Applied, but the caller cannot know that.
                self.snapshot = None;
                Err(FaultKind::OutcomeUnknown.error(FaultPoint::Commit))
            }
            Some(FaultKind::Transient) => {
                // A lost connection during COMMIT leaves the outcome unknown.
                Err(FaultKind::OutcomeUnknown.error(FaultPoint::Commit))
            }
            Some(kind) => Err(kind.error(FaultPoint::Commit)),
            None => {
                self.snapshot = None;
                Ok(())
            }
        }
    }

    async fn rollback(mut self) -> StorageResult<()> {
        self.restore();
        Ok(())
    }
}
