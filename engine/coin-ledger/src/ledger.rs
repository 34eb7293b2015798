//! Ledger Store: atomic balance operations over a storage backend
//!
//! Point reads and writes are retried one call at a time. Transfers and
//! purchases run as one transaction each; when such a unit fails transiently it
//! has already been rolled back, so the whole unit (begin through commit) is
//! retried. Nothing here logs: every outcome is returned to the caller.

use tokio_util::sync::CancellationToken;

use crate::error::{LedgerError, LedgerResult, Retryable, StorageError};
use crate::model::{Account, AccountCreation, CoinHistory, InventoryRecord, NewHistoryRecord};
use crate::retry::RetryPolicy;
use crate::store::{LedgerBackend, LedgerTx};

/// Per-call retry policy and cancellation signal
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub policy: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
}

impl<'a> CallContext<'a> {
    pub fn new(policy: &'a RetryPolicy, cancel: &'a CancellationToken) -> Self {
        Self { policy, cancel }
    }

    async fn retry<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Retryable + From<StorageError> + std::fmt::Display,
    {
        self.policy.run(self.cancel, operation).await
    }
}

/// Atomic ledger operations
pub struct Ledger<B: LedgerBackend> {
    backend: B,
    initial_balance: i64,
}

impl<B: LedgerBackend> Ledger<B> {
    pub fn new(backend: B, initial_balance: i64) -> Self {
        Self { backend, initial_balance }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn initial_balance(&self) -> i64 {
        self.initial_balance
    }

    /// Insert an account, or return the stored one if the username is taken.
    pub async fn create_account(
        &self,
        ctx: CallContext<'_>,
        username: &str,
        password_hash: &str,
    ) -> LedgerResult<AccountCreation> {
        let backend = &self.backend;
        let account = Account {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        let new_account = &account;

        let inserted = ctx.retry(|| async move { backend.insert_account(new_account).await }).await;

        match inserted {
            Ok(()) => Ok(AccountCreation::Created(account)),
            Err(StorageError::UniqueViolation(_)) => {
                let existing =
                    ctx.retry(|| async move { backend.fetch_account(username).await }).await?;

                existing
                    .map(AccountCreation::AlreadyExists)
                    .ok_or_else(|| LedgerError::MissingAccount(username.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Insert the starting balance for a freshly created account.
    pub async fn create_balance(&self, ctx: CallContext<'_>, username: &str) -> LedgerResult<()> {
        let backend = &self.backend;
        let coins = self.initial_balance;

        match ctx.retry(|| async move { backend.insert_balance(username, coins).await }).await {
            Ok(()) => Ok(()),
            Err(StorageError::UniqueViolation(_)) => {
                Err(LedgerError::BalanceExists(username.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Move `amount` coins from `from` to `to` and record both sides.
    ///
    /// Returns the sender's balance after the transfer.
    pub async fn transfer_coins(
        &self,
        ctx: CallContext<'_>,
        from: &str,
        to: &str,
        amount: i64,
    ) -> LedgerResult<i64> {
        let backend = &self.backend;

        let recipient = ctx.retry(|| async move { backend.fetch_account(to).await }).await?;
        if recipient.is_none() {
            return Err(LedgerError::NoSuchUser(to.to_string()));
        }

        ctx.retry(|| async move {
            let mut tx = backend.begin().await.map_err(LedgerError::from)?;
            let applied = Self::apply_transfer(&mut tx, from, to, amount).await;
            Self::finish(tx, applied).await
        })
        .await
    }

    /// Debit the item's price from `username` and add one unit to their inventory.
    ///
    /// Returns the buyer's balance after the purchase.
    pub async fn purchase_item(
        &self,
        ctx: CallContext<'_>,
        username: &str,
        item_type: &str,
    ) -> LedgerResult<i64> {
        let backend = &self.backend;

        let item = ctx
            .retry(|| async move { backend.fetch_catalog_item(item_type).await })
            .await?
            .ok_or_else(|| LedgerError::NoSuchItem(item_type.to_string()))?;
        let price = item.price;

        ctx.retry(|| async move {
            let mut tx = backend.begin().await.map_err(LedgerError::from)?;
            let applied = Self::apply_purchase(&mut tx, username, item_type, price).await;
            Self::finish(tx, applied).await
        })
        .await
    }

    pub async fn get_balance(&self, ctx: CallContext<'_>, username: &str) -> LedgerResult<i64> {
        let backend = &self.backend;

        ctx.retry(|| async move { backend.fetch_balance(username).await })
            .await?
            .ok_or_else(|| LedgerError::MissingBalance(username.to_string()))
    }

    pub async fn get_inventory(
        &self,
        ctx: CallContext<'_>,
        username: &str,
    ) -> LedgerResult<Vec<InventoryRecord>> {
        let backend = &self.backend;
        Ok(ctx.retry(|| async move { backend.fetch_inventory(username).await }).await?)
    }

    pub async fn get_history(&self, ctx: CallContext<'_>, username: &str) -> LedgerResult<CoinHistory> {
        let backend = &self.backend;
        let records = ctx.retry(|| async move { backend.fetch_history(username).await }).await?;
        Ok(CoinHistory::from_records(records))
    }

    async fn apply_transfer(tx: &mut B::Tx, from: &str, to: &str, amount: i64) -> LedgerResult<i64> {
        let remaining = debit(tx, from, amount).await?;

        tx.append_history(&NewHistoryRecord::sent(from, to, amount)).await?;

        tx.adjust_balance(to, amount)
            .await?
            .ok_or_else(|| LedgerError::MissingBalance(to.to_string()))?;

        tx.append_history(&NewHistoryRecord::received(to, from, amount)).await?;

        Ok(remaining)
    }

    async fn apply_purchase(
        tx: &mut B::Tx,
        username: &str,
        item_type: &str,
        price: i64,
    ) -> LedgerResult<i64> {
        let remaining = debit(tx, username, price).await?;
        tx.add_inventory(username, item_type, 1).await?;
        Ok(remaining)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(tx: B::Tx, applied: LedgerResult<T>) -> LedgerResult<T> {
        match applied {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // A failed rollback still discards the transaction on drop.
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }
}

/// Subtract `amount` from a balance, refusing to leave it negative.
async fn debit<T: LedgerTx>(tx: &mut T, username: &str, amount: i64) -> LedgerResult<i64> {
    let balance = tx
        .adjust_balance(username, -amount)
        .await?
        .ok_or_else(|| LedgerError::MissingBalance(username.to_string()))?;

    if balance < 0 {
        return Err(LedgerError::NegativeBalance {
            username: username.to_string(),
            balance,
            debit: amount,
        });
    }

    Ok(balance)
}
