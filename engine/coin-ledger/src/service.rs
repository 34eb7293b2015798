//! LedgerService: the engines behind one handle
//!
//! This is what the HTTP layer holds. It is cheap to share behind an `Arc`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::LedgerConfig;
use crate::error::{Result, ServiceError};
use crate::ledger::{CallContext, Ledger};
use crate::model::{InventoryItem, UserInfo};
use crate::purchase::PurchaseEngine;
use crate::registrar::{AccountRegistrar, Registration};
use crate::retry::RetryPolicy;
use crate::store::LedgerBackend;
use crate::transfer::TransferEngine;

pub struct LedgerService<B: LedgerBackend> {
    ledger: Arc<Ledger<B>>,
    registrar: AccountRegistrar<B>,
    transfers: TransferEngine<B>,
    purchases: PurchaseEngine<B>,
    policy: RetryPolicy,
}

impl<B: LedgerBackend> LedgerService<B> {
    pub fn new(backend: B, initial_balance: i64, policy: RetryPolicy) -> Self {
        let ledger = Arc::new(Ledger::new(backend, initial_balance));

        Self {
            registrar: AccountRegistrar::new(ledger.clone(), policy.clone()),
            transfers: TransferEngine::new(ledger.clone(), policy.clone()),
            purchases: PurchaseEngine::new(ledger.clone(), policy.clone()),
            ledger,
            policy,
        }
    }

    pub fn from_config(backend: B, config: &LedgerConfig) -> Self {
        Self::new(backend, config.initial_balance, config.retry.clone())
    }

    pub fn ledger(&self) -> &Ledger<B> {
        &self.ledger
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn register(
        &self,
        cancel: &CancellationToken,
        username: &str,
        password: &str,
    ) -> Result<Registration> {
        self.registrar.register(cancel, username, password).await
    }

    pub async fn send_coins(
        &self,
        cancel: &CancellationToken,
        from: &str,
        to: &str,
        amount: i64,
    ) -> Result<()> {
        self.transfers.transfer(cancel, from, to, amount).await
    }

    pub async fn buy_item(
        &self,
        cancel: &CancellationToken,
        username: &str,
        item_type: &str,
    ) -> Result<()> {
        self.purchases.purchase(cancel, username, item_type).await
    }

    /// Balance, inventory and transfer history for one user
    pub async fn user_info(&self, cancel: &CancellationToken, username: &str) -> Result<UserInfo> {
        let ctx = CallContext::new(&self.policy, cancel);

        let (coins, inventory, coin_history) = tokio::try_join!(
            self.ledger.get_balance(ctx, username),
            self.ledger.get_inventory(ctx, username),
            self.ledger.get_history(ctx, username),
        )
        .map_err(|e| {
            error!("Failed to load info for {}: {}", username, e);
            ServiceError::internal(e.to_string())
        })?;

        Ok(UserInfo {
            coins,
            inventory: inventory.into_iter().map(InventoryItem::from).collect(),
            coin_history,
        })
    }
}
