//! Purchase Engine: spending coins on catalog items

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{LedgerError, Result, ServiceError};
use crate::ledger::{CallContext, Ledger};
use crate::retry::RetryPolicy;
use crate::store::LedgerBackend;

pub struct PurchaseEngine<B: LedgerBackend> {
    ledger: Arc<Ledger<B>>,
    policy: RetryPolicy,
}

impl<B: LedgerBackend> PurchaseEngine<B> {
    pub fn new(ledger: Arc<Ledger<B>>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Buy one unit of `item_type` for `username`.
    pub async fn purchase(
        &self,
        cancel: &CancellationToken,
        username: &str,
        item_type: &str,
    ) -> Result<()> {
        if item_type.is_empty() {
            return Err(ServiceError::invalid_request("item is required"));
        }

        let ctx = CallContext::new(&self.policy, cancel);

        match self.ledger.purchase_item(ctx, username, item_type).await {
            Ok(remaining) => {
                info!("{} bought {} ({} coins left)", username, item_type, remaining);
                Ok(())
            }
            Err(LedgerError::NoSuchItem(item)) => Err(ServiceError::NoSuchItem(item)),
            Err(LedgerError::NegativeBalance { .. }) => Err(ServiceError::InsufficientFunds),
            Err(e) => {
                error!("Purchase of {} by {} failed: {}", item_type, username, e);
                Err(ServiceError::internal(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    async fn engine_for(username: &str, coins: i64) -> PurchaseEngine<MemoryBackend> {
        let ledger = Arc::new(Ledger::new(MemoryBackend::new(), 1000));
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let ctx = CallContext::new(&policy, &cancel);

        ledger.create_account(ctx, username, "hash").await.unwrap();
        ledger.create_balance(ctx, username).await.unwrap();
        ledger.backend().set_balance(username, coins).await;
        PurchaseEngine::new(ledger, policy)
    }

    #[tokio::test]
    async fn test_purchase_and_error_mapping() {
        let engine = engine_for("alice", 60).await;
        let cancel = CancellationToken::new();

        assert!(matches!(
            engine.purchase(&cancel, "alice", "").await,
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            engine.purchase(&cancel, "alice", "yacht").await,
            Err(ServiceError::NoSuchItem(_))
        ));

        engine.purchase(&cancel, "alice", "book").await.unwrap();
        assert!(matches!(
            engine.purchase(&cancel, "alice", "book").await,
            Err(ServiceError::InsufficientFunds)
        ));

        let backend = engine.ledger.backend();
        assert_eq!(backend.fetch_balance("alice").await.unwrap(), Some(10));
        assert_eq!(backend.fetch_inventory("alice").await.unwrap()[0].quantity, 1);
    }
}
