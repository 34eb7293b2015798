//! Transfer Engine: coin transfers between users

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{LedgerError, Result, ServiceError};
use crate::ledger::{CallContext, Ledger};
use crate::retry::RetryPolicy;
use crate::store::LedgerBackend;

pub struct TransferEngine<B: LedgerBackend> {
    ledger: Arc<Ledger<B>>,
    policy: RetryPolicy,
}

impl<B: LedgerBackend> TransferEngine<B> {
    pub fn new(ledger: Arc<Ledger<B>>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Send `amount` coins from `from` to `to`.
    pub async fn transfer(
        &self,
        cancel: &CancellationToken,
        from: &str,
        to: &str,
        amount: i64,
    ) -> Result<()> {
        if amount <= 0 {
            return Err(ServiceError::invalid_request("amount must be positive"));
        }
        if to.is_empty() {
            return Err(ServiceError::invalid_request("recipient is required"));
        }
        if from == to {
            return Err(ServiceError::invalid_request("cannot send coins to yourself"));
        }

        let ctx = CallContext::new(&self.policy, cancel);

        match self.ledger.transfer_coins(ctx, from, to, amount).await {
            Ok(remaining) => {
                info!("Transferred {} coins from {} to {} ({} left)", amount, from, to, remaining);
                Ok(())
            }
            Err(LedgerError::NoSuchUser(user)) => Err(ServiceError::NoSuchUser(user)),
            Err(LedgerError::NegativeBalance { .. }) => Err(ServiceError::InsufficientFunds),
            Err(e) => {
                error!("Transfer of {} coins from {} to {} failed: {}", amount, from, to, e);
                Err(ServiceError::internal(e.to_string()))
            }
        }
    }
}
