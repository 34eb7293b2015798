//! Account Registrar: first-time registration or login
//!
//! A username that is already taken is treated as a login attempt: the
//! supplied password is checked against the stored hash.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, ServiceError};
use crate::ledger::{CallContext, Ledger};
use crate::model::AccountCreation;
use crate::password::{hash_password_blocking, verify_password_blocking};
use crate::retry::RetryPolicy;
use crate::store::LedgerBackend;

/// Outcome of a successful [`AccountRegistrar::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New account with its starting balance
    Created,
    /// Existing account, password matched
    LoggedIn,
}

pub struct AccountRegistrar<B: LedgerBackend> {
    ledger: Arc<Ledger<B>>,
    policy: RetryPolicy,
}

impl<B: LedgerBackend> AccountRegistrar<B> {
    pub fn new(ledger: Arc<Ledger<B>>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Register `username`, or log in if it already exists.
    pub async fn register(
        &self,
        cancel: &CancellationToken,
        username: &str,
        password: &str,
    ) -> Result<Registration> {
        if username.is_empty() {
            return Err(ServiceError::invalid_request("username is required"));
        }
        if password.is_empty() {
            return Err(ServiceError::invalid_request("password is required"));
        }

        let hash = hash_password_blocking(password.to_string()).await?;
        let ctx = CallContext::new(&self.policy, cancel);

        let existing = match self.ledger.create_account(ctx, username, &hash).await {
            Ok(AccountCreation::Created(_)) => None,
            Ok(AccountCreation::AlreadyExists(account)) => Some(account),
            Err(e) => {
                error!("Failed to create account {}: {}", username, e);
                return Err(ServiceError::internal(e.to_string()));
            }
        };

        if let Some(account) = existing {
            let matches =
                verify_password_blocking(password.to_string(), account.password_hash).await?;

            if !matches {
                warn!("Wrong password for existing account {}", username);
                return Err(ServiceError::WrongCredentials);
            }

            // An insert applied behind a lost reply leaves the account without a balance.
            if let Err(e) = self.ledger.get_balance(ctx, username).await {
                error!("Account {} logged in without a usable balance: {}", username, e);
                return Err(ServiceError::internal(e.to_string()));
            }

            info!("Account {} logged in", username);
            return Ok(Registration::LoggedIn);
        }

        if let Err(e) = self.ledger.create_balance(ctx, username).await {
            // The account row stays; it is not re-created on the next call.
            error!("Account {} created without a balance: {}", username, e);
            return Err(ServiceError::internal(e.to_string()));
        }

        info!(
            "Registered account {} with {} coins",
            username,
            self.ledger.initial_balance()
        );
        Ok(Registration::Created)
    }
}
