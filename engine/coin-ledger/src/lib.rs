//! # CoinLedger
//!
//! Transactional balance engine for the coin shop.
//!
//! Users hold an integer coin balance, send coins to each other and spend them
//! on merch. Every mutation runs inside one storage transaction and commits
//! whole or not at all; a balance is never observed below zero. Transient
//! storage failures are retried with bounded exponential backoff.

pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod password;
pub mod purchase;
pub mod registrar;
pub mod retry;
pub mod service;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod integration_tests;

pub use config::{DatabaseConfig, LedgerConfig};
pub use error::{LedgerError, Result, ServiceError, StorageError};
pub use ledger::{CallContext, Ledger};
pub use purchase::PurchaseEngine;
pub use registrar::{AccountRegistrar, Registration};
pub use retry::RetryPolicy;
pub use service::LedgerService;
pub use store::{LedgerBackend, LedgerTx, MemoryBackend, PgBackend};
pub use transfer::TransferEngine;

/// Re-export commonly used types
pub use model::{CoinHistory, InventoryItem, UserInfo};

/// Current version of the CoinLedger
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Coins granted to a new account unless configured otherwise
pub const DEFAULT_INITIAL_BALANCE: i64 = 1000;
