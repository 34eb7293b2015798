//! Coin Shop Service Library
//!
//! HTTP front end for the coin ledger: configuration loading, logging setup,
//! bearer-token auth, the REST routes and graceful shutdown handling.

use anyhow::{Context, Result};

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod signals;

pub use api::{create_routes, AppState};
pub use auth::TokenIssuer;
pub use config::ServiceConfig;
pub use error::ApiError;
pub use logging::initialize_logging;
pub use signals::setup_signal_handlers;

/// Load configuration from `.env` and environment variables
pub fn load_configuration() -> Result<ServiceConfig> {
    config::load_config().context("Failed to load service configuration")
}
