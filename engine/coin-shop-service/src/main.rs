//! Coin Shop Service
//!
//! Main entry point: loads configuration, connects to Postgres, applies the
//! schema migrations and serves the REST API until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use coin_ledger::{LedgerService, PgBackend};
use coin_shop_service::config::{parse_address, validate_config};
use coin_shop_service::{
    create_routes, initialize_logging, load_configuration, setup_signal_handlers, AppState,
    ServiceConfig, TokenIssuer,
};

/// Command line overrides applied on top of the environment
#[derive(Debug, Parser)]
#[command(name = "coin-shop", version, about = "Coin shop HTTP service")]
struct Cli {
    /// Listen address, e.g. 0.0.0.0:8080 or :8080
    #[arg(short = 'a', long)]
    run_address: Option<String>,

    /// Postgres connection URI
    #[arg(short = 'd', long)]
    database_uri: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long)]
    log_format: Option<String>,

    /// Do not apply schema migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

impl Cli {
    /// Apply the overrides on top of `config` and re-validate it
    fn apply(self, config: &mut ServiceConfig) -> Result<()> {
        if let Some(address) = &self.run_address {
            config.server.run_address = parse_address(address)?;
        }
        if let Some(uri) = self.database_uri {
            config.ledger.database.url = uri;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        validate_config(config).context("Invalid command line override")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration()?;
    let skip_migrations = cli.skip_migrations;
    cli.apply(&mut config)?;

    initialize_logging(&config.logging)?;

    info!("Starting Coin Shop Service v{}", env!("CARGO_PKG_VERSION"));

    let backend =
        PgBackend::connect(&config.ledger.database).await.context("Failed to connect to database")?;
    info!("Connected to database");

    if skip_migrations {
        info!("Skipping schema migrations");
    } else {
        backend.migrate().await.context("Failed to apply migrations")?;
        info!("Schema migrations applied");
    }

    let service = Arc::new(LedgerService::from_config(backend, &config.ledger));
    let tokens = TokenIssuer::from_config(&config.auth);

    let shutdown = setup_signal_handlers()?;
    info!("Signal handlers configured");

    let state = AppState::new(service, tokens, config.server.request_timeout, shutdown.clone());
    let routes = create_routes(state);

    let (address, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.server.run_address, async move {
            shutdown.cancelled().await;
            info!("Shutdown signal received, draining in-flight requests");
        })
        .context("Failed to bind listen address")?;

    info!("Coin Shop Service listening on {}", address);
    server.await;

    info!("Coin Shop Service shutdown complete");
    Ok(())
}
