//! Service configuration management

use anyhow::{anyhow, Context, Result};
use coin_ledger::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Token signing settings
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Ledger and database configuration
    pub ledger: LedgerConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on
    pub run_address: SocketAddr,

    /// Budget for one request, including storage retries
    pub request_timeout: Duration,
}

/// Token signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub secret_key: String,

    /// Lifetime of an issued token
    pub token_ttl: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            run_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { secret_key: String::new(), token_ttl: Duration::from_secs(24 * 60 * 60) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Load configuration from `.env` and environment variables
pub fn load_config() -> Result<ServiceConfig> {
    dotenv::dotenv().ok();
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Load configuration from an arbitrary key lookup
pub fn load_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ServiceConfig> {
    let mut config = ServiceConfig {
        ledger: LedgerConfig::from_lookup(&lookup).context("Invalid ledger configuration")?,
        ..Default::default()
    };

    apply_overrides(&mut config, &lookup)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_overrides(
    config: &mut ServiceConfig,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(address) = lookup("RUN_ADDRESS") {
        config.server.run_address = parse_address(&address)?;
    }

    if let Some(timeout) = lookup("REQUEST_TIMEOUT_MS") {
        let millis: u64 =
            timeout.parse().with_context(|| format!("Invalid REQUEST_TIMEOUT_MS: {timeout}"))?;
        config.server.request_timeout = Duration::from_millis(millis);
    }

    if let Some(secret) = lookup("SECRET_KEY") {
        config.auth.secret_key = secret;
    }

    if let Some(ttl) = lookup("TOKEN_TTL_SECS") {
        let secs: u64 = ttl.parse().with_context(|| format!("Invalid TOKEN_TTL_SECS: {ttl}"))?;
        config.auth.token_ttl = Duration::from_secs(secs);
    }

    if let Some(level) = lookup("LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Some(format) = lookup("LOG_FORMAT") {
        config.logging.format = format;
    }

    Ok(())
}

/// Accepts `host:port` or a bare `:port`, which binds every interface.
pub fn parse_address(raw: &str) -> Result<SocketAddr> {
    let candidate =
        if raw.starts_with(':') { format!("0.0.0.0{raw}") } else { raw.to_string() };

    candidate.parse().with_context(|| format!("Invalid RUN_ADDRESS: {raw}"))
}

/// Longest accepted token lifetime
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    if config.auth.secret_key.is_empty() {
        return Err(anyhow!("SECRET_KEY must be set"));
    }

    if config.auth.token_ttl.is_zero() {
        return Err(anyhow!("TOKEN_TTL_SECS must be greater than 0"));
    }

    if config.auth.token_ttl > MAX_TOKEN_TTL {
        return Err(anyhow!(
            "TOKEN_TTL_SECS must be at most {}",
            MAX_TOKEN_TTL.as_secs()
        ));
    }

    if config.server.request_timeout.is_zero() {
        return Err(anyhow!("REQUEST_TIMEOUT_MS must be greater than 0"));
    }

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    config.ledger.validate()
}
