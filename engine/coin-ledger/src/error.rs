//! Error types for the coin ledger
//!
//! Three layers, each with its own enum:
//!
//! - [`StorageError`]: what a backend reports (connectivity, constraints, ...)
//! - [`LedgerError`]: outcomes of a Ledger Store operation
//! - [`ServiceError`]: what callers of the engines see

use thiserror::Error;

/// Result type for backend operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for Ledger Store operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Classification used by the retry policy.
pub trait Retryable {
    /// Whether retrying the same operation unchanged may succeed.
    fn is_transient(&self) -> bool;
}

/// Errors reported by a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage timeout: {0}")]
    Timeout(String),

    /// Serialization failure or deadlock; the transaction was rolled back.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    /// The connection failed while COMMIT was in flight.
    #[error("Commit outcome unknown: {0}")]
    CommitOutcomeUnknown(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Conflict(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let database_error = match &err {
            sqlx::Error::Database(db) => {
                Some((db.code().map(|code| code.into_owned()), db.message().to_string()))
            }
            _ => None,
        };

        if let Some((code, message)) = database_error {
            return match code.as_deref() {
                Some("23505") => Self::UniqueViolation(message),
                Some(code) if code.starts_with("23") => Self::ConstraintViolation(message),
                Some("40001") | Some("40P01") => Self::Conflict(message),
                // connection_exception class and admin/crash shutdowns
                Some(code) if code.starts_with("08") => Self::Connection(message),
                Some("57P01") | Some("57P02") | Some("57P03") => Self::Connection(message),
                Some("57014") => Self::Timeout(message),
                _ => Self::Database(err),
            };
        }

        match err {
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::Protocol(msg) => Self::Connection(msg),
            sqlx::Error::WorkerCrashed => Self::Connection("connection worker crashed".to_string()),
            sqlx::Error::PoolTimedOut => Self::Timeout("timed out acquiring a connection".to_string()),
            other => Self::Database(other),
        }
    }
}

/// Outcomes of Ledger Store operations other than success
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No such user: {0}")]
    NoSuchUser(String),

    #[error("No such item: {0}")]
    NoSuchItem(String),

    /// The debit would have left the balance negative; the transaction was rolled back.
    #[error("Negative balance for {username}: {balance} after debit of {debit}")]
    NegativeBalance { username: String, balance: i64, debit: i64 },

    #[error("Account vanished after conflict: {0}")]
    MissingAccount(String),

    #[error("Balance row missing for account: {0}")]
    MissingBalance(String),

    #[error("Balance already exists for account: {0}")]
    BalanceExists(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Retryable for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Caller-visible errors of the registration, transfer and purchase engines
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Wrong username/password")]
    WrongCredentials,

    #[error("No such user to send coins: {0}")]
    NoSuchUser(String),

    #[error("No such item: {0}")]
    NoSuchItem(String),

    #[error("Not enough coins")]
    InsufficientFunds,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Create a new invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
