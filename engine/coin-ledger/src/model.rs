//! Ledger data model and read models returned to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registered identity
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
}

/// Result of inserting an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCreation {
    /// The row was inserted
    Created(Account),
    /// The username was taken; carries the stored row
    AlreadyExists(Account),
}

/// A purchasable merch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogItem {
    pub item_type: String,
    pub price: i64,
}

/// Running count of one item owned by one user
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InventoryRecord {
    pub username: String,
    pub item_type: String,
    pub quantity: i64,
}

/// Which side of a transfer a history record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Direction::Sent),
            "received" => Ok(Direction::Received),
            other => Err(format!("unknown history direction: {other}")),
        }
    }
}

/// One side of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub username: String,
    pub counterparty: String,
    pub direction: Direction,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// History row to append inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryRecord {
    pub username: String,
    pub counterparty: String,
    pub direction: Direction,
    pub amount: i64,
}

impl NewHistoryRecord {
    pub fn sent(from: &str, to: &str, amount: i64) -> Self {
        Self {
            username: from.to_string(),
            counterparty: to.to_string(),
            direction: Direction::Sent,
            amount,
        }
    }

    pub fn received(to: &str, from: &str, amount: i64) -> Self {
        Self {
            username: to.to_string(),
            counterparty: from.to_string(),
            direction: Direction::Received,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinsReceived {
    pub from_user: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinsSent {
    pub to_user: String,
    pub amount: i64,
}

/// A user's transfer history, split by direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinHistory {
    pub received: Vec<CoinsReceived>,
    pub sent: Vec<CoinsSent>,
}

impl CoinHistory {
    /// Split raw history rows by direction, preserving order.
    pub fn from_records(records: impl IntoIterator<Item = HistoryRecord>) -> Self {
        let mut history = Self::default();
        for record in records {
            match record.direction {
                Direction::Sent => history
                    .sent
                    .push(CoinsSent { to_user: record.counterparty, amount: record.amount }),
                Direction::Received => history
                    .received
                    .push(CoinsReceived { from_user: record.counterparty, amount: record.amount }),
            }
        }
        history
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub quantity: i64,
}

impl From<InventoryRecord> for InventoryItem {
    fn from(record: InventoryRecord) -> Self {
        Self { item_type: record.item_type, quantity: record.quantity }
    }
}

/// Everything `GET /api/info` returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub coins: i64,
    pub inventory: Vec<InventoryItem>,
    pub coin_history: CoinHistory,
}
