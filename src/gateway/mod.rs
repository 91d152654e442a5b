//! Remote data gateway: the hosted backend's query, mutate, subscribe and
//! procedure APIs, seen through one narrow trait.
//!
//! Flows take the gateway as an explicit dependency (`Arc<G>`), so tests can
//! substitute a recording double and binaries the [`rest::RestGateway`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod feed;
pub mod rest;

pub use feed::{ChangeEvent, ChangeFeed, FeedSender};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rate limited by backend: {0}")]
    RateLimited(String),
    #[error("no matching row")]
    NotFound,
    #[error("expected a single row, got {0}")]
    MultipleRows(usize),
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
    #[error("change feed closed")]
    FeedClosed,
}

/// Row predicate sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    Gte { column: String, value: Value },
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gte {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::Gte { column, .. } => column,
        }
    }

    /// Evaluate the predicate against a JSON row. Strings compare
    /// lexicographically, which is correct for RFC 3339 timestamps.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq { column, value } => row.get(column) == Some(value),
            Filter::Gte { column, value } => match (row.get(column), value) {
                (Some(Value::Number(a)), Value::Number(b)) => {
                    a.as_f64().unwrap_or(f64::NAN) >= b.as_f64().unwrap_or(f64::NAN)
                }
                (Some(Value::String(a)), Value::String(b)) => a.as_str() >= b.as_str(),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Every call is a suspension point; none of them are cancelled when the
/// caller goes away.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn query(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Exactly one row: zero rows is [`GatewayError::NotFound`], more than one
    /// is [`GatewayError::MultipleRows`].
    async fn query_one(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
    ) -> Result<Value, GatewayError>;

    async fn mutate(&self, table: &str, filters: &[Filter], patch: Value)
        -> Result<(), GatewayError>;

    async fn insert(&self, table: &str, record: Value) -> Result<(), GatewayError>;

    /// Open a change feed for rows matching `filter`. See [`ChangeFeed`] for
    /// the delivery contract.
    async fn subscribe(&self, table: &str, filter: Filter) -> Result<ChangeFeed, GatewayError>;

    async fn invoke_procedure(&self, name: &str, params: Value) -> Result<Value, GatewayError>;
}

/// Enforce the single-row contract on a list result.
pub fn single_row(mut rows: Vec<Value>) -> Result<Value, GatewayError> {
    match rows.len() {
        0 => Err(GatewayError::NotFound),
        1 => Ok(rows.remove(0)),
        n => Err(GatewayError::MultipleRows(n)),
    }
}
