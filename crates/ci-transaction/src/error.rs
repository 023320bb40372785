//! Error taxonomy for the transaction engine, following the condition-based
//! classification (not by name) used throughout this lineage.

use std::time::Duration;

use thiserror::Error;

use ci_chunk::{ChunkError, PoolError};
use ci_route::ResolveError;
use ci_transport::TransportError;

#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    #[error("no reply received within the transaction deadline")]
    Timeout,
    #[error("transaction cancelled by caller")]
    Cancelled,
    #[error("device returned NAK (status {status}): {details:?}")]
    Nak { status: u16, details: Option<String> },
    #[error("all 128 request IDs are in use or cooling down")]
    Exhausted,
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("could not parse reply: {0}")]
    Malformed(String),
    #[error("payload rejected by validator: {0}")]
    PayloadValidation(String),
    #[error("no destination available: {0}")]
    DestinationUnresolved(#[from] ResolveError),
    #[error("session is not running")]
    NotRunning,
}

impl From<PoolError> for TransactionError {
    fn from(_: PoolError) -> Self {
        TransactionError::Exhausted
    }
}

impl From<ChunkError> for TransactionError {
    fn from(e: ChunkError) -> Self {
        TransactionError::Malformed(e.to_string())
    }
}

impl TransactionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Timeout => true,
            TransactionError::Cancelled => false,
            TransactionError::Nak { status, .. } => *status == 429 || *status == 503,
            TransactionError::Exhausted => true,
            TransactionError::Transport(e) => e.is_retryable(),
            TransactionError::Malformed(_) => false,
            TransactionError::PayloadValidation(_) => false,
            TransactionError::DestinationUnresolved(_) => false,
            TransactionError::NotRunning => false,
        }
    }

    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            TransactionError::Timeout => Some(Duration::from_secs(1)),
            TransactionError::Nak { .. } if self.is_retryable() => Some(Duration::from_secs(2)),
            TransactionError::Exhausted => Some(Duration::from_millis(500)),
            TransactionError::Transport(e) if e.is_retryable() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}
