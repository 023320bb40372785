//! Top-level error type: wraps each subsystem's error with the same
//! condition-based retry queries the transaction engine exposes.

use std::time::Duration;

use thiserror::Error;

use ci_transaction::TransactionError;
use ci_transport::TransportError;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("session is not running")]
    NotRunning,
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Transaction(e) => e.is_retryable(),
            CoreError::Transport(e) => e.is_retryable(),
            CoreError::NotRunning => false,
        }
    }

    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            CoreError::Transaction(e) => e.suggested_retry_delay(),
            CoreError::Transport(e) if e.is_retryable() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}
