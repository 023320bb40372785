use thiserror::Error;

use crate::EndpointId;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("endpoint {0} is not a known destination")]
    UnknownDestination(EndpointId),
    #[error("endpoint {0} is not a known source")]
    UnknownSource(EndpointId),
    #[error("send to {destination} failed: {reason}")]
    SendFailed {
        destination: EndpointId,
        reason: String,
    },
    #[error("transport has already been shut down")]
    ShutDown,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::SendFailed { .. })
    }
}
