use thiserror::Error;

use ci_codec::Muid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no candidate destination is available for {0}")]
    DestinationUnresolved(Muid),
    #[error("send strategy is `learned` but no destination is cached for {0}")]
    NoLearnedDestination(Muid),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
