//! Error types for the mempool.
use thiserror::Error;

/// Result alias for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")]
    Duplicate(String),
    #[error("conflicts with in-pool tx {existing} on outpoint {outpoint}")]
    Conflict { existing: String, outpoint: String },
    #[error("too many unconfirmed ancestors [limit: {limit}]")]
    AncestorCount { limit: u64 },
    #[error("exceeds ancestor size limit [limit: {limit} bytes]")]
    AncestorSize { limit: u64 },
    #[error("too many descendants for tx {ancestor} [limit: {limit}]")]
    DescendantCount { ancestor: String, limit: u64 },
    #[error("exceeds descendant size limit for tx {ancestor} [limit: {limit} bytes]")]
    DescendantSize { ancestor: String, limit: u64 },
    #[error("parent {0} not found in pool")]
    MissingParent(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl MempoolError {
    /// Whether this failure is an ancestor/descendant chain-limit rejection.
    ///
    /// Relay reports all four limit violations under one umbrella, so peers
    /// can retry once the chain shrinks rather than treating the
    /// transaction as invalid.
    pub fn is_chain_limit(&self) -> bool {
        matches!(
            self,
            Self::AncestorCount { .. }
                | Self::AncestorSize { .. }
                | Self::DescendantCount { .. }
                | Self::DescendantSize { .. }
        )
    }
}
