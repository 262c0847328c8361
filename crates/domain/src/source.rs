use async_trait::async_trait;
use primitive_types::U256;
use thiserror::Error;

use crate::model::{Address, Block, BlockHeight};

/// Errors reported by a [`BlockSource`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("node returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed node response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::NotFound(_) => "not_found",
            SourceError::Transient(_) => "transient",
            SourceError::Rpc { .. } => "rpc",
            SourceError::InvalidRequest(_) => "invalid_request",
            SourceError::Decode(_) => "decode",
        }
    }
}

/// Read-only view of a node that the scanner traverses.
///
/// Implementations are shared across concurrent workers behind an `Arc` and
/// must be safe to call from many tasks at once. Every call is idempotent and
/// nothing is retried by the caller.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch_block(&self, height: BlockHeight) -> Result<Block, SourceError>;

    /// Current balance in minor units at the node's latest state.
    async fn fetch_balance(&self, address: &Address) -> Result<U256, SourceError>;

    async fn chain_height(&self) -> Result<BlockHeight, SourceError>;
}
