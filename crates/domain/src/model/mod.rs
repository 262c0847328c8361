//! Data structures shared by the scanner, the node clients and the HTTP
//! surface.

mod amount;
mod chain;

use std::fmt;
use std::iter::Rev;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use amount::{format_major_units, parse_major_units, AmountError};
pub use chain::{Chain, ChainFamily};

/// Position of a block in the chain.
pub type BlockHeight = u64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid block range: start {start} is greater than end {end}")]
pub struct InvalidRangeError {
    pub start: BlockHeight,
    pub end: BlockHeight,
}

/// Closed interval `[start, end]` of heights, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    start: BlockHeight,
    end: BlockHeight,
}

impl BlockRange {
    pub fn new(start: BlockHeight, end: BlockHeight) -> Result<Self, InvalidRangeError> {
        if start > end {
            return Err(InvalidRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> BlockHeight {
        self.start
    }

    pub fn end(&self) -> BlockHeight {
        self.end
    }

    /// Number of heights covered, saturating for the full `u64` domain.
    pub fn block_count(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Lazily yields every height from `end` down to `start`.
    pub fn descending(&self) -> Rev<RangeInclusive<BlockHeight>> {
        (self.start..=self.end).rev()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("address is empty")]
    Empty,
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address body must be {expected} characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("address contains non-hex characters")]
    NonHex,
    #[error("address contains whitespace or non-ascii characters")]
    InvalidCharacters,
}

/// Recipient identifier in the chain's canonical textual form.
///
/// Equality is exact string equality, so values must be canonicalized (see
/// [`Chain::canonical_address`]) before they are compared or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub txid: String,
    /// Zero or one entry on account chains, one per addressed output on UTXO
    /// chains.
    pub recipients: Vec<Address>,
}

impl Transaction {
    pub fn new(txid: impl Into<String>, recipients: Vec<Address>) -> Self {
        Self {
            txid: txid.into(),
            recipients,
        }
    }

    /// Account-model transaction; `None` for contract creation.
    pub fn with_recipient(txid: impl Into<String>, recipient: Option<Address>) -> Self {
        Self::new(txid, recipient.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub height: BlockHeight,
    pub transactions: Vec<Transaction>,
}

/// An address that qualified during a scan, with its major-unit balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: Address,
    pub balance: String,
}

/// Outcome of a completed scan. `addresses` carries no meaningful order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub chain: Chain,
    pub addresses: Vec<AddressBalance>,
    pub skipped_heights: Vec<BlockHeight>,
    pub blocks_fetched: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn skipped_blocks(&self) -> usize {
        self.skipped_heights.len()
    }
}
