//! Typed request model: one enum variant per node method, validated before
//! anything goes on the wire.

use chain_gateway_domain::{Address, BlockHeight, Chain, SourceError};
use serde_json::{json, Value};

/// A request that knows its JSON-RPC method name and parameter list.
pub trait RpcCall {
    fn method(&self) -> &'static str;

    fn params(&self) -> Value;

    fn validate(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthereumCall {
    BlockNumber,
    BlockByNumber {
        height: BlockHeight,
        full_transactions: bool,
    },
    /// Balance at the node's `latest` state.
    GetBalance { address: Address },
}

impl RpcCall for EthereumCall {
    fn method(&self) -> &'static str {
        match self {
            EthereumCall::BlockNumber => "eth_blockNumber",
            EthereumCall::BlockByNumber { .. } => "eth_getBlockByNumber",
            EthereumCall::GetBalance { .. } => "eth_getBalance",
        }
    }

    fn params(&self) -> Value {
        match self {
            EthereumCall::BlockNumber => json!([]),
            EthereumCall::BlockByNumber {
                height,
                full_transactions,
            } => json!([format!("{height:#x}"), full_transactions]),
            EthereumCall::GetBalance { address } => json!([address.as_str(), "latest"]),
        }
    }

    fn validate(&self) -> Result<(), SourceError> {
        match self {
            EthereumCall::GetBalance { address } => Chain::Ethereum
                .canonical_address(address.as_str())
                .map(|_| ())
                .map_err(|err| SourceError::InvalidRequest(format!("{address}: {err}"))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitcoinCall {
    GetBlockCount,
    GetBlockHash {
        height: BlockHeight,
    },
    GetBlock {
        hash: String,
        verbosity: u8,
    },
    ListUnspent {
        min_conf: u32,
        max_conf: u32,
        address: Address,
    },
}

impl RpcCall for BitcoinCall {
    fn method(&self) -> &'static str {
        match self {
            BitcoinCall::GetBlockCount => "getblockcount",
            BitcoinCall::GetBlockHash { .. } => "getblockhash",
            BitcoinCall::GetBlock { .. } => "getblock",
            BitcoinCall::ListUnspent { .. } => "listunspent",
        }
    }

    fn params(&self) -> Value {
        match self {
            BitcoinCall::GetBlockCount => json!([]),
            BitcoinCall::GetBlockHash { height } => json!([height]),
            BitcoinCall::GetBlock { hash, verbosity } => json!([hash, verbosity]),
            BitcoinCall::ListUnspent {
                min_conf,
                max_conf,
                address,
            } => json!([min_conf, max_conf, [address.as_str()]]),
        }
    }

    fn validate(&self) -> Result<(), SourceError> {
        match self {
            BitcoinCall::GetBlock { hash, verbosity } => {
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(SourceError::InvalidRequest(format!(
                        "block hash `{hash}` must be 64 hex characters"
                    )));
                }
                if *verbosity > 2 {
                    return Err(SourceError::InvalidRequest(format!(
                        "getblock verbosity {verbosity} is out of range"
                    )));
                }
                Ok(())
            }
            BitcoinCall::ListUnspent {
                min_conf,
                max_conf,
                address,
            } => {
                if min_conf > max_conf {
                    return Err(SourceError::InvalidRequest(format!(
                        "min_conf {min_conf} exceeds max_conf {max_conf}"
                    )));
                }
                if address.as_str().trim().is_empty() {
                    return Err(SourceError::InvalidRequest("empty address".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
