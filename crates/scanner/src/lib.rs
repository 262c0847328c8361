//! Concurrent block-range scanner. The API process embeds [`Scanner`]
//! directly; the `scan` binary in `main.rs` runs a single job from the
//! environment.

pub mod lookup;
pub mod pipeline;
pub mod rpc;
pub mod worker;

pub use lookup::{lookup_balance, lookup_balances, lookup_block, LookupError, MAX_BALANCE_BATCH};
pub use rpc::{build_rpc_source, BitcoinRpcSource, EthereumRpcSource, JsonRpcClient};
pub use worker::{ScanError, ScanPhase, ScanRequest, Scanner};
