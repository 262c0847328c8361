//! Wire shapes exchanged with node JSON-RPC endpoints. Only the fields the
//! scanner reads are modelled; everything else in a node response is ignored.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: T,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// `eth_getBlockByNumber` with full transaction objects.
#[derive(Debug, Deserialize)]
pub struct EthBlock {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub transactions: Vec<EthTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct EthTransaction {
    pub hash: String,
    /// `null` for contract creation.
    #[serde(default)]
    pub to: Option<String>,
}

/// `getblock <hash> 2`.
#[derive(Debug, Deserialize)]
pub struct BtcBlock {
    pub hash: String,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub tx: Vec<BtcTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct BtcTransaction {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<BtcOutput>,
}

#[derive(Debug, Deserialize)]
pub struct BtcOutput {
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: BtcScriptPubKey,
}

#[derive(Debug, Default, Deserialize)]
pub struct BtcScriptPubKey {
    /// Present on current Bitcoin Core releases.
    #[serde(default)]
    pub address: Option<String>,
    /// Older releases and most forks (Litecoin, Dogecoin).
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl BtcScriptPubKey {
    pub fn into_addresses(self) -> impl Iterator<Item = String> {
        self.address
            .into_iter()
            .chain(self.addresses.unwrap_or_default())
    }
}

/// One entry of `listunspent`. Amounts arrive as JSON numbers in whole coins
/// and are kept as raw text so no digit passes through a float.
#[derive(Debug, Deserialize)]
pub struct BtcUnspent {
    pub amount: Box<RawValue>,
}

impl BtcUnspent {
    /// Amount text as the node wrote it, without quotes if it was a string.
    pub fn amount_text(&self) -> &str {
        let raw = self.amount.get().trim();
        raw.strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
            .unwrap_or(raw)
    }
}
