use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chain_gateway_domain::config::NodeConfig;
use chain_gateway_domain::{BlockSource, ChainFamily, SourceError};
use primitive_types::U256;
use serde::de::DeserializeOwned;
use tracing::{info, trace};

mod bitcoin;
mod calls;
mod ethereum;
mod types;

pub use bitcoin::BitcoinRpcSource;
pub use calls::{BitcoinCall, EthereumCall, RpcCall};
pub use ethereum::EthereumRpcSource;
pub use types::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};

/// Minimal JSON-RPC transport over a pooled HTTP client. Safe to share across
/// tasks: `reqwest::Client` is internally reference counted and the request
/// id counter is atomic.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    credentials: Option<(String, Option<String>)>,
    version: &'static str,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: &NodeConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(SourceError::from_source)?;
        let version = match config.chain().family() {
            ChainFamily::Evm => "2.0",
            ChainFamily::Utxo => "1.0",
        };

        Ok(Self {
            http,
            url: config.rpc_url().to_string(),
            credentials: config
                .rpc_user()
                .map(|user| (user.to_string(), config.rpc_password().map(str::to_string))),
            version,
            next_id: AtomicU64::new(1),
        })
    }

    /// Dispatches `call`; a `null` result is treated as a malformed response.
    pub async fn call<R, C>(&self, call: &C) -> Result<R, SourceError>
    where
        R: DeserializeOwned,
        C: RpcCall + Sync,
    {
        self.call_optional(call)
            .await?
            .ok_or_else(|| SourceError::Decode(format!("{} returned null", call.method())))
    }

    /// Dispatches `call`, passing a `null` result through as `None`.
    pub async fn call_optional<R, C>(&self, call: &C) -> Result<Option<R>, SourceError>
    where
        R: DeserializeOwned,
        C: RpcCall + Sync,
    {
        call.validate()?;

        let request = JsonRpcRequest {
            jsonrpc: self.version,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: call.method(),
            params: call.params(),
        };
        trace!(method = request.method, id = request.id, "dispatching rpc call");

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, password.as_deref());
        }
        let response = builder.send().await.map_err(SourceError::from_source)?;
        let status = response.status();
        let body = response.bytes().await.map_err(SourceError::from_source)?;

        decode_envelope(call.method(), status, &body)
    }
}

fn decode_envelope<R>(
    method: &str,
    status: reqwest::StatusCode,
    body: &[u8],
) -> Result<Option<R>, SourceError>
where
    R: DeserializeOwned,
{
    let envelope: JsonRpcResponse<R> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(SourceError::Transient(format!(
                "{method} failed with http status {status}"
            )))
        }
        Err(err) => return Err(SourceError::Decode(format!("{method}: {err}"))),
    };

    if let Some(error) = envelope.error {
        return Err(SourceError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    Ok(envelope.result)
}

/// Parses an Ethereum hex quantity (`"0x1bc16d674ec80000"`).
pub(crate) fn parse_hex_quantity(raw: &str) -> Result<U256, SourceError> {
    let body = raw
        .strip_prefix("0x")
        .ok_or_else(|| SourceError::Decode(format!("quantity `{raw}` lacks 0x prefix")))?;
    if body.is_empty() {
        return Err(SourceError::Decode(format!("empty quantity `{raw}`")));
    }
    U256::from_str_radix(body, 16)
        .map_err(|err| SourceError::Decode(format!("quantity `{raw}`: {err:?}")))
}

/// Opens a node client for `config` and queries the chain tip once. Fails when
/// the node does not answer. The connection pool closes with the last clone.
pub async fn build_rpc_source(config: &NodeConfig) -> Result<Arc<dyn BlockSource>, SourceError> {
    let client = JsonRpcClient::new(config)?;
    let source: Arc<dyn BlockSource> = match config.chain().family() {
        ChainFamily::Evm => Arc::new(EthereumRpcSource::new(client)),
        ChainFamily::Utxo => Arc::new(BitcoinRpcSource::new(config.chain(), client)),
    };

    let tip = source.chain_height().await?;
    info!(chain = %config.chain(), url = config.rpc_url(), tip, "node connected");
    Ok(source)
}
