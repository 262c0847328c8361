//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use strum::IntoEnumIterator;
use thiserror::Error;

use crate::model::{BlockHeight, Chain};

pub const DEFAULT_SCAN_CONCURRENCY: usize = 16;
pub const DEFAULT_SCAN_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Connection details for one node endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    chain: Chain,
    rpc_url: String,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    request_timeout: Duration,
}

impl NodeConfig {
    pub fn new(chain: Chain, rpc_url: impl Into<String>) -> Self {
        Self {
            chain,
            rpc_url: rpc_url.into(),
            rpc_user: None,
            rpc_password: None,
            request_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.rpc_user = Some(user.into());
        self.rpc_password = password;
        self
    }

    /// Reads `<CHAIN>_RPC_*` variables. Returns `Ok(None)` when the chain has
    /// no `<CHAIN>_RPC_URL`, i.e. it is not enabled.
    pub fn load_from_env(chain: Chain) -> Result<Option<Self>, ConfigError> {
        hydrate_env_file()?;

        let prefix = chain.env_prefix();
        let Some(rpc_url) = get_optional_var(&format!("{prefix}_RPC_URL")) else {
            return Ok(None);
        };
        let timeout_key = format!("{prefix}_RPC_TIMEOUT_SECS");
        let timeout_secs = get_optional_var(&timeout_key)
            .map(|raw| parse_number::<u64>(&timeout_key, &raw))
            .transpose()?
            .unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: timeout_key,
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Some(Self {
            chain,
            rpc_url,
            rpc_user: get_optional_var(&format!("{prefix}_RPC_USER")),
            rpc_password: get_optional_var(&format!("{prefix}_RPC_PASSWORD")),
            request_timeout: Duration::from_secs(timeout_secs),
        }))
    }

    /// Like [`NodeConfig::load_from_env`] but the chain must be configured.
    pub fn require_from_env(chain: Chain) -> Result<Self, ConfigError> {
        Self::load_from_env(chain)?.ok_or_else(|| ConfigError::MissingVar {
            key: format!("{}_RPC_URL", chain.env_prefix()),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn rpc_user(&self) -> Option<&str> {
        self.rpc_user.as_deref()
    }

    pub fn rpc_password(&self) -> Option<&str> {
        self.rpc_password.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Bounds applied to every scan: worker count, height queue depth and an
/// optional wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    concurrency: usize,
    queue_capacity: usize,
    deadline: Option<Duration>,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_SCAN_CONCURRENCY,
            queue_capacity: DEFAULT_SCAN_QUEUE_CAPACITY,
            deadline: None,
        }
    }
}

impl ScanLimits {
    /// Zero values are clamped to one.
    pub fn new(concurrency: usize, queue_capacity: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            queue_capacity: queue_capacity.max(1),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let concurrency = get_positive_var("SCAN_CONCURRENCY")?.unwrap_or(DEFAULT_SCAN_CONCURRENCY);
        let queue_capacity =
            get_positive_var("SCAN_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_SCAN_QUEUE_CAPACITY);
        let deadline = get_positive_var::<u64>("SCAN_DEADLINE_SECS")?.map(Duration::from_secs);

        Ok(Self {
            concurrency,
            queue_capacity,
            deadline,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// HTTP API configuration: listeners plus every enabled node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    api_bind_address: String,
    internal_bind_address: Option<String>,
    nodes: Vec<NodeConfig>,
    limits: ScanLimits,
}

impl ApiConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let mut nodes = Vec::new();
        for chain in Chain::iter() {
            if let Some(node) = NodeConfig::load_from_env(chain)? {
                nodes.push(node);
            }
        }
        if nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        Ok(Self {
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            nodes,
            limits: ScanLimits::load_from_env()?,
        })
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some()
    }

    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    pub fn limits(&self) -> ScanLimits {
        self.limits
    }
}

/// One-off job for the `scan` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJobConfig {
    node: NodeConfig,
    start_height: BlockHeight,
    end_height: BlockHeight,
    threshold: Option<String>,
    limits: ScanLimits,
}

impl ScanJobConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let raw_chain = get_required_var("SCAN_CHAIN")?;
        let chain = Chain::from_str(&raw_chain).map_err(|_| ConfigError::InvalidValue {
            key: "SCAN_CHAIN".into(),
            reason: format!("unknown chain `{raw_chain}`"),
        })?;
        let start_height = parse_number("SCAN_START_HEIGHT", &get_required_var("SCAN_START_HEIGHT")?)?;
        let end_height = parse_number("SCAN_END_HEIGHT", &get_required_var("SCAN_END_HEIGHT")?)?;

        Ok(Self {
            node: NodeConfig::require_from_env(chain)?,
            start_height,
            end_height,
            threshold: get_optional_var("SCAN_THRESHOLD"),
            limits: ScanLimits::load_from_env()?,
        })
    }

    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    pub fn start_height(&self) -> BlockHeight {
        self.start_height
    }

    pub fn end_height(&self) -> BlockHeight {
        self.end_height
    }

    /// Major-unit threshold as written by the operator, if any.
    pub fn threshold(&self) -> Option<&str> {
        self.threshold.as_deref()
    }

    pub fn limits(&self) -> ScanLimits {
        self.limits
    }
}

fn get_required_var(key: &str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or_else(|| ConfigError::MissingVar {
        key: key.to_string(),
    })
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    raw.parse().map_err(|source| ConfigError::InvalidNumber {
        key: key.to_string(),
        source,
    })
}

fn get_positive_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError> + PartialEq + Default,
{
    let Some(raw) = get_optional_var(key) else {
        return Ok(None);
    };
    let value = parse_number::<T>(key, &raw)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Some(value))
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("CHAIN_GATEWAY_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: String },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("no node configured; set at least one <CHAIN>_RPC_URL")]
    NoNodes,
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const NODE_VARS: &[&str] = &[
        "ETHEREUM_RPC_URL",
        "ETHEREUM_RPC_USER",
        "ETHEREUM_RPC_PASSWORD",
        "ETHEREUM_RPC_TIMEOUT_SECS",
        "BITCOIN_RPC_URL",
        "BITCOIN_RPC_USER",
        "BITCOIN_RPC_PASSWORD",
        "BITCOIN_RPC_TIMEOUT_SECS",
        "LITECOIN_RPC_URL",
        "DOGECOIN_RPC_URL",
        "SCAN_CONCURRENCY",
        "SCAN_QUEUE_CAPACITY",
        "SCAN_DEADLINE_SECS",
        "API_INTERNAL_BIND_ADDRESS",
        "SCAN_THRESHOLD",
    ];

    fn set_env() {
        env::set_var("CHAIN_GATEWAY_SKIP_DOTENV", "1");
        for key in NODE_VARS {
            env::remove_var(key);
        }
        env::set_var("API_BIND_ADDRESS", "127.0.0.1:8090");
        env::set_var("ETHEREUM_RPC_URL", "http://localhost:8545");
        env::set_var("SCAN_CHAIN", "ethereum");
        env::set_var("SCAN_START_HEIGHT", "100");
        env::set_var("SCAN_END_HEIGHT", "102");
    }

    #[test]
    fn api_config_collects_enabled_nodes() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        env::set_var("BITCOIN_RPC_URL", " http://127.0.0.1:8332 ");
        env::set_var("BITCOIN_RPC_USER", "rpcuser");
        env::set_var("BITCOIN_RPC_PASSWORD", "secret");
        env::set_var("BITCOIN_RPC_TIMEOUT_SECS", "5");

        let config = ApiConfig::load_from_env().expect("api config loads");
        assert_eq!(config.api_bind_address(), "127.0.0.1:8090");
        assert!(!config.has_internal_listener());
        let chains: Vec<Chain> = config.nodes().iter().map(NodeConfig::chain).collect();
        assert_eq!(chains, vec![Chain::Ethereum, Chain::Bitcoin]);

        let bitcoin = &config.nodes()[1];
        assert_eq!(bitcoin.rpc_url(), "http://127.0.0.1:8332");
        assert_eq!(bitcoin.rpc_user(), Some("rpcuser"));
        assert_eq!(bitcoin.rpc_password(), Some("secret"));
        assert_eq!(bitcoin.request_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.nodes()[0].request_timeout(),
            Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)
        );

        set_env();
    }

    #[test]
    fn api_config_requires_a_node() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        env::set_var("ETHEREUM_RPC_URL", "   ");

        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::NoNodes));

        set_env();
    }

    #[test]
    fn scan_limits_default_and_override() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        assert_eq!(ScanLimits::load_from_env().unwrap(), ScanLimits::default());

        env::set_var("SCAN_CONCURRENCY", "4");
        env::set_var("SCAN_QUEUE_CAPACITY", "8");
        env::set_var("SCAN_DEADLINE_SECS", "90");
        let limits = ScanLimits::load_from_env().unwrap();
        assert_eq!(limits.concurrency(), 4);
        assert_eq!(limits.queue_capacity(), 8);
        assert_eq!(limits.deadline(), Some(Duration::from_secs(90)));

        set_env();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        env::set_var("SCAN_CONCURRENCY", "0");

        let err = ScanLimits::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SCAN_CONCURRENCY"));

        env::set_var("SCAN_CONCURRENCY", "many");
        let err = ScanLimits::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { ref key, .. } if key == "SCAN_CONCURRENCY"));

        set_env();
    }

    #[test]
    fn scan_job_reads_range_and_threshold() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        env::set_var("SCAN_THRESHOLD", "2.5");

        let job = ScanJobConfig::load_from_env().expect("job loads");
        assert_eq!(job.node().chain(), Chain::Ethereum);
        assert_eq!(job.start_height(), 100);
        assert_eq!(job.end_height(), 102);
        assert_eq!(job.threshold(), Some("2.5"));

        set_env();
    }

    #[test]
    fn scan_job_requires_the_chosen_node() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        env::set_var("SCAN_CHAIN", "dogecoin");

        let err = ScanJobConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { ref key } if key == "DOGECOIN_RPC_URL"));

        env::set_var("SCAN_CHAIN", "monero");
        let err = ScanJobConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SCAN_CHAIN"));

        set_env();
    }
}
