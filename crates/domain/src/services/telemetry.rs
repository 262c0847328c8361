use std::{env, net::SocketAddr, sync::Arc};

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Histogram fed once per finished scan, whatever its outcome.
pub const SCAN_DURATION_METRIC: &str = "scanner_scan_duration_seconds";

/// Scans span anything from a handful of blocks to a day of chain history.
pub const DEFAULT_SCAN_DURATION_BUCKETS: [f64; 8] = [0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0];

/// Every counter the scanner and the API emit, with its help text.
const COUNTERS: [(&str, &str); 6] = [
    ("scanner_scans_total", "Finished scans by outcome (done, failed, cancelled)."),
    ("scanner_blocks_total", "Block fetches by result (ok, skipped)."),
    (
        "scanner_addresses_emitted_total",
        "Recipient addresses emitted by block workers before deduplication.",
    ),
    ("scanner_balance_lookups_total", "Balance lookups issued while filtering, by result."),
    ("api_scan_requests_total", "Scan requests served by the HTTP API, by status."),
    (
        "api_lookup_requests_total",
        "Balance and block lookups served by the HTTP API, by route and status.",
    ),
];

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
    scan_duration_buckets: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER`, `<PREFIX>_METRICS_ADDRESS` and
    /// `<PREFIX>_SCAN_DURATION_BUCKETS`. All three are optional.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();
        let optional = |suffix: &str| {
            env::var(format!("{upper}_{suffix}"))
                .ok()
                .filter(|value| !value.trim().is_empty())
        };

        Self {
            log_filter: optional("LOG_FILTER").unwrap_or_else(|| "info".to_string()),
            metrics_address: optional("METRICS_ADDRESS"),
            scan_duration_buckets: optional("SCAN_DURATION_BUCKETS"),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }

    /// Upper bounds for the scan duration histogram, in seconds.
    pub fn scan_duration_buckets(&self) -> Result<Vec<f64>, TelemetryError> {
        match self.scan_duration_buckets.as_deref() {
            Some(raw) => parse_buckets(raw),
            None => Ok(DEFAULT_SCAN_DURATION_BUCKETS.to_vec()),
        }
    }
}

/// Parses a comma separated list of positive bucket bounds. The result is
/// sorted and free of repeats.
pub fn parse_buckets(raw: &str) -> Result<Vec<f64>, TelemetryError> {
    let mut buckets = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let bound: f64 = part
            .parse()
            .map_err(|_| TelemetryError::InvalidBuckets(raw.to_string()))?;
        if !bound.is_finite() || bound <= 0.0 {
            return Err(TelemetryError::InvalidBuckets(raw.to_string()));
        }
        buckets.push(bound);
    }
    if buckets.is_empty() {
        return Err(TelemetryError::InvalidBuckets(raw.to_string()));
    }

    buckets.sort_by(f64::total_cmp);
    buckets.dedup();
    Ok(buckets)
}

#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Installs the tracing subscriber and the Prometheus recorder. Later calls
/// in the same process reuse what the first call installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let buckets = config.scan_duration_buckets()?;
            let mut builder = PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full(SCAN_DURATION_METRIC.to_string()), &buckets)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr =
                    addr.parse().map_err(|err: std::net::AddrParseError| {
                        TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                    })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_metrics();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_metrics() {
    for (name, help) in COUNTERS {
        describe_counter!(name, Unit::Count, help);
    }
    describe_histogram!(
        SCAN_DURATION_METRIC,
        Unit::Seconds,
        "Wall-clock time of a scan from start to its final outcome."
    );
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("invalid histogram buckets `{0}`: expected positive numbers separated by commas")]
    InvalidBuckets(String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{counter, histogram};
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn config_defaults_when_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("CHAIN_GATEWAY_SKIP_DOTENV", "1");
        env::remove_var("TELEMETRY_TEST_LOG_FILTER");
        env::remove_var("TELEMETRY_TEST_METRICS_ADDRESS");
        env::remove_var("TELEMETRY_TEST_SCAN_DURATION_BUCKETS");

        let cfg = TelemetryConfig::from_env("telemetry_test");
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(
            cfg.scan_duration_buckets().unwrap(),
            DEFAULT_SCAN_DURATION_BUCKETS.to_vec()
        );
    }

    #[test]
    fn config_reads_prefixed_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("CHAIN_GATEWAY_SKIP_DOTENV", "1");
        env::set_var("TELEMETRY_TEST_LOG_FILTER", "chain_gateway_scanner=debug");
        env::set_var("TELEMETRY_TEST_METRICS_ADDRESS", "  ");
        env::set_var("TELEMETRY_TEST_SCAN_DURATION_BUCKETS", "30, 2,2");

        let cfg = TelemetryConfig::from_env("TELEMETRY_TEST");
        assert_eq!(cfg.log_filter(), "chain_gateway_scanner=debug");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(cfg.scan_duration_buckets().unwrap(), vec![2.0, 30.0]);

        env::remove_var("TELEMETRY_TEST_LOG_FILTER");
        env::remove_var("TELEMETRY_TEST_METRICS_ADDRESS");
        env::remove_var("TELEMETRY_TEST_SCAN_DURATION_BUCKETS");
    }

    #[test]
    fn bucket_lists_must_be_positive_numbers() {
        assert_eq!(parse_buckets("0.5,,10").unwrap(), vec![0.5, 10.0]);
        for raw in ["", " , ", "1,abc", "0", "-5", "inf", "NaN"] {
            assert!(
                matches!(parse_buckets(raw), Err(TelemetryError::InvalidBuckets(_))),
                "{raw:?} accepted"
            );
        }
    }

    #[test]
    fn rendered_metrics_carry_help_text_and_buckets() {
        let guard = init_telemetry(&TelemetryConfig {
            log_filter: "info".into(),
            metrics_address: None,
            scan_duration_buckets: None,
        })
        .unwrap();

        counter!("scanner_scans_total", "outcome" => "done").increment(1);
        histogram!(SCAN_DURATION_METRIC).record(0.3);

        let text = guard.render_metrics();
        assert!(text.contains("# HELP scanner_scans_total"), "{text}");
        assert!(text.contains("scanner_scan_duration_seconds_bucket"), "{text}");
    }
}
