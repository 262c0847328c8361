//! One-shot scan driven by `SCAN_*` environment variables. Prints the report
//! as JSON on stdout.

use std::io;

use chain_gateway_domain::{
    config::{ConfigError, ScanJobConfig},
    parse_major_units,
    services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
    AmountError, SourceError,
};
use chain_gateway_scanner::{build_rpc_source, ScanError, ScanRequest, Scanner};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
enum ScanCliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("node unavailable: {0}")]
    Source(#[from] SourceError),
    #[error("invalid SCAN_THRESHOLD: {0}")]
    Threshold(#[from] AmountError),
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("failed to encode report: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("[scan] {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn run() -> Result<(), ScanCliError> {
    let job = ScanJobConfig::load_from_env()?;
    init_telemetry(&TelemetryConfig::from_env("SCANNER"))?;

    let chain = job.node().chain();
    let mut request = ScanRequest::new(job.start_height(), job.end_height());
    if let Some(raw) = job.threshold() {
        request = request.with_threshold(parse_major_units(raw, chain.decimals())?);
    }

    let source = build_rpc_source(job.node()).await?;
    let scanner = Scanner::new(chain, source, job.limits());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling scan");
                cancel.cancel();
            }
        })
    };
    let result = scanner.scan(request, cancel).await;
    interrupt.abort();

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
