use std::{collections::HashMap, str::FromStr, sync::Arc};

use chain_gateway_domain::{services::telemetry::TelemetryGuard, Chain};
use chain_gateway_scanner::Scanner;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    scanners: Arc<HashMap<Chain, Scanner>>,
    telemetry: TelemetryGuard,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        scanners: impl IntoIterator<Item = Scanner>,
        telemetry: TelemetryGuard,
        shutdown: CancellationToken,
    ) -> Self {
        let scanners = scanners
            .into_iter()
            .map(|scanner| (scanner.chain(), scanner))
            .collect();
        Self {
            scanners: Arc::new(scanners),
            telemetry,
            shutdown,
        }
    }

    /// Resolves a path segment such as `ethereum` to a configured scanner.
    pub fn scanner_for(&self, raw_chain: &str) -> Option<&Scanner> {
        let chain = Chain::from_str(raw_chain).ok()?;
        self.scanners.get(&chain)
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.scanners.keys().copied()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    /// Process-wide token; every scan runs under a child of it.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}
