use std::sync::Arc;
use std::time::{Duration, Instant};

use chain_gateway_domain::{
    config::ScanLimits, Address, BlockHeight, BlockRange, BlockSource, Chain, InvalidRangeError,
    ScanReport, SourceError,
};
use chrono::Utc;
use metrics::{counter, histogram};
use primitive_types::U256;
use strum_macros::AsRefStr;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{
    assemble_report, collect_addresses, filter_balances, produce_heights, run_block_worker,
    WorkerReport,
};

/// Capacity of the worker -> deduplicator channel.
const ADDRESS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
    #[error("concurrency {requested} is outside 1..={max}")]
    InvalidConcurrency { requested: usize, max: usize },
    #[error("balance lookup failed for {address}: {source}")]
    BalanceLookup {
        address: Address,
        #[source]
        source: SourceError,
    },
    #[error("scan cancelled")]
    Cancelled,
    #[error("block worker aborted: {0}")]
    WorkerAborted(String),
}

impl ScanError {
    /// Label used for the `scanner_scans_total` outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            _ => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Enumerating,
    Fetching,
    Deduplicating,
    BalanceChecking,
    Done,
    Failed,
}

/// Parameters of one scan. `threshold` is in minor units; when absent the
/// scanner uses one whole unit of the chain's currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    pub start: BlockHeight,
    pub end: BlockHeight,
    pub threshold: Option<U256>,
    pub concurrency: Option<usize>,
}

impl ScanRequest {
    pub fn new(start: BlockHeight, end: BlockHeight) -> Self {
        Self {
            start,
            end,
            threshold: None,
            concurrency: None,
        }
    }

    pub fn with_threshold(mut self, threshold: U256) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Runs block-range scans against one chain's [`BlockSource`].
///
/// A scanner holds no per-scan state; concurrent calls to [`Scanner::scan`]
/// are independent of each other.
#[derive(Clone)]
pub struct Scanner {
    chain: Chain,
    source: Arc<dyn BlockSource>,
    limits: ScanLimits,
}

impl Scanner {
    pub fn new(chain: Chain, source: Arc<dyn BlockSource>, limits: ScanLimits) -> Self {
        Self {
            chain,
            source,
            limits,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn source(&self) -> &dyn BlockSource {
        self.source.as_ref()
    }

    /// Scans `[request.start, request.end]` and returns every recipient whose
    /// balance is strictly above the threshold.
    ///
    /// Returns only after every task spawned for the scan has finished, so no
    /// node request is issued on its behalf afterwards.
    pub async fn scan(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let token = cancel.child_token();
        let _cancel_on_drop = token.clone().drop_guard();
        let _deadline = self
            .limits
            .deadline()
            .map(|deadline| DeadlineTimer::arm(deadline, token.clone()));

        self.enter(ScanPhase::Idle);
        info!(
            chain = %self.chain,
            start = request.start,
            end = request.end,
            "scan started"
        );
        let result = self.execute(request, &token).await;

        let outcome = match &result {
            Ok(report) => {
                info!(
                    chain = %self.chain,
                    qualified = report.addresses.len(),
                    fetched = report.blocks_fetched,
                    skipped = report.skipped_blocks(),
                    "scan finished"
                );
                "done"
            }
            Err(err) => {
                self.enter(ScanPhase::Failed);
                warn!(chain = %self.chain, error = %err, "scan failed");
                err.outcome()
            }
        };
        counter!("scanner_scans_total", "outcome" => outcome).increment(1);
        histogram!("scanner_scan_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn execute(
        &self,
        request: ScanRequest,
        token: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let started_at = Utc::now();

        self.enter(ScanPhase::Enumerating);
        let range = BlockRange::new(request.start, request.end)?;
        let max = self.limits.concurrency();
        let concurrency = request.concurrency.unwrap_or(max);
        if concurrency == 0 || concurrency > max {
            return Err(ScanError::InvalidConcurrency {
                requested: concurrency,
                max,
            });
        }
        let threshold = request.threshold.unwrap_or_else(|| self.chain.one_unit());
        let workers = usize::try_from(range.block_count())
            .map_or(concurrency, |blocks| concurrency.min(blocks));

        let (height_tx, height_rx) = mpsc::channel(self.limits.queue_capacity());
        let producer = tokio::spawn(produce_heights(range, height_tx, token.clone()));

        self.enter(ScanPhase::Fetching);
        let heights = Arc::new(Mutex::new(height_rx));
        let (address_tx, address_rx) = mpsc::channel(ADDRESS_CHANNEL_CAPACITY);
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(run_block_worker(
                Arc::clone(&self.source),
                Arc::clone(&heights),
                address_tx.clone(),
                token.clone(),
            ));
        }
        // The workers own the queue and the results channel from here on.
        drop(heights);
        drop(address_tx);
        debug!(chain = %self.chain, workers, "block workers started");

        self.enter(ScanPhase::Deduplicating);
        let collected = collect_addresses(address_rx, token).await;
        if collected.is_err() {
            token.cancel();
        }
        let pool_result = drain_pool(&mut pool).await;
        if pool_result.is_err() {
            token.cancel();
        }
        if let Err(err) = producer.await {
            error!(error = %err, "height producer aborted");
        }

        let (blocks_fetched, skipped) = pool_result?;
        if token.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let unique = collected?;
        debug!(chain = %self.chain, unique = unique.len(), "address set finalized");

        self.enter(ScanPhase::BalanceChecking);
        let addresses = filter_balances(
            self.source.as_ref(),
            unique,
            threshold,
            self.chain.decimals(),
            token,
        )
        .await?;

        self.enter(ScanPhase::Done);
        Ok(assemble_report(
            self.chain,
            addresses,
            skipped,
            blocks_fetched,
            started_at,
        ))
    }

    fn enter(&self, phase: ScanPhase) {
        debug!(chain = %self.chain, phase = phase.as_ref(), "scan phase");
    }
}

/// Waits for every block worker. A worker that panicked fails the scan, since
/// the heights it held would otherwise vanish silently.
async fn drain_pool(
    pool: &mut JoinSet<WorkerReport>,
) -> Result<(u64, Vec<BlockHeight>), ScanError> {
    let mut fetched = 0;
    let mut skipped = Vec::new();
    let mut aborted = None;

    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(report) => {
                fetched += report.fetched;
                skipped.extend(report.skipped);
            }
            Err(err) => {
                error!(error = %err, "block worker aborted");
                aborted.get_or_insert_with(|| err.to_string());
            }
        }
    }

    match aborted {
        Some(reason) => Err(ScanError::WorkerAborted(reason)),
        None => Ok((fetched, skipped)),
    }
}

/// Cancels the scan token once the deadline elapses. Disarmed on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(deadline: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(deadline_secs = deadline.as_secs_f64(), "scan deadline elapsed");
                    token.cancel();
                }
            }
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}
