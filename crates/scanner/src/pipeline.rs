//! Stages of a block-range scan. Data moves strictly one way:
//! heights -> block workers -> address set -> balance filter -> report.
//!
//! Every stage races its next unit of work against the scan's cancellation
//! token, so a cancelled scan unwinds within one suspension point.

use std::collections::HashSet;
use std::sync::Arc;

use chain_gateway_domain::{
    format_major_units, Address, AddressBalance, Block, BlockHeight, BlockRange, BlockSource,
    Chain, ScanReport,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use primitive_types::U256;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::ScanError;

/// Work queue shared by the block workers. The mutex hands each height to
/// exactly one worker.
pub type HeightQueue = Arc<Mutex<mpsc::Receiver<BlockHeight>>>;

/// Feeds every height of `range`, highest first, into the bounded `queue`.
/// Stops early when the scan is cancelled or every worker has gone away.
pub async fn produce_heights(
    range: BlockRange,
    queue: mpsc::Sender<BlockHeight>,
    cancel: CancellationToken,
) {
    for height in range.descending() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = queue.send(height) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
    debug!(start = range.start(), end = range.end(), "height range exhausted");
}

/// What a single block worker did before it stopped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub fetched: u64,
    pub skipped: Vec<BlockHeight>,
}

/// Pulls heights until the queue is drained, fetching each block once and
/// publishing its recipients. A failed fetch is logged and recorded as a
/// skipped height; it never stops the worker.
pub async fn run_block_worker(
    source: Arc<dyn BlockSource>,
    heights: HeightQueue,
    addresses: mpsc::Sender<Address>,
    cancel: CancellationToken,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = next_height(&heights) => next,
        };
        let Some(height) = next else {
            break;
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = source.fetch_block(height) => fetched,
        };

        match fetched {
            Ok(block) => {
                report.fetched += 1;
                counter!("scanner_blocks_total", "result" => "ok").increment(1);
                if !emit_recipients(block, &addresses, &cancel).await {
                    break;
                }
            }
            Err(err) => {
                counter!("scanner_blocks_total", "result" => "skipped").increment(1);
                warn!(height, kind = err.kind(), error = %err, "block fetch failed, skipping height");
                report.skipped.push(height);
            }
        }
    }

    report
}

async fn next_height(heights: &HeightQueue) -> Option<BlockHeight> {
    heights.lock().await.recv().await
}

/// Returns `false` when the scan should stop (cancelled or consumer gone).
async fn emit_recipients(
    block: Block,
    addresses: &mpsc::Sender<Address>,
    cancel: &CancellationToken,
) -> bool {
    let mut emitted = 0u64;
    for address in block.transactions.into_iter().flat_map(|tx| tx.recipients) {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            sent = addresses.send(address) => sent,
        };
        if sent.is_err() {
            return false;
        }
        emitted += 1;
    }
    counter!("scanner_addresses_emitted_total").increment(emitted);
    true
}

/// Single consumer of the results channel. Completes only once every sender
/// has been dropped, i.e. the whole worker pool has finished.
pub async fn collect_addresses(
    mut results: mpsc::Receiver<Address>,
    cancel: &CancellationToken,
) -> Result<HashSet<Address>, ScanError> {
    let mut unique = HashSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            received = results.recv() => match received {
                Some(address) => {
                    unique.insert(address);
                }
                None => return Ok(unique),
            },
        }
    }
}

/// Looks up each address once and keeps those holding strictly more than
/// `threshold` minor units. Any failed lookup aborts the whole filter.
pub async fn filter_balances(
    source: &dyn BlockSource,
    addresses: HashSet<Address>,
    threshold: U256,
    decimals: u32,
    cancel: &CancellationToken,
) -> Result<Vec<AddressBalance>, ScanError> {
    let mut qualified = Vec::new();

    for address in addresses {
        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            lookup = source.fetch_balance(&address) => lookup,
        };

        let balance = match lookup {
            Ok(balance) => {
                counter!("scanner_balance_lookups_total", "result" => "ok").increment(1);
                balance
            }
            Err(err) => {
                counter!("scanner_balance_lookups_total", "result" => "error").increment(1);
                warn!(address = %address, error = %err, "balance lookup failed, aborting scan");
                return Err(ScanError::BalanceLookup {
                    address,
                    source: err,
                });
            }
        };

        if balance > threshold {
            qualified.push(AddressBalance {
                balance: format_major_units(balance, decimals),
                address,
            });
        }
    }

    Ok(qualified)
}

pub fn assemble_report(
    chain: Chain,
    addresses: Vec<AddressBalance>,
    mut skipped_heights: Vec<BlockHeight>,
    blocks_fetched: u64,
    started_at: DateTime<Utc>,
) -> ScanReport {
    skipped_heights.sort_unstable_by(|a, b| b.cmp(a));
    ScanReport {
        chain,
        addresses,
        skipped_heights,
        blocks_fetched,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chain_gateway_domain::{SourceError, Transaction};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    struct FixedSource {
        blocks: HashMap<BlockHeight, Vec<&'static str>>,
        balances: HashMap<&'static str, u64>,
    }

    #[async_trait]
    impl BlockSource for FixedSource {
        async fn fetch_block(&self, height: BlockHeight) -> Result<Block, SourceError> {
            let recipients = self
                .blocks
                .get(&height)
                .ok_or_else(|| SourceError::NotFound(format!("block {height}")))?;
            Ok(Block {
                height,
                transactions: recipients
                    .iter()
                    .enumerate()
                    .map(|(i, to)| {
                        Transaction::with_recipient(format!("{height}-{i}"), Some(Address::from(*to)))
                    })
                    .chain(std::iter::once(Transaction::with_recipient("creation", None)))
                    .collect(),
            })
        }

        async fn fetch_balance(&self, address: &Address) -> Result<U256, SourceError> {
            Ok(U256::from(
                self.balances.get(address.as_str()).copied().unwrap_or(0),
            ))
        }

        async fn chain_height(&self) -> Result<BlockHeight, SourceError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn producer_emits_descending_heights_then_closes() {
        let (tx, mut rx) = mpsc::channel(2);
        let range = BlockRange::new(5, 8).unwrap();
        let producer = tokio::spawn(produce_heights(range, tx, CancellationToken::new()));

        let mut seen = Vec::new();
        while let Some(height) = rx.recv().await {
            seen.push(height);
        }
        assert_eq!(seen, vec![8, 7, 6, 5]);
        producer.await.expect("producer finishes");
    }

    #[tokio::test]
    async fn producer_stops_on_cancel_without_enumerating_everything() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let range = BlockRange::new(0, u64::MAX).unwrap();
        let producer = tokio::spawn(produce_heights(range, tx, cancel.clone()));

        assert_eq!(rx.recv().await, Some(u64::MAX));
        cancel.cancel();
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer observes cancellation")
            .expect("producer does not panic");

        let mut buffered = 0;
        while rx.recv().await.is_some() {
            buffered += 1;
        }
        assert!(buffered <= 4, "queue is bounded, saw {buffered}");
    }

    #[tokio::test]
    async fn producer_stops_when_workers_are_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let range = BlockRange::new(0, 1_000_000).unwrap();
        timeout(
            Duration::from_secs(1),
            produce_heights(range, tx, CancellationToken::new()),
        )
        .await
        .expect("producer returns once the queue is closed");
    }

    #[tokio::test]
    async fn worker_publishes_recipients_and_skips_missing_blocks() {
        let source: Arc<dyn BlockSource> = Arc::new(FixedSource {
            blocks: HashMap::from([(1, vec!["A", "B"]), (3, vec!["A"])]),
            balances: HashMap::new(),
        });
        let (height_tx, height_rx) = mpsc::channel(8);
        for height in [3, 2, 1] {
            height_tx.send(height).await.unwrap();
        }
        drop(height_tx);
        let (address_tx, mut address_rx) = mpsc::channel(8);

        let report = run_block_worker(
            source,
            Arc::new(Mutex::new(height_rx)),
            address_tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped, vec![2]);

        let mut published = Vec::new();
        while let Some(address) = address_rx.recv().await {
            published.push(address.into_inner());
        }
        assert_eq!(published, vec!["A", "A", "B"]);
    }

    #[tokio::test]
    async fn collector_deduplicates_across_senders() {
        let (tx, rx) = mpsc::channel(16);
        let other = tx.clone();
        for name in ["A", "B", "A"] {
            tx.send(Address::from(name)).await.unwrap();
        }
        for name in ["B", "C"] {
            other.send(Address::from(name)).await.unwrap();
        }
        drop(tx);
        drop(other);

        let unique = collect_addresses(rx, &CancellationToken::new())
            .await
            .expect("collector finishes");
        let mut names: Vec<_> = unique.into_iter().map(Address::into_inner).collect();
        names.sort();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn collector_waits_for_close_signal() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Address::from("A")).await.unwrap();
        let pending = timeout(
            Duration::from_millis(50),
            collect_addresses(rx, &CancellationToken::new()),
        )
        .await;
        assert!(pending.is_err(), "collector must not finish while a sender is alive");
    }

    #[tokio::test]
    async fn balance_filter_is_strictly_greater_than_threshold() {
        let source = FixedSource {
            blocks: HashMap::new(),
            balances: HashMap::from([("EQ", 100_000_000), ("ABOVE", 100_000_001), ("LOW", 1)]),
        };
        let addresses: HashSet<Address> = ["EQ", "ABOVE", "LOW", "NONE"]
            .into_iter()
            .map(Address::from)
            .collect();

        let kept = filter_balances(
            &source,
            addresses,
            U256::from(100_000_000u64),
            8,
            &CancellationToken::new(),
        )
        .await
        .expect("filter succeeds");

        assert_eq!(
            kept,
            vec![AddressBalance {
                address: Address::from("ABOVE"),
                balance: "1.00000001".into(),
            }]
        );
    }

    #[test]
    fn assembler_orders_skipped_heights_like_the_traversal() {
        let report = assemble_report(Chain::Bitcoin, Vec::new(), vec![3, 9, 5], 7, Utc::now());
        assert_eq!(report.skipped_heights, vec![9, 5, 3]);
        assert_eq!(report.skipped_blocks(), 3);
        assert_eq!(report.blocks_fetched, 7);
        assert!(report.finished_at >= report.started_at);
    }
}
