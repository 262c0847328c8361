//! Point queries against a node: balances of caller-supplied addresses and a
//! single block by height. Unlike a scan, nothing here is skipped; the first
//! failing node call fails the whole lookup.

use std::collections::HashSet;

use chain_gateway_domain::{
    format_major_units, AddressBalance, AddressFormatError, Block, BlockHeight, BlockSource,
    Chain, SourceError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Most addresses accepted by one [`lookup_balances`] call.
pub const MAX_BALANCE_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid address `{address}`: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressFormatError,
    },
    #[error("no addresses given")]
    EmptyBatch,
    #[error("{requested} addresses requested, at most {max} allowed")]
    BatchTooLarge { requested: usize, max: usize },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("lookup cancelled")]
    Cancelled,
}

/// Returns the current balance of every address, formatted in major units.
///
/// Addresses are canonicalized first and all are validated before the node is
/// called. The result follows the input order with repeats collapsed onto
/// their first occurrence.
pub async fn lookup_balances(
    chain: Chain,
    source: &dyn BlockSource,
    raw_addresses: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<AddressBalance>, LookupError> {
    if raw_addresses.is_empty() {
        return Err(LookupError::EmptyBatch);
    }
    if raw_addresses.len() > MAX_BALANCE_BATCH {
        return Err(LookupError::BatchTooLarge {
            requested: raw_addresses.len(),
            max: MAX_BALANCE_BATCH,
        });
    }

    let mut seen = HashSet::new();
    let mut addresses = Vec::with_capacity(raw_addresses.len());
    for raw in raw_addresses {
        let address =
            chain
                .canonical_address(raw)
                .map_err(|source| LookupError::InvalidAddress {
                    address: raw.clone(),
                    source,
                })?;
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }

    let mut balances = Vec::with_capacity(addresses.len());
    for address in addresses {
        let balance = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LookupError::Cancelled),
            balance = source.fetch_balance(&address) => balance?,
        };
        balances.push(AddressBalance {
            balance: format_major_units(balance, chain.decimals()),
            address,
        });
    }

    debug!(chain = %chain, count = balances.len(), "balances looked up");
    Ok(balances)
}

pub async fn lookup_balance(
    chain: Chain,
    source: &dyn BlockSource,
    raw_address: &str,
    cancel: &CancellationToken,
) -> Result<AddressBalance, LookupError> {
    let mut found = lookup_balances(chain, source, &[raw_address.to_string()], cancel).await?;
    found.pop().ok_or(LookupError::EmptyBatch)
}

pub async fn lookup_block(
    source: &dyn BlockSource,
    height: BlockHeight,
    cancel: &CancellationToken,
) -> Result<Block, LookupError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LookupError::Cancelled),
        block = source.fetch_block(height) => Ok(block?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chain_gateway_domain::{Address, Transaction};
    use primitive_types::U256;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ALICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const BOB: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    #[derive(Default)]
    struct Ledger {
        balances: HashMap<&'static str, U256>,
        broken: Option<&'static str>,
        balance_calls: AtomicUsize,
    }

    #[async_trait]
    impl BlockSource for Ledger {
        async fn fetch_block(&self, height: BlockHeight) -> Result<Block, SourceError> {
            if height > 10 {
                return Err(SourceError::NotFound(format!("block {height}")));
            }
            Ok(Block {
                height,
                transactions: vec![Transaction::with_recipient(
                    format!("0x{height:x}"),
                    Some(Address::from(ALICE)),
                )],
            })
        }

        async fn fetch_balance(&self, address: &Address) -> Result<U256, SourceError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            if self.broken == Some(address.as_str()) {
                return Err(SourceError::Transient("connection reset".into()));
            }
            Ok(self
                .balances
                .get(address.as_str())
                .copied()
                .unwrap_or_default())
        }

        async fn chain_height(&self) -> Result<BlockHeight, SourceError> {
            Ok(10)
        }
    }

    fn ledger() -> Ledger {
        let ether = Chain::Ethereum.one_unit();
        Ledger {
            balances: HashMap::from([(ALICE, ether * U256::from(3u64)), (BOB, ether / U256::from(4u64))]),
            ..Ledger::default()
        }
    }

    fn owned(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn balances_follow_request_order_and_canonical_form() {
        let source = ledger();
        let found = lookup_balances(
            Chain::Ethereum,
            &source,
            &owned(&[&BOB.to_lowercase(), ALICE, ALICE]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            found,
            vec![
                AddressBalance {
                    address: Address::from(BOB),
                    balance: "0.250000000000000000".into(),
                },
                AddressBalance {
                    address: Address::from(ALICE),
                    balance: "3.000000000000000000".into(),
                },
            ]
        );
        assert_eq!(source.balance_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_address_reports_zero() {
        let found = lookup_balance(
            Chain::Ethereum,
            &ledger(),
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(found.balance, "0.000000000000000000");
    }

    #[tokio::test]
    async fn invalid_address_is_rejected_before_any_node_call() {
        let source = ledger();
        let err = lookup_balances(
            Chain::Ethereum,
            &source,
            &owned(&[ALICE, "0x1234"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LookupError::InvalidAddress { ref address, .. } if address == "0x1234"));
        assert_eq!(source.balance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let cancel = CancellationToken::new();
        let empty = lookup_balances(Chain::Ethereum, &ledger(), &[], &cancel).await;
        assert!(matches!(empty, Err(LookupError::EmptyBatch)));

        let many = vec![ALICE.to_string(); MAX_BALANCE_BATCH + 1];
        let err = lookup_balances(Chain::Ethereum, &ledger(), &many, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LookupError::BatchTooLarge {
                requested: 101,
                max: MAX_BALANCE_BATCH
            }
        ));
    }

    #[tokio::test]
    async fn one_failing_balance_fails_the_batch() {
        let source = Ledger {
            broken: Some(BOB),
            ..ledger()
        };
        let err = lookup_balances(
            Chain::Ethereum,
            &source,
            &owned(&[ALICE, BOB]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LookupError::Source(SourceError::Transient(_))));
    }

    #[tokio::test]
    async fn cancelled_lookup_skips_the_node() {
        let source = ledger();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = lookup_balances(Chain::Ethereum, &source, &owned(&[ALICE]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Cancelled));
        assert_eq!(source.balance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn block_lookup_passes_not_found_through() {
        let cancel = CancellationToken::new();
        let block = lookup_block(&ledger(), 7, &cancel).await.unwrap();
        assert_eq!(block.height, 7);
        assert_eq!(block.transactions[0].recipients, vec![Address::from(ALICE)]);

        let err = lookup_block(&ledger(), 11, &cancel).await.unwrap_err();
        assert!(matches!(err, LookupError::Source(ref source) if source.is_not_found()));
    }
}
