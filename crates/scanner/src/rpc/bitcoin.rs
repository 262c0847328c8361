use async_trait::async_trait;
use chain_gateway_domain::{
    parse_major_units, Address, Block, BlockHeight, BlockSource, Chain, SourceError, Transaction,
};
use primitive_types::U256;

use super::types::{BtcBlock, BtcUnspent};
use super::{BitcoinCall, JsonRpcClient};

/// bitcoind `RPC_INVALID_PARAMETER`, returned for heights past the tip.
const RPC_INVALID_PARAMETER: i64 = -8;
/// bitcoind `RPC_INVALID_ADDRESS_OR_KEY`, returned for unknown block hashes.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const LIST_UNSPENT_MAX_CONF: u32 = 9_999_999;

/// [`BlockSource`] for bitcoind-compatible nodes (Bitcoin, Litecoin,
/// Dogecoin).
///
/// Balances come from `listunspent`, so the node's wallet must be watching
/// the address; unknown addresses report zero.
#[derive(Debug)]
pub struct BitcoinRpcSource {
    chain: Chain,
    client: JsonRpcClient,
}

impl BitcoinRpcSource {
    pub fn new(chain: Chain, client: JsonRpcClient) -> Self {
        Self { chain, client }
    }
}

#[async_trait]
impl BlockSource for BitcoinRpcSource {
    async fn fetch_block(&self, height: BlockHeight) -> Result<Block, SourceError> {
        let hash: String = self
            .client
            .call(&BitcoinCall::GetBlockHash { height })
            .await
            .map_err(|err| block_lookup_error(height, err))?;
        let block: BtcBlock = self
            .client
            .call(&BitcoinCall::GetBlock { hash, verbosity: 2 })
            .await
            .map_err(|err| block_lookup_error(height, err))?;
        convert_block(self.chain, height, block)
    }

    async fn fetch_balance(&self, address: &Address) -> Result<U256, SourceError> {
        let unspent: Vec<BtcUnspent> = self
            .client
            .call(&BitcoinCall::ListUnspent {
                min_conf: 0,
                max_conf: LIST_UNSPENT_MAX_CONF,
                address: address.clone(),
            })
            .await?;
        sum_unspent(self.chain, &unspent)
    }

    async fn chain_height(&self) -> Result<BlockHeight, SourceError> {
        self.client.call(&BitcoinCall::GetBlockCount).await
    }
}

fn block_lookup_error(height: BlockHeight, err: SourceError) -> SourceError {
    match err {
        SourceError::Rpc { code, message }
            if code == RPC_INVALID_PARAMETER || code == RPC_INVALID_ADDRESS_OR_KEY =>
        {
            SourceError::NotFound(format!("block {height}: {message}"))
        }
        other => other,
    }
}

fn convert_block(chain: Chain, height: BlockHeight, block: BtcBlock) -> Result<Block, SourceError> {
    if let Some(reported) = block.height {
        if reported != height {
            return Err(SourceError::Decode(format!(
                "asked for block {height}, node returned {} at {reported}",
                block.hash
            )));
        }
    }

    let mut transactions = Vec::with_capacity(block.tx.len());
    for tx in block.tx {
        let mut recipients = Vec::new();
        for output in tx.vout {
            for raw in output.script_pub_key.into_addresses() {
                let address = chain
                    .canonical_address(&raw)
                    .map_err(|err| SourceError::Decode(format!("tx {}: {err}", tx.txid)))?;
                recipients.push(address);
            }
        }
        transactions.push(Transaction::new(tx.txid, recipients));
    }

    Ok(Block {
        height,
        transactions,
    })
}

fn sum_unspent(chain: Chain, unspent: &[BtcUnspent]) -> Result<U256, SourceError> {
    unspent.iter().try_fold(U256::zero(), |total, entry| {
        let text = entry.amount_text();
        let amount = parse_major_units(text, chain.decimals())
            .map_err(|err| SourceError::Decode(format!("amount {text}: {err}")))?;
        total
            .checked_add(amount)
            .ok_or_else(|| SourceError::Decode("unspent total overflows".into()))
    })
}
