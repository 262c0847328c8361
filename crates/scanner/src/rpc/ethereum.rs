use async_trait::async_trait;
use chain_gateway_domain::{
    Address, Block, BlockHeight, BlockSource, Chain, SourceError, Transaction,
};
use primitive_types::U256;

use super::types::EthBlock;
use super::{parse_hex_quantity, EthereumCall, JsonRpcClient};

/// [`BlockSource`] backed by an Ethereum-compatible JSON-RPC endpoint.
#[derive(Debug)]
pub struct EthereumRpcSource {
    client: JsonRpcClient,
}

impl EthereumRpcSource {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockSource for EthereumRpcSource {
    async fn fetch_block(&self, height: BlockHeight) -> Result<Block, SourceError> {
        let block: Option<EthBlock> = self
            .client
            .call_optional(&EthereumCall::BlockByNumber {
                height,
                full_transactions: true,
            })
            .await?;
        let block = block.ok_or_else(|| SourceError::NotFound(format!("block {height}")))?;
        convert_block(height, block)
    }

    async fn fetch_balance(&self, address: &Address) -> Result<U256, SourceError> {
        let raw: String = self
            .client
            .call(&EthereumCall::GetBalance {
                address: address.clone(),
            })
            .await?;
        parse_hex_quantity(&raw)
    }

    async fn chain_height(&self) -> Result<BlockHeight, SourceError> {
        let raw: String = self.client.call(&EthereumCall::BlockNumber).await?;
        let tip = parse_hex_quantity(&raw)?;
        if tip > U256::from(u64::MAX) {
            return Err(SourceError::Decode(format!("block number `{raw}` overflows u64")));
        }
        Ok(tip.low_u64())
    }
}

fn convert_block(height: BlockHeight, block: EthBlock) -> Result<Block, SourceError> {
    if let Some(number) = block.number.as_deref() {
        let reported = parse_hex_quantity(number)?;
        if reported != U256::from(height) {
            return Err(SourceError::Decode(format!(
                "asked for block {height}, node returned {number}"
            )));
        }
    }

    let transactions = block
        .transactions
        .into_iter()
        .map(|tx| {
            let recipient = tx
                .to
                .as_deref()
                .map(|to| Chain::Ethereum.canonical_address(to))
                .transpose()
                .map_err(|err| SourceError::Decode(format!("tx {}: {err}", tx.hash)))?;
            Ok(Transaction::with_recipient(tx.hash, recipient))
        })
        .collect::<Result<Vec<_>, SourceError>>()?;

    Ok(Block {
        height,
        transactions,
    })
}
