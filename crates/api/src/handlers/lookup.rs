use actix_web::{web, HttpResponse};
use chain_gateway_domain::{AddressBalance, Block, BlockHeight, Chain, Transaction};
use chain_gateway_scanner::{lookup_balance, lookup_balances, lookup_block, Scanner};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize)]
pub struct BalancesRequestBody {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalancesResponse {
    pub chain: Chain,
    pub balances: Vec<AddressBalance>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub chain: Chain,
    #[serde(flatten)]
    pub balance: AddressBalance,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionView {
    pub txid: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub chain: Chain,
    pub height: BlockHeight,
    pub transactions: Vec<TransactionView>,
}

impl BlockResponse {
    fn new(chain: Chain, block: Block) -> Self {
        Self {
            chain,
            height: block.height,
            transactions: block.transactions.into_iter().map(TransactionView::from).collect(),
        }
    }
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            txid: tx.txid,
            recipients: tx.recipients.into_iter().map(|a| a.into_inner()).collect(),
        }
    }
}

/// `POST /api/v1/{chain}/balances`
pub async fn balances_handler(
    state: web::Data<AppState>,
    chain: web::Path<String>,
    payload: web::Json<BalancesRequestBody>,
) -> Result<HttpResponse, ApiError> {
    let result = async {
        let scanner = resolve(&state, &chain)?;
        let balances = lookup_balances(
            scanner.chain(),
            scanner.source(),
            &payload.addresses,
            &state.shutdown().child_token(),
        )
        .await?;
        Ok::<_, ApiError>(BalancesResponse {
            chain: scanner.chain(),
            balances,
        })
    }
    .await;
    record("balances", &result);

    Ok(HttpResponse::Ok().json(result?))
}

/// `GET /api/v1/{chain}/balances/{address}`
pub async fn balance_handler(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (chain, address) = path.into_inner();
    let result = async {
        let scanner = resolve(&state, &chain)?;
        let balance = lookup_balance(
            scanner.chain(),
            scanner.source(),
            &address,
            &state.shutdown().child_token(),
        )
        .await?;
        Ok::<_, ApiError>(BalanceResponse {
            chain: scanner.chain(),
            balance,
        })
    }
    .await;
    record("balance", &result);

    Ok(HttpResponse::Ok().json(result?))
}

/// `GET /api/v1/{chain}/blocks/{height}`
pub async fn block_handler(
    state: web::Data<AppState>,
    path: web::Path<(String, BlockHeight)>,
) -> Result<HttpResponse, ApiError> {
    let (chain, height) = path.into_inner();
    let result = async {
        let scanner = resolve(&state, &chain)?;
        let block = lookup_block(scanner.source(), height, &state.shutdown().child_token()).await?;
        Ok::<_, ApiError>(BlockResponse::new(scanner.chain(), block))
    }
    .await;
    record("block", &result);

    Ok(HttpResponse::Ok().json(result?))
}

fn resolve<'a>(state: &'a AppState, raw_chain: &str) -> Result<&'a Scanner, ApiError> {
    state
        .scanner_for(raw_chain)
        .ok_or_else(|| ApiError::UnknownChain(raw_chain.to_string()))
}

fn record<T>(route: &'static str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(err) => err.status_label(),
    };
    counter!("api_lookup_requests_total", "route" => route, "status" => status).increment(1);
}
