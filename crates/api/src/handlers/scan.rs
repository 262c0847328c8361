use actix_web::{web, HttpResponse};
use chain_gateway_domain::{parse_major_units, AddressBalance, BlockHeight, Chain, ScanReport};
use chain_gateway_scanner::ScanRequest;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize)]
pub struct ScanRequestBody {
    pub start: BlockHeight,
    pub end: BlockHeight,
    /// Major units, e.g. `"1.5"`. Defaults to one unit of the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub chain: Chain,
    pub addresses: Vec<AddressBalance>,
    pub skipped_blocks: usize,
    pub skipped_heights: Vec<BlockHeight>,
    pub blocks_fetched: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl From<ScanReport> for ScanResponse {
    fn from(report: ScanReport) -> Self {
        Self {
            chain: report.chain,
            skipped_blocks: report.skipped_blocks(),
            addresses: report.addresses,
            skipped_heights: report.skipped_heights,
            blocks_fetched: report.blocks_fetched,
            started_at: report.started_at,
            finished_at: report.finished_at,
        }
    }
}

pub async fn scan_handler(
    state: web::Data<AppState>,
    chain: web::Path<String>,
    payload: web::Json<ScanRequestBody>,
) -> Result<HttpResponse, ApiError> {
    let result = run_scan(&state, &chain, payload.into_inner()).await;
    let status = match &result {
        Ok(_) => "ok",
        Err(err) => err.status_label(),
    };
    counter!("api_scan_requests_total", "status" => status).increment(1);

    Ok(HttpResponse::Ok().json(ScanResponse::from(result?)))
}

async fn run_scan(
    state: &AppState,
    raw_chain: &str,
    body: ScanRequestBody,
) -> Result<ScanReport, ApiError> {
    let scanner = state
        .scanner_for(raw_chain)
        .ok_or_else(|| ApiError::UnknownChain(raw_chain.to_string()))?;

    let mut request = ScanRequest::new(body.start, body.end);
    if let Some(raw) = body.threshold.as_deref() {
        request = request.with_threshold(parse_major_units(raw, scanner.chain().decimals())?);
    }
    if let Some(concurrency) = body.concurrency {
        request = request.with_concurrency(concurrency);
    }

    let report = scanner
        .scan(request, state.shutdown().child_token())
        .await?;
    Ok(report)
}
