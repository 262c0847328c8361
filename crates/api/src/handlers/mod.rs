pub mod lookup;
pub mod metrics;
pub mod scan;

pub use lookup::{balance_handler, balances_handler, block_handler};
pub use metrics::metrics_handler;
pub use scan::scan_handler;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chain_gateway_domain::AmountError;
use chain_gateway_scanner::{LookupError, ScanError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown or unconfigured chain `{0}`")]
    UnknownChain(String),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(#[from] AmountError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl ApiError {
    /// Label for the `status` dimension of the request counters.
    pub fn status_label(&self) -> &'static str {
        match self {
            ApiError::UnknownChain(_) => "unknown_chain",
            ApiError::InvalidThreshold(_) => "invalid_input",
            ApiError::Scan(err) => match err {
                ScanError::InvalidRange(_) | ScanError::InvalidConcurrency { .. } => "invalid_input",
                ScanError::BalanceLookup { .. } => "balance_error",
                ScanError::Cancelled => "cancelled",
                ScanError::WorkerAborted(_) => "internal",
            },
            ApiError::Lookup(err) => match err {
                LookupError::InvalidAddress { .. }
                | LookupError::EmptyBatch
                | LookupError::BatchTooLarge { .. } => "invalid_input",
                LookupError::Source(source) if source.is_not_found() => "not_found",
                LookupError::Source(_) => "node_error",
                LookupError::Cancelled => "cancelled",
            },
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownChain(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
            ApiError::Scan(err) => match err {
                ScanError::InvalidRange(_) | ScanError::InvalidConcurrency { .. } => {
                    StatusCode::BAD_REQUEST
                }
                ScanError::BalanceLookup { .. } => StatusCode::BAD_GATEWAY,
                ScanError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
                ScanError::WorkerAborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Lookup(err) => match err {
                LookupError::InvalidAddress { .. }
                | LookupError::EmptyBatch
                | LookupError::BatchTooLarge { .. } => StatusCode::BAD_REQUEST,
                LookupError::Source(source) if source.is_not_found() => StatusCode::NOT_FOUND,
                LookupError::Source(_) => StatusCode::BAD_GATEWAY,
                LookupError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
