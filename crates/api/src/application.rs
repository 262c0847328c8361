use actix_web::{middleware::Logger, web, App, HttpServer};
use chain_gateway_domain::{
    config::{ApiConfig, ConfigError},
    services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
    Chain, SourceError,
};
use chain_gateway_scanner::{build_rpc_source, Scanner};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    handlers::{balance_handler, balances_handler, block_handler, metrics_handler, scan_handler},
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let telemetry = init_telemetry(&TelemetryConfig::from_env("API"))?;

    let mut scanners = Vec::with_capacity(config.nodes().len());
    for node in config.nodes() {
        let source = build_rpc_source(node)
            .await
            .map_err(|source| BootstrapError::Node {
                chain: node.chain(),
                source,
            })?;
        scanners.push(Scanner::new(node.chain(), source, config.limits()));
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(scanners, telemetry, shutdown.clone());
    let chains: Vec<String> = state.chains().map(|chain| chain.to_string()).collect();
    info!(chains = ?chains, bind = config.api_bind_address(), "api starting");

    // Scans in flight are cancelled as soon as the process is asked to stop,
    // instead of holding up actix's graceful shutdown.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown requested, cancelling running scans");
                shutdown.cancel();
            }
        });
    }

    let include_metrics_on_public = !config.has_internal_listener();
    let public_state = state.clone();
    let public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .route("/api/v1/{chain}/scan", web::post().to(scan_handler))
            .route("/api/v1/{chain}/balances", web::post().to(balances_handler))
            .route(
                "/api/v1/{chain}/balances/{address}",
                web::get().to(balance_handler),
            )
            .route("/api/v1/{chain}/blocks/{height}", web::get().to(block_handler));

        if include_metrics_on_public {
            app = app.route("/metrics", web::get().to(metrics_handler));
        }

        app
    })
    .bind(config.api_bind_address())?
    .run();

    let internal_server = match config.internal_bind_address() {
        Some(addr) => {
            let internal_state = state.clone();
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(internal_state.clone()))
                    .wrap(Logger::default())
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .bind(addr)?
            .run();
            Some(server)
        }
        None => None,
    };

    let served = match internal_server {
        Some(internal) => tokio::try_join!(public_server, internal).map(|_| ()),
        None => public_server.await,
    };
    shutdown.cancel();
    served?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("{chain} node unavailable: {source}")]
    Node {
        chain: Chain,
        #[source]
        source: SourceError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
