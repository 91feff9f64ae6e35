//! nextroute backend binary.
//!
//! - UDP listener for SDK packets (one task per datagram)
//! - ops HTTP listener: /healthz, /readyz, /metrics
//! - topology refresher and message drain tasks
//! - Ctrl-C marks draining, then exits

use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use nextroute_backend::{app_state::AppState, config, messages::MessageSinks, router, transport};
use nextroute_core::error::{NextRouteError, Result};

const DEFAULT_CONFIG_PATH: &str = "nextroute.yaml";

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(code = e.code().as_str(), error = %e, "nextroute-backend failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::var("NEXTROUTE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.backend.listen_addr()?;
    let public = cfg.backend.public_addr()?;
    let ops_listen = cfg.backend.ops_listen_addr()?;
    let refresh = Duration::from_secs(cfg.topology.refresh_secs);

    let (sinks, receivers) = MessageSinks::bounded(cfg.backend.sink_capacity);
    let state = AppState::new(cfg, sinks)?;
    receivers.spawn_log_drains();

    // Start without a topology rather than refuse to boot; sessions go
    // direct until the refresher succeeds.
    if let Err(e) = state.reload_topology() {
        tracing::warn!(error = %e, "initial topology load failed");
    }
    tokio::spawn(refresh_topology(state.clone(), refresh));

    let ops_listener = tokio::net::TcpListener::bind(ops_listen)
        .await
        .map_err(|e| NextRouteError::Internal(format!("ops bind failed ({ops_listen}): {e}")))?;
    let ops_app = router::build_ops_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(ops_listener, ops_app).await {
            tracing::error!(error = %e, "ops server failed");
        }
    });

    let socket = transport::udp::bind(listen).await?;
    tracing::info!(%listen, %public, %ops_listen, "nextroute-backend starting");

    tokio::select! {
        res = transport::udp::serve(socket, state.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            state.set_draining();
            tracing::info!("ctrl-c received, draining");
            Ok(())
        }
    }
}

async fn refresh_topology(state: AppState, every: Duration) {
    let mut tick = tokio::time::interval(every);
    tick.tick().await;
    loop {
        tick.tick().await;
        if let Err(e) = state.reload_topology() {
            tracing::warn!(error = %e, "topology refresh failed, keeping previous snapshot");
        }
    }
}
