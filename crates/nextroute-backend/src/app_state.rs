//! Shared application state for the backend.
//!
//! Wires keys, directory, topology snapshot, magic values, sinks, the
//! session engine and the dispatcher together. Startup errors come back as
//! `Result` so `main` can report them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use nextroute_core::error::{NextRouteError, Result};
use nextroute_core::protocol::PacketType;

use crate::config::BackendConfig;
use crate::context::{Directory, DirectoryData, Locator, RotatingMagic, SnapshotCell, StaticLocator};
use crate::crypto::BackendKeys;
use crate::dispatch::{
    Dispatcher, Handled, HandlerDeps, MatchDataHandler, PacketContext, ServerInitHandler,
    ServerUpdateHandler, SessionUpdateHandler,
};
use crate::gate::{Gate, Rejected};
use crate::messages::MessageSinks;
use crate::obs::metrics::BackendMetrics;
use crate::session::{EngineSettings, SessionUpdateEngine};
use crate::topology::RouteMatrix;

const FAIL_FAST_ON_MISMATCH: bool = false; // if changed to true, boot fails.

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<BackendMetrics>,
}

struct AppStateInner {
    cfg: BackendConfig,
    keys: Arc<BackendKeys>,
    directory: Arc<Directory>,
    topology: Arc<SnapshotCell<RouteMatrix>>,
    sinks: MessageSinks,
}

impl AppState {
    /// Build state from config. The topology starts empty (and therefore
    /// stale) until the first load swaps a snapshot in.
    pub fn new(cfg: BackendConfig, sinks: MessageSinks) -> Result<Self> {
        let keys = Arc::new(BackendKeys::from_config(&cfg.keys)?);
        let directory = Arc::new(Directory::new(DirectoryData::from_config(&cfg)?));
        let topology = Arc::new(SnapshotCell::new(RouteMatrix::empty()));
        let magic = Arc::new(RotatingMagic::new(Duration::from_secs(cfg.backend.magic_rotation_secs)));

        let settings = EngineSettings::from_config(&cfg.backend)?;
        let mut engine = SessionUpdateEngine::new(
            Arc::clone(&keys),
            topology.clone(),
            directory.clone(),
            magic.clone(),
            sinks.clone(),
            settings.clone(),
        );
        if let Some(location) = &cfg.location {
            let locator: Arc<dyn Locator> = Arc::new(StaticLocator::new(location.latitude, location.longitude));
            engine = engine.with_locator(locator);
        }

        let deps = Arc::new(HandlerDeps {
            keys: Arc::clone(&keys),
            datacenters: directory.clone(),
            magic,
            sinks: sinks.clone(),
            minimum_sdk_version: settings.minimum_sdk_version,
        });

        let dispatcher = Dispatcher::new(Gate::new(directory.clone()));
        dispatcher.register(Arc::new(ServerInitHandler::new(Arc::clone(&deps))));
        dispatcher.register(Arc::new(ServerUpdateHandler::new(Arc::clone(&deps))));
        dispatcher.register(Arc::new(SessionUpdateHandler::new(Arc::clone(&deps), Arc::new(engine))));
        dispatcher.register(Arc::new(MatchDataHandler::new(deps)));

        check_handler_coverage(&dispatcher)?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                keys,
                directory,
                topology,
                sinks,
            }),
            dispatcher: Arc::new(dispatcher),
            metrics: Arc::new(BackendMetrics::default()),
        })
    }

    pub fn cfg(&self) -> &BackendConfig {
        &self.inner.cfg
    }

    pub fn keys(&self) -> Arc<BackendKeys> {
        Arc::clone(&self.inner.keys)
    }

    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.inner.directory)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn metrics(&self) -> Arc<BackendMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn set_draining(&self) {
        self.metrics.set_draining();
    }

    pub fn is_draining(&self) -> bool {
        self.metrics.is_draining()
    }

    /// Swap in a new topology snapshot.
    pub fn install_topology(&self, matrix: RouteMatrix) {
        self.metrics
            .topology_relays
            .set(&[], matrix.relays().len() as i64);
        self.inner.topology.store(matrix);
    }

    /// Reload the topology file named in the config.
    pub fn reload_topology(&self) -> Result<()> {
        let matrix = RouteMatrix::load_file(&self.inner.cfg.topology.path)?;
        tracing::info!(
            relays = matrix.relays().len(),
            routes = matrix.route_count(),
            created_at = matrix.created_at(),
            "topology loaded"
        );
        self.install_topology(matrix);
        Ok(())
    }

    /// Dispatch one datagram and record the outcome in the metrics.
    pub async fn handle_datagram(&self, packet: Bytes, ctx: PacketContext) -> std::result::Result<Handled, Rejected> {
        let result = self.dispatcher.dispatch(packet, ctx).await;
        match &result {
            Ok(handled) => self.metrics.record_handled(handled),
            Err(rejected) => self.metrics.record_rejected(rejected),
        }
        result
    }

    /// Lines appended to `/metrics` beyond the registry: sink drop counters.
    pub fn metrics_extra(&self) -> Vec<(String, u64)> {
        self.inner
            .sinks
            .drop_counts()
            .into_iter()
            .map(|(message, dropped)| {
                (format!("nextroute_sink_drops_total{{message=\"{message}\"}}"), dropped)
            })
            .collect()
    }
}

/// Every admitted request type must have a handler.
fn check_handler_coverage(dispatcher: &Dispatcher) -> Result<()> {
    let registered = dispatcher.registered_types();
    for packet_type in PacketType::REQUESTS {
        if !registered.contains(&packet_type) {
            tracing::warn!(%packet_type, "gate admits a packet type with no registered handler");
            if FAIL_FAST_ON_MISMATCH {
                return Err(NextRouteError::BadRequest(format!(
                    "no handler registered for {packet_type}"
                )));
            }
        }
    }
    Ok(())
}
