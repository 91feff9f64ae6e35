use std::collections::HashSet;
use std::net::SocketAddr;

use serde::Deserialize;

use nextroute_core::error::{NextRouteError, Result};
use nextroute_core::protocol::constants::MAX_NEAR_RELAYS;
use nextroute_core::protocol::SdkVersion;

use crate::crypto;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub version: u32,

    #[serde(default)]
    pub backend: BackendSection,

    pub keys: KeysSection,

    #[serde(default)]
    pub topology: TopologySection,

    #[serde(default)]
    pub location: Option<LocationSection>,

    #[serde(default)]
    pub datacenters: Vec<DatacenterConfig>,

    #[serde(default)]
    pub buyers: Vec<BuyerConfig>,
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(NextRouteError::UnsupportedVersion(self.version));
        }

        self.backend.validate()?;
        self.keys.validate()?;
        self.topology.validate()?;
        if let Some(location) = &self.location {
            location.validate()?;
        }

        let mut dc_ids = HashSet::new();
        for dc in &self.datacenters {
            if !dc_ids.insert(dc.id) {
                return Err(NextRouteError::BadRequest(format!(
                    "datacenters: duplicate id {}",
                    dc.id
                )));
            }
        }

        let mut buyer_ids = HashSet::new();
        for buyer in &self.buyers {
            if !buyer_ids.insert(buyer.id) {
                return Err(NextRouteError::BadRequest(format!(
                    "buyers: duplicate id {}",
                    buyer.id
                )));
            }
            buyer.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address SDKs send to. Packet filters are computed against it, so it
    /// must be a concrete IP even when `listen` is a wildcard.
    #[serde(default = "default_public_address")]
    pub public_address: String,

    #[serde(default = "default_ops_listen")]
    pub ops_listen: String,

    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    #[serde(default = "default_route_matrix_stale_secs")]
    pub route_matrix_stale_secs: u64,

    #[serde(default = "default_long_update_ms")]
    pub long_update_ms: u64,

    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    #[serde(default = "default_max_near_relays")]
    pub max_near_relays: usize,

    #[serde(default = "default_minimum_sdk_version")]
    pub minimum_sdk_version: String,

    #[serde(default = "default_magic_rotation_secs")]
    pub magic_rotation_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_address: default_public_address(),
            ops_listen: default_ops_listen(),
            max_packet_bytes: default_max_packet_bytes(),
            route_matrix_stale_secs: default_route_matrix_stale_secs(),
            long_update_ms: default_long_update_ms(),
            sink_capacity: default_sink_capacity(),
            max_near_relays: default_max_near_relays(),
            minimum_sdk_version: default_minimum_sdk_version(),
            magic_rotation_secs: default_magic_rotation_secs(),
        }
    }
}

impl BackendSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.public_addr()?;
        self.ops_listen_addr()?;
        self.min_sdk_version()?;

        if !(512..=65507).contains(&self.max_packet_bytes) {
            return Err(NextRouteError::BadRequest(
                "backend.max_packet_bytes must be between 512 and 65507".into(),
            ));
        }
        if !(1..=3600).contains(&self.route_matrix_stale_secs) {
            return Err(NextRouteError::BadRequest(
                "backend.route_matrix_stale_secs must be between 1 and 3600".into(),
            ));
        }
        if !(1..=10_000).contains(&self.long_update_ms) {
            return Err(NextRouteError::BadRequest(
                "backend.long_update_ms must be between 1 and 10000".into(),
            ));
        }
        if !(1..=1_000_000).contains(&self.sink_capacity) {
            return Err(NextRouteError::BadRequest(
                "backend.sink_capacity must be between 1 and 1000000".into(),
            ));
        }
        if !(1..=MAX_NEAR_RELAYS).contains(&self.max_near_relays) {
            return Err(NextRouteError::BadRequest(format!(
                "backend.max_near_relays must be between 1 and {MAX_NEAR_RELAYS}"
            )));
        }
        if !(1..=86_400).contains(&self.magic_rotation_secs) {
            return Err(NextRouteError::BadRequest(
                "backend.magic_rotation_secs must be between 1 and 86400".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            NextRouteError::BadRequest(format!("backend.listen must be a socket address: {e}"))
        })
    }

    pub fn public_addr(&self) -> Result<SocketAddr> {
        let addr: SocketAddr = self.public_address.parse().map_err(|e| {
            NextRouteError::BadRequest(format!("backend.public_address must be a socket address: {e}"))
        })?;
        if addr.ip().is_unspecified() || addr.port() == 0 {
            return Err(NextRouteError::BadRequest(format!(
                "backend.public_address must name a concrete ip and port, got {addr}"
            )));
        }
        Ok(addr)
    }

    pub fn ops_listen_addr(&self) -> Result<SocketAddr> {
        self.ops_listen.parse().map_err(|e| {
            NextRouteError::BadRequest(format!("backend.ops_listen must be a socket address: {e}"))
        })
    }

    pub fn min_sdk_version(&self) -> Result<SdkVersion> {
        self.minimum_sdk_version.parse()
    }
}

fn default_listen() -> String {
    "0.0.0.0:40000".into()
}
fn default_public_address() -> String {
    "127.0.0.1:40000".into()
}
fn default_ops_listen() -> String {
    "0.0.0.0:8081".into()
}
fn default_max_packet_bytes() -> usize {
    4096
}
fn default_route_matrix_stale_secs() -> u64 {
    30
}
fn default_long_update_ms() -> u64 {
    100
}
fn default_sink_capacity() -> usize {
    1024
}
fn default_max_near_relays() -> usize {
    16
}
fn default_minimum_sdk_version() -> String {
    "5.0.0".into()
}
fn default_magic_rotation_secs() -> u64 {
    60
}

/// Base64 encoded 32-byte keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysSection {
    pub backend_private_key: String,
    pub routing_private_key: String,
    pub ping_key: String,
}

impl KeysSection {
    pub fn validate(&self) -> Result<()> {
        crypto::decode_key("keys.backend_private_key", &self.backend_private_key)?;
        crypto::decode_key("keys.routing_private_key", &self.routing_private_key)?;
        crypto::decode_key("keys.ping_key", &self.ping_key)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologySection {
    #[serde(default = "default_topology_path")]
    pub path: String,

    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for TopologySection {
    fn default() -> Self {
        Self {
            path: default_topology_path(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl TopologySection {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(NextRouteError::BadRequest("topology.path must not be empty".into()));
        }
        if !(1..=3600).contains(&self.refresh_secs) {
            return Err(NextRouteError::BadRequest(
                "topology.refresh_secs must be between 1 and 3600".into(),
            ));
        }
        Ok(())
    }
}

fn default_topology_path() -> String {
    "route_matrix.json".into()
}
fn default_refresh_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationSection {
    pub latitude: f32,
    pub longitude: f32,
}

impl LocationSection {
    pub fn validate(&self) -> Result<()> {
        check_coordinates("location", self.latitude, self.longitude)
    }
}

fn check_coordinates(what: &str, latitude: f32, longitude: f32) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(NextRouteError::BadRequest(format!(
            "{what}.latitude must be between -90 and 90"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(NextRouteError::BadRequest(format!(
            "{what}.longitude must be between -180 and 180"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatacenterConfig {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub latitude: f32,
    #[serde(default)]
    pub longitude: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuyerConfig {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_live")]
    pub live: bool,
    #[serde(default)]
    pub debug: bool,
    pub public_key: String,
    #[serde(default)]
    pub opt_out_tag: Option<u64>,
    /// Datacenters with acceleration enabled for this buyer.
    #[serde(default)]
    pub datacenters: Vec<u64>,
    #[serde(default)]
    pub route_shader: RouteShader,
    #[serde(default)]
    pub internal: InternalConfig,
}

impl BuyerConfig {
    pub fn validate(&self) -> Result<()> {
        let what = format!("buyers[{}].public_key", self.id);
        crypto::decode_key(&what, &self.public_key)?;
        self.route_shader.validate(self.id)?;
        self.internal.validate(self.id)
    }
}

fn default_live() -> bool {
    true
}

/// Buyer level routing policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteShader {
    #[serde(default)]
    pub disable_network_next: bool,
    #[serde(default)]
    pub analysis_only: bool,
    #[serde(default = "default_selection_percent")]
    pub selection_percent: u32,
    #[serde(default)]
    pub ab_test: bool,
    #[serde(default)]
    pub force_next: bool,
    #[serde(default = "default_true")]
    pub reduce_latency: bool,
    #[serde(default = "default_true")]
    pub reduce_packet_loss: bool,
    #[serde(default)]
    pub multipath: bool,
    #[serde(default)]
    pub acceptable_latency: i32,
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold: i32,
    #[serde(default = "default_acceptable_packet_loss")]
    pub acceptable_packet_loss: f32,
    #[serde(default = "default_bandwidth_envelope_kbps")]
    pub bandwidth_envelope_up_kbps: u32,
    #[serde(default = "default_bandwidth_envelope_kbps")]
    pub bandwidth_envelope_down_kbps: u32,
}

impl Default for RouteShader {
    fn default() -> Self {
        Self {
            disable_network_next: false,
            analysis_only: false,
            selection_percent: default_selection_percent(),
            ab_test: false,
            force_next: false,
            reduce_latency: true,
            reduce_packet_loss: true,
            multipath: false,
            acceptable_latency: 0,
            latency_threshold: default_latency_threshold(),
            acceptable_packet_loss: default_acceptable_packet_loss(),
            bandwidth_envelope_up_kbps: default_bandwidth_envelope_kbps(),
            bandwidth_envelope_down_kbps: default_bandwidth_envelope_kbps(),
        }
    }
}

impl RouteShader {
    pub fn validate(&self, buyer_id: u64) -> Result<()> {
        if self.selection_percent > 100 {
            return Err(NextRouteError::BadRequest(format!(
                "buyers[{buyer_id}].route_shader.selection_percent must be between 0 and 100"
            )));
        }
        if !(0..=1000).contains(&self.acceptable_latency) {
            return Err(NextRouteError::BadRequest(format!(
                "buyers[{buyer_id}].route_shader.acceptable_latency must be between 0 and 1000"
            )));
        }
        if !(0..=1000).contains(&self.latency_threshold) {
            return Err(NextRouteError::BadRequest(format!(
                "buyers[{buyer_id}].route_shader.latency_threshold must be between 0 and 1000"
            )));
        }
        if !(0.0..=100.0).contains(&self.acceptable_packet_loss) {
            return Err(NextRouteError::BadRequest(format!(
                "buyers[{buyer_id}].route_shader.acceptable_packet_loss must be between 0 and 100"
            )));
        }
        Ok(())
    }
}

fn default_selection_percent() -> u32 {
    100
}
fn default_true() -> bool {
    true
}
fn default_latency_threshold() -> i32 {
    10
}
fn default_acceptable_packet_loss() -> f32 {
    1.0
}
fn default_bandwidth_envelope_kbps() -> u32 {
    1024
}

/// Per buyer tuning knobs for the route decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternalConfig {
    #[serde(default = "default_route_select_threshold")]
    pub route_select_threshold: i32,
    #[serde(default = "default_route_switch_threshold")]
    pub route_switch_threshold: i32,
    #[serde(default = "default_max_latency_trade_off")]
    pub max_latency_trade_off: i32,
    #[serde(default = "default_rtt_veto_default")]
    pub rtt_veto_default: i32,
    #[serde(default = "default_rtt_veto_packet_loss")]
    pub rtt_veto_packet_loss: i32,
    #[serde(default = "default_rtt_veto_multipath")]
    pub rtt_veto_multipath: i32,
    #[serde(default = "default_multipath_overload_threshold")]
    pub multipath_overload_threshold: i32,
    #[serde(default = "default_multipath_threshold")]
    pub multipath_threshold: i32,
    #[serde(default = "default_max_rtt")]
    pub max_rtt: i32,
    #[serde(default)]
    pub uncommitted: bool,
    #[serde(default)]
    pub large_customer: bool,
    #[serde(default = "default_true")]
    pub high_frequency_pings: bool,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            route_select_threshold: default_route_select_threshold(),
            route_switch_threshold: default_route_switch_threshold(),
            max_latency_trade_off: default_max_latency_trade_off(),
            rtt_veto_default: default_rtt_veto_default(),
            rtt_veto_packet_loss: default_rtt_veto_packet_loss(),
            rtt_veto_multipath: default_rtt_veto_multipath(),
            multipath_overload_threshold: default_multipath_overload_threshold(),
            multipath_threshold: default_multipath_threshold(),
            max_rtt: default_max_rtt(),
            uncommitted: false,
            large_customer: false,
            high_frequency_pings: true,
        }
    }
}

impl InternalConfig {
    pub fn validate(&self, buyer_id: u64) -> Result<()> {
        let checks = [
            ("route_select_threshold", self.route_select_threshold, 0, 1000),
            ("route_switch_threshold", self.route_switch_threshold, 0, 1000),
            ("max_latency_trade_off", self.max_latency_trade_off, 0, 1000),
            ("rtt_veto_default", self.rtt_veto_default, -1000, 1000),
            ("rtt_veto_packet_loss", self.rtt_veto_packet_loss, -1000, 1000),
            ("rtt_veto_multipath", self.rtt_veto_multipath, -1000, 1000),
            ("multipath_overload_threshold", self.multipath_overload_threshold, 1, 10_000),
            ("multipath_threshold", self.multipath_threshold, 0, 10_000),
            ("max_rtt", self.max_rtt, 1, 10_000),
        ];
        for (name, value, min, max) in checks {
            if !(min..=max).contains(&value) {
                return Err(NextRouteError::BadRequest(format!(
                    "buyers[{buyer_id}].internal.{name} must be between {min} and {max}"
                )));
            }
        }
        Ok(())
    }
}

fn default_route_select_threshold() -> i32 {
    2
}
fn default_route_switch_threshold() -> i32 {
    5
}
fn default_max_latency_trade_off() -> i32 {
    20
}
fn default_rtt_veto_default() -> i32 {
    -10
}
fn default_rtt_veto_packet_loss() -> i32 {
    -30
}
fn default_rtt_veto_multipath() -> i32 {
    -20
}
fn default_multipath_overload_threshold() -> i32 {
    500
}
fn default_multipath_threshold() -> i32 {
    25
}
fn default_max_rtt() -> i32 {
    300
}
