use std::collections::HashSet;

use ed25519_dalek::VerifyingKey;

use nextroute_core::error::Result;

use crate::config::{BuyerConfig, DatacenterConfig, InternalConfig, RouteShader};
use crate::crypto;

/// Compiled buyer (tenant) record.
/// Construct once per directory load, then share via Arc.
#[derive(Debug, Clone)]
pub struct Buyer {
    pub id: u64,
    pub name: String,
    pub live: bool,
    pub debug: bool,
    pub public_key: VerifyingKey,
    pub opt_out_tag: Option<u64>,
    enabled_datacenters: HashSet<u64>,
    pub route_shader: RouteShader,
    pub internal: InternalConfig,
}

impl Buyer {
    pub fn from_config(cfg: &BuyerConfig) -> Result<Self> {
        let what = format!("buyers[{}].public_key", cfg.id);
        Ok(Self {
            id: cfg.id,
            name: cfg.name.clone(),
            live: cfg.live,
            debug: cfg.debug,
            public_key: crypto::verifying_key(&what, &cfg.public_key)?,
            opt_out_tag: cfg.opt_out_tag,
            enabled_datacenters: cfg.datacenters.iter().copied().collect(),
            route_shader: cfg.route_shader.clone(),
            internal: cfg.internal.clone(),
        })
    }

    /// Build a record directly (tests and tooling).
    pub fn new(id: u64, public_key: VerifyingKey) -> Self {
        Self {
            id,
            name: String::new(),
            live: true,
            debug: false,
            public_key,
            opt_out_tag: None,
            enabled_datacenters: HashSet::new(),
            route_shader: RouteShader::default(),
            internal: InternalConfig::default(),
        }
    }

    pub fn enable_datacenter(&mut self, datacenter_id: u64) {
        self.enabled_datacenters.insert(datacenter_id);
    }

    /// Whether acceleration is enabled for this buyer in the datacenter.
    pub fn datacenter_enabled(&self, datacenter_id: u64) -> bool {
        self.enabled_datacenters.contains(&datacenter_id)
    }

    pub fn opted_out(&self, tags: &[u64]) -> bool {
        self.opt_out_tag.is_some_and(|tag| tags.contains(&tag))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datacenter {
    pub id: u64,
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
}

impl From<&DatacenterConfig> for Datacenter {
    fn from(cfg: &DatacenterConfig) -> Self {
        Self {
            id: cfg.id,
            name: cfg.name.clone(),
            latitude: cfg.latitude,
            longitude: cfg.longitude,
        }
    }
}
