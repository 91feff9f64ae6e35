//! Backend config loader (strict parsing).

pub mod schema;

use std::fs;

use nextroute_core::error::{NextRouteError, Result};

pub use schema::{
    BackendConfig, BackendSection, BuyerConfig, DatacenterConfig, InternalConfig, KeysSection,
    LocationSection, RouteShader, TopologySection,
};

pub fn load_from_file(path: &str) -> Result<BackendConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| NextRouteError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BackendConfig> {
    let cfg: BackendConfig = serde_yaml::from_str(s)
        .map_err(|e| NextRouteError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
