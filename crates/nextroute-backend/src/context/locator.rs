//! IP geolocation seam.

use std::net::SocketAddr;

pub trait Locator: Send + Sync {
    /// `(latitude, longitude)` of the address, if known.
    fn locate(&self, addr: &SocketAddr) -> Option<(f32, f32)>;
}

/// Answers every lookup with one configured location.
pub struct StaticLocator {
    latitude: f32,
    longitude: f32,
}

impl StaticLocator {
    pub fn new(latitude: f32, longitude: f32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl Locator for StaticLocator {
    fn locate(&self, _addr: &SocketAddr) -> Option<(f32, f32)> {
        Some((self.latitude, self.longitude))
    }
}
