//! Route matrix snapshot.
//!
//! Loaded from a JSON document written by the relay fleet optimizer:
//!
//! ```json
//! { "created_at": 1700000000,
//!   "relays": [{ "id": 1, "name": "iad.a", "address": "10.0.0.1:40000",
//!                "public_key": "<base64>", "datacenter_id": 7,
//!                "latitude": 38.9, "longitude": -77.4 }],
//!   "routes": [{ "cost": 12, "relays": [0, 3, 5] }] }
//! ```
//!
//! A route lists relay indices from the near (source) relay to the
//! destination relay and can be walked in either direction.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;

use nextroute_core::error::{NextRouteError, Result};
use nextroute_core::protocol::constants::{COST_BIAS, KEY_BYTES, MAX_NEAR_RELAY_RTT, MAX_RELAYS_PER_ROUTE};

use crate::context::SnapshotCell;
use crate::crypto;

/// Costs at or above this mark a near relay as unroutable.
pub const UNROUTABLE_COST: i32 = MAX_NEAR_RELAY_RTT as i32;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixDoc {
    created_at: u64,
    #[serde(default)]
    relays: Vec<RelayDoc>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelayDoc {
    id: u64,
    #[serde(default)]
    name: String,
    address: SocketAddr,
    public_key: String,
    datacenter_id: u64,
    #[serde(default)]
    latitude: f32,
    #[serde(default)]
    longitude: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    pub id: u64,
    pub name: String,
    pub address: SocketAddr,
    /// x25519 key route tokens for this hop are sealed to.
    pub public_key: [u8; KEY_BYTES],
    pub datacenter_id: u64,
    pub latitude: f32,
    pub longitude: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    pub cost: i32,
    pub relays: Vec<usize>,
}

/// A near relay the client can reach, by topology index, with its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRelay {
    pub index: usize,
    pub cost: i32,
}

impl SourceRelay {
    pub fn routable(&self) -> bool {
        self.cost > 0 && self.cost < UNROUTABLE_COST
    }
}

/// A concrete route oriented from the near relay to the destination.
/// `cost` includes the near relay cost and the cost bias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub cost: i32,
    pub relays: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct RouteMatrix {
    created_at: u64,
    relays: Vec<Relay>,
    routes: Vec<Route>,
    relay_id_to_index: HashMap<u64, usize>,
    /// Route indices keyed by `(min end, max end)`.
    routes_by_ends: HashMap<(usize, usize), Vec<usize>>,
}

fn ends_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl RouteMatrix {
    /// Initial state before the first load. Always stale.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(created_at: u64, relays: Vec<Relay>, routes: Vec<Route>) -> Result<Self> {
        let mut relay_id_to_index = HashMap::with_capacity(relays.len());
        for (index, relay) in relays.iter().enumerate() {
            if relay_id_to_index.insert(relay.id, index).is_some() {
                return Err(NextRouteError::BadRequest(format!(
                    "route matrix: duplicate relay id {}",
                    relay.id
                )));
            }
        }

        let mut routes_by_ends: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for (i, route) in routes.iter().enumerate() {
            if route.relays.is_empty() || route.relays.len() > MAX_RELAYS_PER_ROUTE {
                return Err(NextRouteError::BadRequest(format!(
                    "route matrix: route {i} has {} relays, must be 1..={MAX_RELAYS_PER_ROUTE}",
                    route.relays.len()
                )));
            }
            if route.cost < 0 {
                return Err(NextRouteError::BadRequest(format!(
                    "route matrix: route {i} has negative cost"
                )));
            }
            if let Some(bad) = route.relays.iter().find(|&&r| r >= relays.len()) {
                return Err(NextRouteError::BadRequest(format!(
                    "route matrix: route {i} refers to relay index {bad} of {}",
                    relays.len()
                )));
            }
            let (first, last) = match (route.relays.first(), route.relays.last()) {
                (Some(f), Some(l)) => (*f, *l),
                _ => continue,
            };
            routes_by_ends
                .entry(ends_key(first, last))
                .or_default()
                .push(i);
        }

        Ok(Self {
            created_at,
            relays,
            routes,
            relay_id_to_index,
            routes_by_ends,
        })
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let doc: MatrixDoc = serde_json::from_str(s)
            .map_err(|e| NextRouteError::BadRequest(format!("invalid route matrix json: {e}")))?;

        let relays = doc
            .relays
            .into_iter()
            .map(|r| {
                let what = format!("route matrix relay {} public_key", r.id);
                Ok(Relay {
                    id: r.id,
                    name: r.name,
                    address: r.address,
                    public_key: crypto::decode_key(&what, &r.public_key)?,
                    datacenter_id: r.datacenter_id,
                    latitude: r.latitude,
                    longitude: r.longitude,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(doc.created_at, relays, doc.routes)
    }

    pub fn load_file(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .map_err(|e| NextRouteError::Internal(format!("read route matrix failed ({path}): {e}")))?;
        Self::from_json(&s)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn is_stale(&self, now: u64, threshold_secs: u64) -> bool {
        self.created_at.saturating_add(threshold_secs) < now
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    pub fn relay(&self, index: usize) -> Option<&Relay> {
        self.relays.get(index)
    }

    pub fn relay_index(&self, relay_id: u64) -> Option<usize> {
        self.relay_id_to_index.get(&relay_id).copied()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Relays located in the datacenter, usable as route destinations.
    pub fn dest_relays(&self, datacenter_id: u64) -> Vec<usize> {
        self.relays
            .iter()
            .enumerate()
            .filter(|(_, r)| r.datacenter_id == datacenter_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Map relay ids to indices. `None` when any id is gone.
    pub fn reframe_route(&self, relay_ids: &[u64]) -> Option<Vec<usize>> {
        relay_ids.iter().map(|id| self.relay_index(*id)).collect()
    }

    pub fn relay_ids(&self, indices: &[usize]) -> Vec<u64> {
        indices
            .iter()
            .filter_map(|&i| self.relays.get(i).map(|r| r.id))
            .collect()
    }

    /// Routes between two relays, oriented `source -> dest`, with their cost.
    fn routes_between(&self, source: usize, dest: usize) -> impl Iterator<Item = (i32, Vec<usize>)> + '_ {
        self.routes_by_ends
            .get(&ends_key(source, dest))
            .into_iter()
            .flatten()
            .filter_map(move |&i| {
                let route = self.routes.get(i)?;
                if route.relays.first() == Some(&source) {
                    Some((route.cost, route.relays.clone()))
                } else {
                    Some((route.cost, route.relays.iter().rev().copied().collect()))
                }
            })
    }

    /// Cheapest route from any routable source relay to any destination,
    /// not more expensive than `max_cost`. Ties go to the shorter route,
    /// then to the lower relay indices.
    pub fn best_route(
        &self,
        sources: &[SourceRelay],
        dests: &[usize],
        max_cost: i32,
    ) -> Option<RouteCandidate> {
        let mut best: Option<RouteCandidate> = None;
        for source in sources.iter().filter(|s| s.routable()) {
            for &dest in dests {
                if dest == source.index {
                    continue;
                }
                for (route_cost, relays) in self.routes_between(source.index, dest) {
                    let cost = source.cost.saturating_add(route_cost).saturating_add(COST_BIAS);
                    if cost > max_cost {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some(b) => (cost, relays.len(), &relays) < (b.cost, b.relays.len(), &b.relays),
                    };
                    if better {
                        best = Some(RouteCandidate { cost, relays });
                    }
                }
            }
        }
        best
    }

    /// Cost of the cheapest route with no ceiling.
    pub fn best_route_cost(&self, sources: &[SourceRelay], dests: &[usize]) -> Option<i32> {
        self.best_route(sources, dests, i32::MAX).map(|r| r.cost)
    }

    /// Current cost of an existing route, or `None` when it can no longer be
    /// used: its near relay is unroutable, or the route left the matrix.
    pub fn current_route_cost(&self, route: &[usize], sources: &[SourceRelay]) -> Option<i32> {
        let (&first, &last) = (route.first()?, route.last()?);
        if first == last {
            return None;
        }
        let source = sources.iter().find(|s| s.index == first && s.routable())?;
        self.routes_between(first, last)
            .find(|(_, relays)| relays.as_slice() == route)
            .map(|(cost, _)| source.cost.saturating_add(cost).saturating_add(COST_BIAS))
    }
}

/// Read side of the topology snapshot.
pub trait TopologySource: Send + Sync {
    fn current(&self) -> Arc<RouteMatrix>;
}

impl TopologySource for SnapshotCell<RouteMatrix> {
    fn current(&self) -> Arc<RouteMatrix> {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn relay(id: u64, dc: u64) -> Relay {
        Relay {
            id,
            name: format!("r{id}"),
            address: format!("10.0.0.{id}:40000").parse().unwrap(),
            public_key: [id as u8; 32],
            datacenter_id: dc,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    fn matrix() -> RouteMatrix {
        // 0,1 near the client; 2,3 in datacenter 9
        RouteMatrix::new(
            1_000,
            vec![relay(10, 1), relay(11, 1), relay(12, 9), relay(13, 9)],
            vec![
                Route { cost: 40, relays: vec![0, 2] },
                Route { cost: 30, relays: vec![3, 1] },
                Route { cost: 25, relays: vec![0, 1, 3] },
            ],
        )
        .unwrap()
    }

    #[test]
    fn picks_cheapest_route_in_either_direction() {
        let m = matrix();
        let sources = [SourceRelay { index: 0, cost: 10 }, SourceRelay { index: 1, cost: 2 }];
        let best = m.best_route(&sources, &m.dest_relays(9), i32::MAX).unwrap();
        assert_eq!(best.relays, vec![1, 3]);
        assert_eq!(best.cost, 2 + 30 + COST_BIAS);

        assert!(m.best_route(&sources, &[2, 3], 20).is_none());
    }

    #[test]
    fn unroutable_sources_are_skipped() {
        let m = matrix();
        let sources = [SourceRelay { index: 1, cost: UNROUTABLE_COST }, SourceRelay { index: 0, cost: 5 }];
        let best = m.best_route(&sources, &[2, 3], i32::MAX).unwrap();
        assert_eq!(best.relays, vec![0, 1, 3]);
        assert_eq!(m.best_route_cost(&sources, &[2, 3]), Some(5 + 25 + COST_BIAS));
    }

    #[test]
    fn current_route_cost_requires_exact_route() {
        let m = matrix();
        let sources = [SourceRelay { index: 0, cost: 5 }];
        assert_eq!(m.current_route_cost(&[0, 2], &sources), Some(5 + 40 + COST_BIAS));
        assert_eq!(m.current_route_cost(&[0, 3], &sources), None);
        assert_eq!(m.current_route_cost(&[1, 3], &sources), None);
    }

    #[test]
    fn staleness_and_reframing() {
        let m = matrix();
        assert!(!m.is_stale(1_030, 30));
        assert!(m.is_stale(1_031, 30));
        assert!(RouteMatrix::empty().is_stale(31, 30));

        assert_eq!(m.reframe_route(&[10, 13]), Some(vec![0, 3]));
        assert_eq!(m.reframe_route(&[10, 99]), None);
        assert_eq!(m.relay_ids(&[1, 2]), vec![11, 12]);
    }

    #[test]
    fn rejects_bad_documents() {
        let bad_index = r#"{"created_at": 1, "relays": [], "routes": [{"cost": 1, "relays": [0]}]}"#;
        assert_eq!(
            RouteMatrix::from_json(bad_index).unwrap_err().code().as_str(),
            "BAD_REQUEST"
        );
        assert!(RouteMatrix::from_json(r#"{"created_at": 1, "extra": 2}"#).is_err());
    }
}
