//! Near relays: choosing which relays a new session pings, and turning the
//! pings it reports back into routable source costs.

use nextroute_core::protocol::constants::JITTER_THRESHOLD;
use nextroute_core::protocol::packets::NearRelaySample;
use nextroute_core::protocol::session_data::HeldNearRelay;

use super::matrix::{RouteMatrix, SourceRelay, UNROUTABLE_COST};

/// Picks the relays a session should ping, by topology index.
pub trait NearRelaySelector: Send + Sync {
    fn select(&self, matrix: &RouteMatrix, latitude: f32, longitude: f32, max: usize) -> Vec<usize>;
}

/// Closest relays by great-circle distance.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosestRelays;

const EARTH_RADIUS_KM: f64 = 6371.0;

fn haversine_km(lat1: f32, lon1: f32, lat2: f32, lon2: f32) -> f64 {
    let (lat1, lon1) = (f64::from(lat1).to_radians(), f64::from(lon1).to_radians());
    let (lat2, lon2) = (f64::from(lat2).to_radians(), f64::from(lon2).to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

impl NearRelaySelector for ClosestRelays {
    fn select(&self, matrix: &RouteMatrix, latitude: f32, longitude: f32, max: usize) -> Vec<usize> {
        let mut by_distance: Vec<(f64, usize)> = matrix
            .relays()
            .iter()
            .enumerate()
            .map(|(i, r)| (haversine_km(latitude, longitude, r.latitude, r.longitude), i))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        by_distance.into_iter().take(max).map(|(_, i)| i).collect()
    }
}

/// A reported (or held) near relay after reframing against the snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearRelayCost {
    pub id: u64,
    /// `None` when the relay is no longer in the topology.
    pub index: Option<usize>,
    pub rtt: i32,
    pub jitter: i32,
    /// RTT if the relay may start a route, else the unroutable cost.
    pub cost: i32,
}

impl NearRelayCost {
    pub fn routable(&self) -> bool {
        self.index.is_some() && self.cost > 0 && self.cost < UNROUTABLE_COST
    }
}

/// Reframe reported pings. A relay becomes unroutable when it left the
/// topology, reports no RTT, loses half its packets, is slower than direct,
/// or jitters well above direct or above the other surviving relays.
pub fn reframe_near_relays(
    matrix: &RouteMatrix,
    samples: &[NearRelaySample],
    direct_rtt: f32,
    direct_jitter: f32,
) -> Vec<NearRelayCost> {
    let direct_rtt = direct_rtt.ceil() as i32;
    let direct_jitter = (direct_jitter.ceil() as i32).min(UNROUTABLE_COST);

    let mut out: Vec<NearRelayCost> = samples
        .iter()
        .map(|s| {
            let index = matrix.relay_index(s.id);
            let rtt = (s.rtt as i32).min(UNROUTABLE_COST);
            let jitter = (s.jitter as i32).min(UNROUTABLE_COST);
            let unroutable = index.is_none()
                || rtt <= 0
                || s.packet_loss >= 50.0
                || rtt > direct_rtt + 10
                || jitter > direct_jitter + JITTER_THRESHOLD;
            NearRelayCost {
                id: s.id,
                index,
                rtt,
                jitter,
                cost: if unroutable { UNROUTABLE_COST } else { rtt },
            }
        })
        .collect();

    let survivors: Vec<i32> = out
        .iter()
        .filter(|c| c.cost != UNROUTABLE_COST)
        .map(|c| c.jitter)
        .collect();
    if !survivors.is_empty() {
        let total: i64 = survivors.iter().map(|&j| i64::from(j)).sum();
        let count = survivors.len() as i64;
        let mean = ((total + count - 1) / count) as i32;
        for c in out.iter_mut() {
            if c.cost != UNROUTABLE_COST && c.jitter > mean + JITTER_THRESHOLD {
                c.cost = UNROUTABLE_COST;
            }
        }
    }
    out
}

/// Costs frozen when pings were held, re-resolved against the snapshot.
pub fn held_near_relays(matrix: &RouteMatrix, held: &[HeldNearRelay]) -> Vec<NearRelayCost> {
    held.iter()
        .map(|h| {
            let index = matrix.relay_index(h.id);
            let rtt = (h.rtt as i32).min(UNROUTABLE_COST);
            NearRelayCost {
                id: h.id,
                index,
                rtt,
                jitter: 0,
                cost: if index.is_none() || rtt <= 0 { UNROUTABLE_COST } else { rtt },
            }
        })
        .collect()
}

/// The routable subset as route sources.
pub fn source_relays(costs: &[NearRelayCost]) -> Vec<SourceRelay> {
    costs
        .iter()
        .filter(|c| c.routable())
        .filter_map(|c| c.index.map(|index| SourceRelay { index, cost: c.cost }))
        .collect()
}
