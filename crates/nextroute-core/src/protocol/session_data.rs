//! `SessionData`: the per-session record the backend hands back to the game
//! server every slice instead of storing it.
//!
//! The record is an independent, self-versioned document. Its version byte is
//! checked before anything else is interpreted, so a blob written by a future
//! backend fails cleanly instead of being misread.

use super::bitstream::{BitReader, BitWriter};
use super::constants::{
    INVALID_ROUTE_VALUE, MAX_NEAR_RELAYS, MAX_NEAR_RELAY_RTT, MAX_RELAYS_PER_ROUTE,
    MAX_SESSION_DATA_BYTES, SESSION_DATA_VERSION_MAX, SESSION_DATA_VERSION_MIN,
    SESSION_DATA_VERSION_WRITE,
};
use crate::error::{NextRouteError, Result};

/// Upper bound of the small saturating counters kept in `RouteState`.
pub const MAX_ROUTE_COUNTER: u32 = 3;

/// Route decision state carried from slice to slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteState {
    pub next: bool,
    pub veto: bool,
    pub disabled: bool,
    pub not_selected: bool,
    pub ab_test: bool,
    pub a: bool,
    pub b: bool,
    pub forced_next: bool,
    pub reduce_latency: bool,
    pub reduce_packet_loss: bool,
    pub multipath: bool,
    pub committed: bool,
    pub latency_worse: bool,
    pub location_veto: bool,
    pub no_route: bool,
    pub next_latency_too_high: bool,
    pub mispredict: bool,
    pub opt_out: bool,
    pub route_lost: bool,
    pub mispredict_counter: u32,
    pub latency_worse_counter: u32,
}

impl RouteState {
    /// Force the session off the accelerated path for the rest of its life.
    /// `veto` and `committed` are never set together.
    pub fn apply_veto(&mut self) {
        self.next = false;
        self.committed = false;
        self.veto = true;
    }

    fn flags(&self) -> [bool; 19] {
        [
            self.next,
            self.veto,
            self.disabled,
            self.not_selected,
            self.ab_test,
            self.a,
            self.b,
            self.forced_next,
            self.reduce_latency,
            self.reduce_packet_loss,
            self.multipath,
            self.committed,
            self.latency_worse,
            self.location_veto,
            self.no_route,
            self.next_latency_too_high,
            self.mispredict,
            self.opt_out,
            self.route_lost,
        ]
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        for flag in self.flags() {
            w.write_bool(flag)?;
        }
        w.write_integer(self.mispredict_counter, 0, MAX_ROUTE_COUNTER)?;
        w.write_integer(self.latency_worse_counter, 0, MAX_ROUTE_COUNTER)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let mut s = RouteState::default();
        for flag in [
            &mut s.next,
            &mut s.veto,
            &mut s.disabled,
            &mut s.not_selected,
            &mut s.ab_test,
            &mut s.a,
            &mut s.b,
            &mut s.forced_next,
            &mut s.reduce_latency,
            &mut s.reduce_packet_loss,
            &mut s.multipath,
            &mut s.committed,
            &mut s.latency_worse,
            &mut s.location_veto,
            &mut s.no_route,
            &mut s.next_latency_too_high,
            &mut s.mispredict,
            &mut s.opt_out,
            &mut s.route_lost,
        ] {
            *flag = r.read_bool()?;
        }
        s.mispredict_counter = r.read_integer(0, MAX_ROUTE_COUNTER)?;
        s.latency_worse_counter = r.read_integer(0, MAX_ROUTE_COUNTER)?;
        Ok(s)
    }
}

/// Near relay cost frozen once a large customer stops pinging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldNearRelay {
    pub id: u64,
    pub rtt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub version: u32,
    pub session_id: u64,
    pub session_version: u8,
    pub slice_number: u32,
    pub expire_timestamp: u64,
    pub start_timestamp: u64,
    pub latitude: f32,
    pub longitude: f32,
    pub route_changed: bool,
    pub route_cost: u32,
    /// Current path, near relay first. Empty when direct.
    pub route_relay_ids: Vec<u64>,
    pub route_state: RouteState,
    pub fallback_to_direct: bool,
    pub prev_packets_sent_client_to_server: u64,
    pub prev_packets_sent_server_to_client: u64,
    pub prev_packets_lost_client_to_server: u64,
    pub prev_packets_lost_server_to_client: u64,
    pub prev_packets_out_of_order_client_to_server: u64,
    pub prev_packets_out_of_order_server_to_client: u64,
    /// `Some` once near relay pings are held; may hold zero relays.
    pub held_near_relays: Option<Vec<HeldNearRelay>>,
    pub write_summary: bool,
    pub wrote_summary: bool,
    pub envelope_bytes_up_sum: u64,
    pub envelope_bytes_down_sum: u64,
    pub session_duration: u32,
    pub duration_on_next: u32,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            version: SESSION_DATA_VERSION_WRITE,
            session_id: 0,
            session_version: 0,
            slice_number: 0,
            expire_timestamp: 0,
            start_timestamp: 0,
            latitude: 0.0,
            longitude: 0.0,
            route_changed: false,
            route_cost: 0,
            route_relay_ids: Vec::new(),
            route_state: RouteState::default(),
            fallback_to_direct: false,
            prev_packets_sent_client_to_server: 0,
            prev_packets_sent_server_to_client: 0,
            prev_packets_lost_client_to_server: 0,
            prev_packets_lost_server_to_client: 0,
            prev_packets_out_of_order_client_to_server: 0,
            prev_packets_out_of_order_server_to_client: 0,
            held_near_relays: None,
            write_summary: false,
            wrote_summary: false,
            envelope_bytes_up_sum: 0,
            envelope_bytes_down_sum: 0,
            session_duration: 0,
            duration_on_next: 0,
        }
    }
}

impl SessionData {
    pub fn has_route(&self) -> bool {
        !self.route_relay_ids.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = BitWriter::new(MAX_SESSION_DATA_BYTES);
        self.write(&mut w)?;
        Ok(w.finish())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(data);
        Self::read(&mut r)
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_bits(self.version, 8)?;
        w.write_u64(self.session_id)?;
        w.write_u8(self.session_version)?;
        w.write_u32(self.slice_number)?;
        w.write_u64(self.expire_timestamp)?;
        w.write_u64(self.start_timestamp)?;
        w.write_f32(self.latitude)?;
        w.write_f32(self.longitude)?;
        w.write_bool(self.route_changed)?;
        w.write_integer(self.route_cost, 0, INVALID_ROUTE_VALUE)?;

        w.write_bool(self.has_route())?;
        if self.has_route() {
            let count = self.route_relay_ids.len();
            if count > MAX_RELAYS_PER_ROUTE {
                return Err(NextRouteError::OutOfRange(format!(
                    "route has {count} relays, max {MAX_RELAYS_PER_ROUTE}"
                )));
            }
            w.write_integer(count as u32, 1, MAX_RELAYS_PER_ROUTE as u32)?;
            for id in &self.route_relay_ids {
                w.write_u64(*id)?;
            }
        }

        self.route_state.write(w)?;
        w.write_bool(self.fallback_to_direct)?;

        w.write_u64(self.prev_packets_sent_client_to_server)?;
        w.write_u64(self.prev_packets_sent_server_to_client)?;
        w.write_u64(self.prev_packets_lost_client_to_server)?;
        w.write_u64(self.prev_packets_lost_server_to_client)?;
        w.write_u64(self.prev_packets_out_of_order_client_to_server)?;
        w.write_u64(self.prev_packets_out_of_order_server_to_client)?;

        w.write_bool(self.held_near_relays.is_some())?;
        if let Some(held) = &self.held_near_relays {
            if held.len() > MAX_NEAR_RELAYS {
                return Err(NextRouteError::OutOfRange(format!(
                    "{} held near relays, max {MAX_NEAR_RELAYS}",
                    held.len()
                )));
            }
            w.write_integer(held.len() as u32, 0, MAX_NEAR_RELAYS as u32)?;
            for relay in held {
                w.write_u64(relay.id)?;
                w.write_integer(relay.rtt, 0, MAX_NEAR_RELAY_RTT)?;
            }
        }

        w.write_bool(self.write_summary)?;
        w.write_bool(self.wrote_summary)?;
        w.write_u64(self.envelope_bytes_up_sum)?;
        w.write_u64(self.envelope_bytes_down_sum)?;
        w.write_u32(self.session_duration)?;
        w.write_u32(self.duration_on_next)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let version = r.read_bits(8)?;
        if !(SESSION_DATA_VERSION_MIN..=SESSION_DATA_VERSION_MAX).contains(&version) {
            return Err(NextRouteError::UnsupportedVersion(version));
        }

        let session_id = r.read_u64()?;
        let session_version = r.read_u8()?;
        let slice_number = r.read_u32()?;
        let expire_timestamp = r.read_u64()?;
        let start_timestamp = r.read_u64()?;
        let latitude = r.read_f32()?;
        let longitude = r.read_f32()?;
        let route_changed = r.read_bool()?;
        let route_cost = r.read_integer(0, INVALID_ROUTE_VALUE)?;

        let mut route_relay_ids = Vec::new();
        if r.read_bool()? {
            let count = r.read_integer(1, MAX_RELAYS_PER_ROUTE as u32)?;
            for _ in 0..count {
                route_relay_ids.push(r.read_u64()?);
            }
        }

        let route_state = RouteState::read(r)?;
        let fallback_to_direct = r.read_bool()?;

        let prev_packets_sent_client_to_server = r.read_u64()?;
        let prev_packets_sent_server_to_client = r.read_u64()?;
        let prev_packets_lost_client_to_server = r.read_u64()?;
        let prev_packets_lost_server_to_client = r.read_u64()?;
        let prev_packets_out_of_order_client_to_server = r.read_u64()?;
        let prev_packets_out_of_order_server_to_client = r.read_u64()?;

        let held_near_relays = if r.read_bool()? {
            let count = r.read_integer(0, MAX_NEAR_RELAYS as u32)?;
            let mut held = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let id = r.read_u64()?;
                let rtt = r.read_integer(0, MAX_NEAR_RELAY_RTT)?;
                held.push(HeldNearRelay { id, rtt });
            }
            Some(held)
        } else {
            None
        };

        Ok(Self {
            version,
            session_id,
            session_version,
            slice_number,
            expire_timestamp,
            start_timestamp,
            latitude,
            longitude,
            route_changed,
            route_cost,
            route_relay_ids,
            route_state,
            fallback_to_direct,
            prev_packets_sent_client_to_server,
            prev_packets_sent_server_to_client,
            prev_packets_lost_client_to_server,
            prev_packets_lost_server_to_client,
            prev_packets_out_of_order_client_to_server,
            prev_packets_out_of_order_server_to_client,
            held_near_relays,
            write_summary: r.read_bool()?,
            wrote_summary: r.read_bool()?,
            envelope_bytes_up_sum: r.read_u64()?,
            envelope_bytes_down_sum: r.read_u64()?,
            session_duration: r.read_u32()?,
            duration_on_next: r.read_u32()?,
        })
    }
}
