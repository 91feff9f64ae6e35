//! Outbound analytics and portal messages.
//!
//! Each message is a flat record emitted at most once per packet. The
//! publishers that consume them live outside this process; here they are
//! offered to a [`Sink`] and never block the packet path.

pub mod sink;

use std::net::SocketAddr;

use serde::Serialize;

use nextroute_core::protocol::packets::{NearRelaySample, RouteType};
use nextroute_core::protocol::SdkVersion;

pub use sink::{ChannelSink, MemorySink, MemorySinks, MessageReceivers, MessageSinks, Sink};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInitMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub sdk_version: SdkVersion,
    pub datacenter_id: u64,
    pub datacenter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub sdk_version: SdkVersion,
    pub datacenter_id: u64,
    pub match_id: u64,
    pub num_sessions: u32,
    pub server_address: SocketAddr,
}

/// Same shape as [`ServerUpdateMessage`], routed to the portal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortalServerUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub sdk_version: SdkVersion,
    pub datacenter_id: u64,
    pub match_id: u64,
    pub num_sessions: u32,
    pub server_address: SocketAddr,
}

impl From<&ServerUpdateMessage> for PortalServerUpdateMessage {
    fn from(m: &ServerUpdateMessage) -> Self {
        Self {
            timestamp: m.timestamp,
            buyer_id: m.buyer_id,
            sdk_version: m.sdk_version,
            datacenter_id: m.datacenter_id,
            match_id: m.match_id,
            num_sessions: m.num_sessions,
            server_address: m.server_address,
        }
    }
}

/// Fields only sent on the first slice of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstSliceFields {
    pub datacenter_id: u64,
    pub platform_type: u32,
    pub connection_type: u32,
    pub client_address: SocketAddr,
    pub server_address: SocketAddr,
    pub tags: Vec<u64>,
}

/// Fields only sent while the session is on an accelerated route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextSliceFields {
    pub next_rtt: f32,
    pub next_jitter: f32,
    pub next_packet_loss: f32,
    pub next_kbps_up: u32,
    pub next_kbps_down: u32,
    pub route_cost: u32,
    pub route_relay_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub slice_number: u32,
    /// `SessionFlag` bitmask.
    pub flags: u64,
    pub route_type: RouteType,
    pub user_hash: u64,
    pub direct_rtt: f32,
    pub direct_jitter: f32,
    pub direct_packet_loss: f32,
    pub real_packet_loss: f32,
    pub real_jitter: f32,
    pub real_out_of_order: f32,
    pub first_slice: Option<FirstSliceFields>,
    pub next: Option<NextSliceFields>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummaryMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub start_timestamp: u64,
    pub session_duration: u32,
    pub duration_on_next: u32,
    pub envelope_bytes_up_sum: u64,
    pub envelope_bytes_down_sum: u64,
    pub ever_on_next: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDataMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub server_address: SocketAddr,
    pub datacenter_id: u64,
    pub user_hash: u64,
    pub session_id: u64,
    pub match_id: u64,
    pub match_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortalSessionUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub user_hash: u64,
    pub slice_number: u32,
    pub next: bool,
    pub direct_rtt: f32,
    pub next_rtt: f32,
    pub real_packet_loss: f32,
    pub route_relay_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortalNearRelayUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub near_relays: Vec<NearRelaySample>,
}
