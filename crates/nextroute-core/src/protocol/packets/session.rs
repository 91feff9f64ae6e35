//! Session update request/response.

use std::net::{Ipv4Addr, SocketAddr};

use serde::Serialize;

use super::{read_required_address, MagicValues, Packet, SessionDataBlob};
use crate::error::{NextRouteError, Result};
use crate::protocol::bitstream::{BitReader, BitWriter};
use crate::protocol::constants::{
    ENCRYPTED_CONTINUE_TOKEN_BYTES, ENCRYPTED_ROUTE_TOKEN_BYTES, KEY_BYTES, MAX_CONNECTION_TYPE,
    MAX_NEAR_RELAYS, MAX_NEAR_RELAY_JITTER, MAX_NEAR_RELAY_RTT, MAX_PLATFORM_TYPE,
    MAX_SESSION_DEBUG, MAX_SESSION_UPDATE_RETRIES, MAX_TAGS, MAX_TOKENS, PING_TOKEN_BYTES,
};
use crate::protocol::packet_type::PacketType;
use crate::protocol::version::SdkVersion;

/// One near relay as pinged by the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearRelaySample {
    pub id: u64,
    pub rtt: u32,
    pub jitter: u32,
    pub packet_loss: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PathStats {
    pub rtt: f32,
    pub jitter: f32,
    pub packet_loss: f32,
}

/// Accelerated path statistics, present only while the SDK is on a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NextPathStats {
    pub rtt: f32,
    pub jitter: f32,
    pub packet_loss: f32,
    pub kbps_up: u32,
    pub kbps_down: u32,
}

fn check_len(what: &str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(NextRouteError::OutOfRange(format!("{len} {what}, max {max}")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdateRequest {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub session_id: u64,
    pub slice_number: u32,
    pub retry_number: u32,
    /// Previous slice's record; absent on slice 0.
    pub session_data: Option<SessionDataBlob>,
    pub client_address: SocketAddr,
    pub server_address: SocketAddr,
    pub client_route_public_key: [u8; KEY_BYTES],
    pub server_route_public_key: [u8; KEY_BYTES],
    pub user_hash: u64,
    pub platform_type: u32,
    pub connection_type: u32,
    pub reported: bool,
    pub fallback_to_direct: bool,
    pub client_bandwidth_over_limit: bool,
    pub server_bandwidth_over_limit: bool,
    pub client_ping_timed_out: bool,
    pub tags: Vec<u64>,
    pub session_events: u64,
    pub internal_events: u64,
    pub direct: PathStats,
    pub direct_max_packet_loss_seen: f32,
    pub next: Option<NextPathStats>,
    pub near_relays: Vec<NearRelaySample>,
    pub direct_kbps_up: u32,
    pub direct_kbps_down: u32,
    pub packets_sent_client_to_server: u64,
    pub packets_sent_server_to_client: u64,
    pub packets_lost_client_to_server: u64,
    pub packets_lost_server_to_client: u64,
    pub packets_out_of_order_client_to_server: u64,
    pub packets_out_of_order_server_to_client: u64,
    pub jitter_client_to_server: f32,
    pub jitter_server_to_client: f32,
}

impl Default for SessionUpdateRequest {
    fn default() -> Self {
        let unspecified = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        Self {
            version: SdkVersion::default(),
            buyer_id: 0,
            datacenter_id: 0,
            session_id: 0,
            slice_number: 0,
            retry_number: 0,
            session_data: None,
            client_address: unspecified,
            server_address: unspecified,
            client_route_public_key: [0u8; KEY_BYTES],
            server_route_public_key: [0u8; KEY_BYTES],
            user_hash: 0,
            platform_type: 0,
            connection_type: 0,
            reported: false,
            fallback_to_direct: false,
            client_bandwidth_over_limit: false,
            server_bandwidth_over_limit: false,
            client_ping_timed_out: false,
            tags: Vec::new(),
            session_events: 0,
            internal_events: 0,
            direct: PathStats::default(),
            direct_max_packet_loss_seen: 0.0,
            next: None,
            near_relays: Vec::new(),
            direct_kbps_up: 0,
            direct_kbps_down: 0,
            packets_sent_client_to_server: 0,
            packets_sent_server_to_client: 0,
            packets_lost_client_to_server: 0,
            packets_lost_server_to_client: 0,
            packets_out_of_order_client_to_server: 0,
            packets_out_of_order_server_to_client: 0,
            jitter_client_to_server: 0.0,
            jitter_server_to_client: 0.0,
        }
    }
}

impl SessionUpdateRequest {
    fn has_lost_packets(&self) -> bool {
        self.packets_lost_client_to_server != 0 || self.packets_lost_server_to_client != 0
    }

    fn has_out_of_order_packets(&self) -> bool {
        self.packets_out_of_order_client_to_server != 0
            || self.packets_out_of_order_server_to_client != 0
    }
}

impl Packet for SessionUpdateRequest {
    const TYPE: PacketType = PacketType::SessionUpdateRequest;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        check_len("tags", self.tags.len(), MAX_TAGS)?;
        check_len("near relays", self.near_relays.len(), MAX_NEAR_RELAYS)?;

        self.version.write(w)?;
        w.write_u64(self.buyer_id)?;
        w.write_u64(self.datacenter_id)?;
        w.write_u64(self.session_id)?;
        w.write_u32(self.slice_number)?;
        w.write_integer(self.retry_number, 0, MAX_SESSION_UPDATE_RETRIES)?;
        SessionDataBlob::write_optional(self.session_data.as_ref(), w)?;
        w.write_address(Some(&self.client_address))?;
        w.write_address(Some(&self.server_address))?;
        w.write_bytes(&self.client_route_public_key)?;
        w.write_bytes(&self.server_route_public_key)?;
        w.write_u64(self.user_hash)?;
        w.write_integer(self.platform_type, 0, MAX_PLATFORM_TYPE)?;
        w.write_integer(self.connection_type, 0, MAX_CONNECTION_TYPE)?;

        w.write_bool(self.next.is_some())?;
        w.write_bool(self.reported)?;
        w.write_bool(self.fallback_to_direct)?;
        w.write_bool(self.client_bandwidth_over_limit)?;
        w.write_bool(self.server_bandwidth_over_limit)?;
        w.write_bool(self.client_ping_timed_out)?;
        w.write_bool(!self.near_relays.is_empty())?;
        w.write_bool(!self.tags.is_empty())?;
        w.write_bool(self.session_events != 0)?;
        w.write_bool(self.internal_events != 0)?;
        w.write_bool(self.has_lost_packets())?;
        w.write_bool(self.has_out_of_order_packets())?;

        if !self.tags.is_empty() {
            w.write_integer(self.tags.len() as u32, 1, MAX_TAGS as u32)?;
            for tag in &self.tags {
                w.write_u64(*tag)?;
            }
        }
        if self.session_events != 0 {
            w.write_u64(self.session_events)?;
        }
        if self.internal_events != 0 {
            w.write_u64(self.internal_events)?;
        }

        w.write_f32(self.direct.rtt)?;
        w.write_f32(self.direct.jitter)?;
        w.write_f32(self.direct.packet_loss)?;
        w.write_f32(self.direct_max_packet_loss_seen)?;

        if let Some(next) = &self.next {
            w.write_f32(next.rtt)?;
            w.write_f32(next.jitter)?;
            w.write_f32(next.packet_loss)?;
            w.write_u32(next.kbps_up)?;
            w.write_u32(next.kbps_down)?;
        }

        if !self.near_relays.is_empty() {
            w.write_integer(self.near_relays.len() as u32, 1, MAX_NEAR_RELAYS as u32)?;
            for relay in &self.near_relays {
                w.write_u64(relay.id)?;
                w.write_integer(relay.rtt, 0, MAX_NEAR_RELAY_RTT)?;
                w.write_integer(relay.jitter, 0, MAX_NEAR_RELAY_JITTER)?;
                w.write_f32(relay.packet_loss)?;
            }
        }

        w.write_u32(self.direct_kbps_up)?;
        w.write_u32(self.direct_kbps_down)?;
        w.write_u64(self.packets_sent_client_to_server)?;
        w.write_u64(self.packets_sent_server_to_client)?;
        if self.has_lost_packets() {
            w.write_u64(self.packets_lost_client_to_server)?;
            w.write_u64(self.packets_lost_server_to_client)?;
        }
        if self.has_out_of_order_packets() {
            w.write_u64(self.packets_out_of_order_client_to_server)?;
            w.write_u64(self.packets_out_of_order_server_to_client)?;
        }
        w.write_f32(self.jitter_client_to_server)?;
        w.write_f32(self.jitter_server_to_client)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let mut p = SessionUpdateRequest {
            version: SdkVersion::read(r)?,
            buyer_id: r.read_u64()?,
            datacenter_id: r.read_u64()?,
            session_id: r.read_u64()?,
            slice_number: r.read_u32()?,
            retry_number: r.read_integer(0, MAX_SESSION_UPDATE_RETRIES)?,
            session_data: SessionDataBlob::read_optional(r)?,
            client_address: read_required_address(r, "client")?,
            server_address: read_required_address(r, "server")?,
            client_route_public_key: r.read_array()?,
            server_route_public_key: r.read_array()?,
            user_hash: r.read_u64()?,
            platform_type: r.read_integer(0, MAX_PLATFORM_TYPE)?,
            connection_type: r.read_integer(0, MAX_CONNECTION_TYPE)?,
            ..SessionUpdateRequest::default()
        };

        let has_next = r.read_bool()?;
        p.reported = r.read_bool()?;
        p.fallback_to_direct = r.read_bool()?;
        p.client_bandwidth_over_limit = r.read_bool()?;
        p.server_bandwidth_over_limit = r.read_bool()?;
        p.client_ping_timed_out = r.read_bool()?;
        let has_near_relays = r.read_bool()?;
        let has_tags = r.read_bool()?;
        let has_session_events = r.read_bool()?;
        let has_internal_events = r.read_bool()?;
        let has_lost_packets = r.read_bool()?;
        let has_out_of_order_packets = r.read_bool()?;

        if has_tags {
            let count = r.read_integer(1, MAX_TAGS as u32)?;
            for _ in 0..count {
                p.tags.push(r.read_u64()?);
            }
        }
        if has_session_events {
            p.session_events = r.read_u64()?;
        }
        if has_internal_events {
            p.internal_events = r.read_u64()?;
        }

        p.direct = PathStats {
            rtt: r.read_f32()?,
            jitter: r.read_f32()?,
            packet_loss: r.read_f32()?,
        };
        p.direct_max_packet_loss_seen = r.read_f32()?;

        if has_next {
            p.next = Some(NextPathStats {
                rtt: r.read_f32()?,
                jitter: r.read_f32()?,
                packet_loss: r.read_f32()?,
                kbps_up: r.read_u32()?,
                kbps_down: r.read_u32()?,
            });
        }

        if has_near_relays {
            let count = r.read_integer(1, MAX_NEAR_RELAYS as u32)?;
            for _ in 0..count {
                p.near_relays.push(NearRelaySample {
                    id: r.read_u64()?,
                    rtt: r.read_integer(0, MAX_NEAR_RELAY_RTT)?,
                    jitter: r.read_integer(0, MAX_NEAR_RELAY_JITTER)?,
                    packet_loss: r.read_f32()?,
                });
            }
        }

        p.direct_kbps_up = r.read_u32()?;
        p.direct_kbps_down = r.read_u32()?;
        p.packets_sent_client_to_server = r.read_u64()?;
        p.packets_sent_server_to_client = r.read_u64()?;
        if has_lost_packets {
            p.packets_lost_client_to_server = r.read_u64()?;
            p.packets_lost_server_to_client = r.read_u64()?;
        }
        if has_out_of_order_packets {
            p.packets_out_of_order_client_to_server = r.read_u64()?;
            p.packets_out_of_order_server_to_client = r.read_u64()?;
        }
        p.jitter_client_to_server = r.read_f32()?;
        p.jitter_server_to_client = r.read_f32()?;
        Ok(p)
    }
}

/// Route instruction carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RouteType {
    Direct = 0,
    New = 1,
    Continue = 2,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Direct => "direct",
            RouteType::New => "new",
            RouteType::Continue => "continue",
        }
    }
}

/// Which per-hop token format a route carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    New,
    Continue,
}

impl TokenKind {
    /// Encrypted bytes per hop.
    pub fn token_bytes(self) -> usize {
        match self {
            TokenKind::New => ENCRYPTED_ROUTE_TOKEN_BYTES,
            TokenKind::Continue => ENCRYPTED_CONTINUE_TOKEN_BYTES,
        }
    }

    pub fn route_type(self) -> RouteType {
        match self {
            TokenKind::New => RouteType::New,
            TokenKind::Continue => RouteType::Continue,
        }
    }
}

/// Encrypted per-hop tokens for the client, each relay and the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTokens {
    pub kind: TokenKind,
    pub multipath: bool,
    pub num_tokens: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseNearRelay {
    pub id: u64,
    pub address: SocketAddr,
    pub ping_token: [u8; PING_TOKEN_BYTES],
}

/// Near relays the client should ping from now on. The wire has no form for
/// an empty list; build through [`NearRelayList::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearRelayList {
    pub relays: Vec<ResponseNearRelay>,
    pub expire_timestamp: u64,
}

impl NearRelayList {
    /// `None` when there is nothing to ping.
    pub fn new(relays: Vec<ResponseNearRelay>, expire_timestamp: u64) -> Option<Self> {
        if relays.is_empty() {
            return None;
        }
        Some(Self {
            relays,
            expire_timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionUpdateResponse {
    pub session_id: u64,
    pub slice_number: u32,
    pub session_data: Option<SessionDataBlob>,
    /// `None` means go direct.
    pub route: Option<RouteTokens>,
    pub near_relays: Option<NearRelayList>,
    pub exclude_near_relays: bool,
    pub debug: Option<String>,
    pub magic: MagicValues,
}

impl SessionUpdateResponse {
    pub fn route_type(&self) -> RouteType {
        self.route
            .as_ref()
            .map_or(RouteType::Direct, |r| r.kind.route_type())
    }

    pub fn num_tokens(&self) -> u32 {
        self.route.as_ref().map_or(0, |r| r.num_tokens)
    }
}

impl Packet for SessionUpdateResponse {
    const TYPE: PacketType = PacketType::SessionUpdateResponse;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u64(self.session_id)?;
        w.write_u32(self.slice_number)?;
        SessionDataBlob::write_optional(self.session_data.as_ref(), w)?;
        w.write_integer(self.route_type() as u32, 0, RouteType::Continue as u32)?;

        w.write_bool(self.near_relays.is_some())?;
        if let Some(near) = &self.near_relays {
            if near.relays.is_empty() {
                return Err(NextRouteError::OutOfRange("empty near relay list".into()));
            }
            check_len("near relays", near.relays.len(), MAX_NEAR_RELAYS)?;
            w.write_integer(near.relays.len() as u32, 1, MAX_NEAR_RELAYS as u32)?;
            for relay in &near.relays {
                w.write_u64(relay.id)?;
                w.write_address(Some(&relay.address))?;
                w.write_bytes(&relay.ping_token)?;
            }
            w.write_u64(near.expire_timestamp)?;
        }
        w.write_bool(self.exclude_near_relays)?;

        if let Some(route) = &self.route {
            let expected = route.num_tokens as usize * route.kind.token_bytes();
            if route.data.len() != expected {
                return Err(NextRouteError::Internal(format!(
                    "route token buffer is {} bytes, expected {expected}",
                    route.data.len()
                )));
            }
            w.write_bool(route.multipath)?;
            w.write_integer(route.num_tokens, 2, MAX_TOKENS as u32)?;
            w.write_bytes(&route.data)?;
        }

        w.write_bool(self.debug.is_some())?;
        if let Some(debug) = &self.debug {
            w.write_string(debug, MAX_SESSION_DEBUG)?;
        }
        self.magic.write(w)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let session_id = r.read_u64()?;
        let slice_number = r.read_u32()?;
        let session_data = SessionDataBlob::read_optional(r)?;
        let route_type = r.read_integer(0, RouteType::Continue as u32)?;

        let near_relays = if r.read_bool()? {
            let count = r.read_integer(1, MAX_NEAR_RELAYS as u32)?;
            let mut relays = Vec::with_capacity(count as usize);
            for _ in 0..count {
                relays.push(ResponseNearRelay {
                    id: r.read_u64()?,
                    address: read_required_address(r, "near relay")?,
                    ping_token: r.read_array()?,
                });
            }
            Some(NearRelayList {
                relays,
                expire_timestamp: r.read_u64()?,
            })
        } else {
            None
        };
        let exclude_near_relays = r.read_bool()?;

        let kind = match route_type {
            0 => None,
            1 => Some(TokenKind::New),
            _ => Some(TokenKind::Continue),
        };
        let route = match kind {
            None => None,
            Some(kind) => {
                let multipath = r.read_bool()?;
                let num_tokens = r.read_integer(2, MAX_TOKENS as u32)?;
                let data = r
                    .read_bytes(num_tokens as usize * kind.token_bytes())?
                    .to_vec();
                Some(RouteTokens {
                    kind,
                    multipath,
                    num_tokens,
                    data,
                })
            }
        };

        let debug = if r.read_bool()? {
            Some(r.read_string(MAX_SESSION_DEBUG)?)
        } else {
            None
        };

        Ok(Self {
            session_id,
            slice_number,
            session_data,
            route,
            near_relays,
            exclude_near_relays,
            debug,
            magic: MagicValues::read(r)?,
        })
    }
}
