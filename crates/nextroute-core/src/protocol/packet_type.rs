//! Packet type tags.
//!
//! `PacketType::REQUESTS` is the single list the gate admits and the
//! dispatcher registers handlers for.

use serde::Serialize;

use super::constants::{PACKET_HEADER_BYTES, PACKET_TRAILER_BYTES, SIGNATURE_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum PacketType {
    ServerInitRequest = 1,
    ServerInitResponse = 2,
    ServerUpdateRequest = 3,
    ServerUpdateResponse = 4,
    SessionUpdateRequest = 5,
    SessionUpdateResponse = 6,
    MatchDataRequest = 7,
    MatchDataResponse = 8,
}

impl PacketType {
    /// Request types accepted from SDKs.
    pub const REQUESTS: [PacketType; 4] = [
        PacketType::ServerInitRequest,
        PacketType::ServerUpdateRequest,
        PacketType::SessionUpdateRequest,
        PacketType::MatchDataRequest,
    ];

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PacketType::ServerInitRequest),
            2 => Some(PacketType::ServerInitResponse),
            3 => Some(PacketType::ServerUpdateRequest),
            4 => Some(PacketType::ServerUpdateResponse),
            5 => Some(PacketType::SessionUpdateRequest),
            6 => Some(PacketType::SessionUpdateResponse),
            7 => Some(PacketType::MatchDataRequest),
            8 => Some(PacketType::MatchDataResponse),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_request(self) -> bool {
        Self::REQUESTS.contains(&self)
    }

    /// Response type paired with a request type.
    pub fn response(self) -> Option<PacketType> {
        match self {
            PacketType::ServerInitRequest => Some(PacketType::ServerInitResponse),
            PacketType::ServerUpdateRequest => Some(PacketType::ServerUpdateResponse),
            PacketType::SessionUpdateRequest => Some(PacketType::SessionUpdateResponse),
            PacketType::MatchDataRequest => Some(PacketType::MatchDataResponse),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacketType::ServerInitRequest => "server_init_request",
            PacketType::ServerInitResponse => "server_init_response",
            PacketType::ServerUpdateRequest => "server_update_request",
            PacketType::ServerUpdateResponse => "server_update_response",
            PacketType::SessionUpdateRequest => "session_update_request",
            PacketType::SessionUpdateResponse => "session_update_response",
            PacketType::MatchDataRequest => "match_data_request",
            PacketType::MatchDataResponse => "match_data_response",
        }
    }

    /// Lower bound on the encoded payload: the fixed-width prefix every
    /// packet of this type starts with.
    pub fn min_payload_bytes(self) -> usize {
        match self {
            // version, buyer, request id, datacenter, name length
            PacketType::ServerInitRequest => 3 + 8 + 8 + 8 + 1,
            // version, buyer, request id, datacenter, match id, session count
            PacketType::ServerUpdateRequest => 3 + 8 + 8 + 8 + 8 + 4,
            // version, buyer, datacenter, session id, slice
            PacketType::SessionUpdateRequest => 3 + 8 + 8 + 8 + 4,
            // version, buyer, then at least a datacenter, user hash,
            // session id, retry and match id after the server address
            PacketType::MatchDataRequest => 3 + 8 + 8 + 8 + 8 + 4 + 8,
            PacketType::ServerInitResponse => 8 + 1 + 24,
            PacketType::ServerUpdateResponse => 8 + 1 + 24,
            PacketType::SessionUpdateResponse => 8 + 4,
            PacketType::MatchDataResponse => 8,
        }
    }

    /// Smallest datagram of this type the gate lets through.
    pub fn min_packet_bytes(self) -> usize {
        PACKET_HEADER_BYTES + self.min_payload_bytes() + SIGNATURE_BYTES + PACKET_TRAILER_BYTES
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
