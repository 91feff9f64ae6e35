//! Typed packet payloads.
//!
//! Each payload implements [`Packet`]: a `write` and a `read` that walk the
//! same fields in the same order. Optional sections carry a presence bool the
//! writer derives from the value itself (`Option::is_some`, a non-empty
//! sequence, a non-zero counter), so a reader can never disagree with the
//! writer about which fields follow.

pub mod match_data;
pub mod server;
pub mod session;

use super::bitstream::{BitReader, BitWriter};
use super::constants::{MAGIC_BYTES, MAX_PAYLOAD_BYTES, MAX_SESSION_DATA_BYTES, SIGNATURE_BYTES};
use super::packet_type::PacketType;
use crate::error::{NextRouteError, Result};

pub use match_data::{MatchDataRequest, MatchDataResponse};
pub use server::{
    ServerInitRequest, ServerInitResponse, ServerResponseCode, ServerUpdateRequest,
    ServerUpdateResponse,
};
pub use session::{
    NearRelayList, NearRelaySample, NextPathStats, PathStats, ResponseNearRelay, RouteTokens,
    RouteType, SessionUpdateRequest, SessionUpdateResponse, TokenKind,
};

/// A bit-packed payload bound to one packet type tag.
pub trait Packet: Sized {
    const TYPE: PacketType;

    fn write(&self, w: &mut BitWriter) -> Result<()>;
    fn read(r: &mut BitReader<'_>) -> Result<Self>;
}

/// Encode a payload (without envelope). Fails when the framed datagram would
/// not fit in `MAX_PACKET_BYTES`.
pub fn encode_payload<P: Packet>(packet: &P) -> Result<Vec<u8>> {
    let mut w = BitWriter::new(MAX_PAYLOAD_BYTES);
    packet.write(&mut w)?;
    Ok(w.finish())
}

/// Decode a payload (without envelope).
pub fn decode_payload<P: Packet>(payload: &[u8]) -> Result<P> {
    let mut r = BitReader::new(payload);
    P::read(&mut r)
}

/// Anti-replay magic values, newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MagicValues {
    pub upcoming: [u8; MAGIC_BYTES],
    pub current: [u8; MAGIC_BYTES],
    pub previous: [u8; MAGIC_BYTES],
}

impl MagicValues {
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_bytes(&self.upcoming)?;
        w.write_bytes(&self.current)?;
        w.write_bytes(&self.previous)
    }

    pub fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            upcoming: r.read_array()?,
            current: r.read_array()?,
            previous: r.read_array()?,
        })
    }
}

/// Encoded `SessionData` plus the backend's signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDataBlob {
    pub data: Vec<u8>,
    pub signature: [u8; SIGNATURE_BYTES],
}

impl SessionDataBlob {
    /// Byte count (0 = absent), then bytes and signature.
    pub fn write_optional(blob: Option<&SessionDataBlob>, w: &mut BitWriter) -> Result<()> {
        match blob {
            None => w.write_integer(0, 0, MAX_SESSION_DATA_BYTES as u32),
            Some(b) => {
                if b.data.is_empty() || b.data.len() > MAX_SESSION_DATA_BYTES {
                    return Err(NextRouteError::OutOfRange(format!(
                        "session data is {} bytes, must be 1..={MAX_SESSION_DATA_BYTES}",
                        b.data.len()
                    )));
                }
                w.write_integer(b.data.len() as u32, 0, MAX_SESSION_DATA_BYTES as u32)?;
                w.write_bytes(&b.data)?;
                w.write_bytes(&b.signature)
            }
        }
    }

    pub fn read_optional(r: &mut BitReader<'_>) -> Result<Option<SessionDataBlob>> {
        let len = r.read_integer(0, MAX_SESSION_DATA_BYTES as u32)? as usize;
        if len == 0 {
            return Ok(None);
        }
        let data = r.read_bytes(len)?.to_vec();
        let signature = r.read_array::<SIGNATURE_BYTES>()?;
        Ok(Some(SessionDataBlob { data, signature }))
    }
}

pub(crate) fn read_required_address(
    r: &mut BitReader<'_>,
    what: &str,
) -> Result<std::net::SocketAddr> {
    r.read_address()?
        .ok_or_else(|| NextRouteError::Malformed(format!("{what} address missing")))
}
