//! Packet authentication gate.
//!
//! Every inbound datagram passes through [`Gate::admit`] before anything
//! decodes it. Checks run in a fixed order and the first failure wins:
//!
//! 1. size (per-type minimum for supported tags, global minimum otherwise)
//! 2. type tag is one of [`PacketType::REQUESTS`]
//! 3. basic then advanced anti-spoof filter
//! 4. tenant lookup by the id at its fixed offset
//! 5. Ed25519 signature over `[0,1) ‖ payload` with the tenant's key

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use nextroute_core::protocol::constants::{MIN_PACKET_BYTES, SIGNATURE_BYTES};
use nextroute_core::protocol::envelope;
use nextroute_core::protocol::filter::{self, BACKEND_MAGIC};
use nextroute_core::protocol::PacketType;

use crate::context::{Buyer, BuyerLookup};
use crate::crypto;

/// Why a datagram was dropped. Rejections never produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("packet too small")]
    TooSmall,
    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),
    #[error("basic packet filter failed")]
    BasicFilterFailed,
    #[error("advanced packet filter failed")]
    AdvancedFilterFailed,
    #[error("unknown buyer {0}")]
    UnknownBuyer(u64),
    #[error("signature check failed")]
    SignatureCheckFailed,
    #[error("could not read {0}")]
    CouldNotRead(PacketType),
    /// Admitted type with no registered handler.
    #[error("no handler for {0}")]
    UnknownType(PacketType),
}

impl Rejected {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejected::TooSmall => "too_small",
            Rejected::UnsupportedType(_) => "unsupported_type",
            Rejected::BasicFilterFailed => "basic_filter_failed",
            Rejected::AdvancedFilterFailed => "advanced_filter_failed",
            Rejected::UnknownBuyer(_) => "unknown_buyer",
            Rejected::SignatureCheckFailed => "signature_check_failed",
            Rejected::CouldNotRead(_) => "could_not_read",
            Rejected::UnknownType(_) => "unknown_type",
        }
    }
}

/// A datagram that passed every gate check.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub packet_type: PacketType,
    pub buyer: Arc<Buyer>,
    pub packet: Bytes,
}

impl Admitted {
    /// Bit-packed payload between the header and the signature.
    pub fn payload(&self) -> Bytes {
        envelope::payload_bytes(&self.packet).unwrap_or_default()
    }
}

pub struct Gate {
    buyers: Arc<dyn BuyerLookup>,
}

impl Gate {
    pub fn new(buyers: Arc<dyn BuyerLookup>) -> Self {
        Self { buyers }
    }

    /// `from` is the sender, `to` the address the datagram arrived on.
    pub fn admit(&self, packet: Bytes, from: &SocketAddr, to: &SocketAddr) -> Result<Admitted, Rejected> {
        let tag = envelope::type_tag(&packet).ok_or(Rejected::TooSmall)?;
        let supported = PacketType::from_u8(tag).filter(|t| t.is_request());

        let min_bytes = supported.map_or(MIN_PACKET_BYTES, |t| t.min_packet_bytes());
        if packet.len() < min_bytes {
            tracing::debug!(%from, len = packet.len(), min_bytes, "packet too small");
            return Err(Rejected::TooSmall);
        }

        let Some(packet_type) = supported else {
            tracing::debug!(%from, tag, "unsupported packet type");
            return Err(Rejected::UnsupportedType(tag));
        };

        if !filter::basic_filter(&packet) {
            tracing::debug!(%from, %packet_type, "basic packet filter failed");
            return Err(Rejected::BasicFilterFailed);
        }
        if !filter::advanced_filter(&packet, &BACKEND_MAGIC, from, to) {
            tracing::debug!(%from, %packet_type, "advanced packet filter failed");
            return Err(Rejected::AdvancedFilterFailed);
        }

        let buyer_id = envelope::peek_buyer_id(&packet).ok_or(Rejected::TooSmall)?;
        let Some(buyer) = self.buyers.lookup_buyer(buyer_id) else {
            tracing::debug!(%from, %packet_type, buyer_id, "unknown buyer");
            return Err(Rejected::UnknownBuyer(buyer_id));
        };

        let verified = match (envelope::signed_message(&packet), envelope::signature(&packet)) {
            (Some(message), Some(signature)) => crypto::verify(&buyer.public_key, &message, &signature),
            _ => false,
        };
        if !verified {
            tracing::debug!(%from, %packet_type, buyer_id, "signature check failed");
            return Err(Rejected::SignatureCheckFailed);
        }

        Ok(Admitted {
            packet_type,
            buyer,
            packet,
        })
    }
}

/// Frame, sign and filter-stamp a payload the way SDKs do. Used by tests and
/// tooling that talk to the backend.
pub fn seal(
    packet_type: PacketType,
    payload: &[u8],
    key: &ed25519_dalek::SigningKey,
    from: &SocketAddr,
    to: &SocketAddr,
) -> nextroute_core::Result<Vec<u8>> {
    let mut packet = envelope::frame(packet_type, payload);
    let message = envelope::signed_message(&packet).ok_or_else(|| {
        nextroute_core::NextRouteError::Internal("framed packet has no signed region".into())
    })?;
    let signature: [u8; SIGNATURE_BYTES] = crypto::sign(key, &message);
    envelope::set_signature(&mut packet, &signature)?;
    filter::stamp(&mut packet, &BACKEND_MAGIC, from, to);
    Ok(packet)
}
