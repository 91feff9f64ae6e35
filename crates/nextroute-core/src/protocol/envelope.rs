//! Datagram envelope layout.
//!
//! ```text
//! [0]            packet type tag
//! [1, 16)        chonkle filter bytes
//! [16, len-66)   bit-packed payload
//! [len-66, len-2) Ed25519 signature
//! [len-2, len)   pittle filter bytes
//! ```
//!
//! The signature covers `[0,1)` followed by the payload. Filter bytes are
//! written after signing and are never part of the signed message.

use bytes::Bytes;

use super::constants::{
    BUYER_ID_OFFSET, PACKET_HEADER_BYTES, PACKET_TRAILER_BYTES, SIGNATURE_BYTES,
};
use super::packet_type::PacketType;
use crate::error::{NextRouteError, Result};

const FOOTER_BYTES: usize = SIGNATURE_BYTES + PACKET_TRAILER_BYTES;

/// Wrap an encoded payload with zeroed header, signature and trailer regions.
pub fn frame(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKET_HEADER_BYTES + payload.len() + FOOTER_BYTES);
    out.push(packet_type.as_u8());
    out.resize(PACKET_HEADER_BYTES, 0);
    out.extend_from_slice(payload);
    out.resize(out.len() + FOOTER_BYTES, 0);
    out
}

fn payload_end(packet: &[u8]) -> Option<usize> {
    let end = packet.len().checked_sub(FOOTER_BYTES)?;
    (end >= PACKET_HEADER_BYTES).then_some(end)
}

pub fn type_tag(packet: &[u8]) -> Option<u8> {
    packet.first().copied()
}

pub fn payload(packet: &[u8]) -> Option<&[u8]> {
    packet.get(PACKET_HEADER_BYTES..payload_end(packet)?)
}

/// Zero-copy payload view of a received datagram.
pub fn payload_bytes(packet: &Bytes) -> Option<Bytes> {
    let end = payload_end(packet)?;
    Some(packet.slice(PACKET_HEADER_BYTES..end))
}

/// Bytes covered by the signature: the type tag followed by the payload.
pub fn signed_message(packet: &[u8]) -> Option<Vec<u8>> {
    let tag = type_tag(packet)?;
    let body = payload(packet)?;
    let mut msg = Vec::with_capacity(1 + body.len());
    msg.push(tag);
    msg.extend_from_slice(body);
    Some(msg)
}

pub fn signature(packet: &[u8]) -> Option<[u8; SIGNATURE_BYTES]> {
    let start = payload_end(packet)?;
    packet
        .get(start..start + SIGNATURE_BYTES)
        .and_then(|s| s.try_into().ok())
}

pub fn set_signature(packet: &mut [u8], sig: &[u8; SIGNATURE_BYTES]) -> Result<()> {
    let start = payload_end(packet)
        .ok_or_else(|| NextRouteError::Internal("packet too short to sign".into()))?;
    packet
        .get_mut(start..start + SIGNATURE_BYTES)
        .ok_or_else(|| NextRouteError::Internal("packet too short to sign".into()))?
        .copy_from_slice(sig);
    Ok(())
}

/// Buyer id at its fixed offset, read without decoding the payload.
pub fn peek_buyer_id(packet: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = packet
        .get(BUYER_ID_OFFSET..BUYER_ID_OFFSET + 8)?
        .try_into()
        .ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn regions_line_up() {
        let payload: Vec<u8> = (0u8..40).collect();
        let mut pkt = frame(PacketType::SessionUpdateRequest, &payload);
        assert_eq!(pkt.len(), 16 + 40 + 66);
        assert_eq!(type_tag(&pkt), Some(5));
        assert_eq!(super::payload(&pkt).unwrap(), &payload[..]);

        let sig = [7u8; 64];
        set_signature(&mut pkt, &sig).unwrap();
        assert_eq!(signature(&pkt).unwrap(), sig);

        let msg = signed_message(&pkt).unwrap();
        assert_eq!(msg[0], 5);
        assert_eq!(&msg[1..], &payload[..]);

        // version bytes 0..3, buyer id 3..11 of the payload
        assert_eq!(peek_buyer_id(&pkt), Some(u64::from_le_bytes([3, 4, 5, 6, 7, 8, 9, 10])));
    }

    #[test]
    fn short_packets_have_no_regions() {
        let pkt = [1u8; 40];
        assert!(super::payload(&pkt).is_none());
        assert!(signature(&pkt).is_none());
    }
}
