//! Anti-spoof filter bytes ("chonkle" header, "pittle" trailer).
//!
//! The basic filter is a cheap stateless range check on the reserved bytes.
//! The advanced filter regenerates them from the sender/receiver addresses
//! and the datagram length, so a packet replayed from another address or
//! truncated in flight fails before any signature work.

use std::net::SocketAddr;

use super::address::address_data;
use super::constants::{MAGIC_BYTES, PACKET_HEADER_BYTES, PACKET_TRAILER_BYTES};

pub const CHONKLE_BYTES: usize = PACKET_HEADER_BYTES - 1;
pub const PITTLE_BYTES: usize = PACKET_TRAILER_BYTES;

/// Magic used on the SDK <-> backend hop.
pub const BACKEND_MAGIC: [u8; MAGIC_BYTES] = [0u8; MAGIC_BYTES];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(chunks: &[&[u8]]) -> u64 {
    let mut hash = FNV_OFFSET;
    for chunk in chunks {
        for &b in *chunk {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

fn endpoint_bytes(addr: &SocketAddr) -> Vec<u8> {
    let (mut ip, port) = address_data(addr);
    ip.extend_from_slice(&port.to_le_bytes());
    ip
}

fn length_bytes(packet_len: usize) -> [u8; 2] {
    (packet_len as u16).to_le_bytes()
}

pub fn generate_pittle(from: &SocketAddr, to: &SocketAddr, packet_len: usize) -> [u8; PITTLE_BYTES] {
    let mut sum: u16 = 0;
    for b in endpoint_bytes(from)
        .iter()
        .chain(endpoint_bytes(to).iter())
        .chain(length_bytes(packet_len).iter())
    {
        sum = sum.wrapping_add(u16::from(*b));
    }
    let [lo, hi] = sum.to_le_bytes();
    let p0 = 1 | (lo ^ hi ^ 193);
    let p1 = 1 | ((255 - p0) ^ 113);
    [p0, p1]
}

pub fn generate_chonkle(
    magic: &[u8; MAGIC_BYTES],
    from: &SocketAddr,
    to: &SocketAddr,
    packet_len: usize,
) -> [u8; CHONKLE_BYTES] {
    let hash = fnv1a64(&[
        magic,
        &endpoint_bytes(from),
        &endpoint_bytes(to),
        &length_bytes(packet_len),
    ]);
    let d = hash.to_le_bytes();

    [
        ((d[6] & 0xC0) >> 6) + 42,
        (d[3] & 0x1F) + 200,
        ((d[2] & 0xFC) >> 2) + 5,
        d[0],
        (d[2] & 0x03) + 78,
        (d[4] & 0x7F) + 96,
        ((d[1] & 0xFC) >> 2) + 100,
        if d[7] & 1 == 0 { 79 } else { 7 },
        if d[4] & 0x80 == 0 { 37 } else { 83 },
        (d[5] & 0x07) + 124,
        ((d[1] & 0xE0) >> 5) + 175,
        (d[6] & 0x3F) + 33,
        [97, 5, 43, 13][(d[1] & 0x03) as usize],
        ((d[5] & 0xF8) >> 3) + 210,
        ((d[7] & 0xFE) >> 1) + 17,
    ]
}

/// Stateless range check of the reserved header and trailer bytes.
pub fn basic_filter(packet: &[u8]) -> bool {
    if packet.len() < PACKET_HEADER_BYTES + PACKET_TRAILER_BYTES {
        return false;
    }
    let Some(c) = packet.get(1..PACKET_HEADER_BYTES) else {
        return false;
    };
    let Some(&[p0, p1]) = packet.get(packet.len() - PITTLE_BYTES..) else {
        return false;
    };

    p1 == (1 | ((255 - p0) ^ 113))
        && (0x2A..=0x2D).contains(&c[0])
        && (0xC8..=0xE7).contains(&c[1])
        && (0x05..=0x44).contains(&c[2])
        && (0x4E..=0x51).contains(&c[4])
        && (0x60..=0xDF).contains(&c[5])
        && (0x64..=0xE3).contains(&c[6])
        && matches!(c[7], 0x07 | 0x4F)
        && matches!(c[8], 0x25 | 0x53)
        && (0x7C..=0x83).contains(&c[9])
        && (0xAF..=0xB6).contains(&c[10])
        && (0x21..=0x60).contains(&c[11])
        && matches!(c[12], 0x61 | 0x05 | 0x2B | 0x0D)
        && (0xD2..=0xF1).contains(&c[13])
        && (0x11..=0x90).contains(&c[14])
}

/// Regenerate the filter bytes for this address pair and compare.
pub fn advanced_filter(
    packet: &[u8],
    magic: &[u8; MAGIC_BYTES],
    from: &SocketAddr,
    to: &SocketAddr,
) -> bool {
    let len = packet.len();
    if len < PACKET_HEADER_BYTES + PACKET_TRAILER_BYTES {
        return false;
    }
    let chonkle = generate_chonkle(magic, from, to, len);
    let pittle = generate_pittle(from, to, len);
    packet.get(1..PACKET_HEADER_BYTES) == Some(&chonkle[..])
        && packet.get(len - PITTLE_BYTES..) == Some(&pittle[..])
}

/// Write both filter regions in place.
pub fn stamp(packet: &mut [u8], magic: &[u8; MAGIC_BYTES], from: &SocketAddr, to: &SocketAddr) {
    let len = packet.len();
    if len < PACKET_HEADER_BYTES + PACKET_TRAILER_BYTES {
        return;
    }
    let chonkle = generate_chonkle(magic, from, to, len);
    let pittle = generate_pittle(from, to, len);
    if let Some(head) = packet.get_mut(1..PACKET_HEADER_BYTES) {
        head.copy_from_slice(&chonkle);
    }
    if let Some(tail) = packet.get_mut(len - PITTLE_BYTES..) {
        tail.copy_from_slice(&pittle);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn addrs() -> (SocketAddr, SocketAddr) {
        ("10.0.0.1:50000".parse().unwrap(), "34.1.2.3:40000".parse().unwrap())
    }

    #[test]
    fn fnv_reference_value() {
        assert_eq!(fnv1a64(&[b""]), FNV_OFFSET);
        assert_eq!(fnv1a64(&[b"a"]), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn stamped_packet_passes_both_filters() {
        let (from, to) = addrs();
        for len in [93usize, 200, 1200] {
            let mut pkt = vec![0u8; len];
            pkt[0] = 5;
            stamp(&mut pkt, &BACKEND_MAGIC, &from, &to);
            assert!(basic_filter(&pkt), "len={len}");
            assert!(advanced_filter(&pkt, &BACKEND_MAGIC, &from, &to), "len={len}");
        }
    }

    #[test]
    fn wrong_sender_or_length_fails_advanced() {
        let (from, to) = addrs();
        let mut pkt = vec![0u8; 120];
        stamp(&mut pkt, &BACKEND_MAGIC, &from, &to);

        let spoofed: SocketAddr = "10.0.0.2:50000".parse().unwrap();
        assert!(!advanced_filter(&pkt, &BACKEND_MAGIC, &spoofed, &to));

        pkt.push(0);
        assert!(!advanced_filter(&pkt, &BACKEND_MAGIC, &from, &to));
    }

    #[test]
    fn zeroed_header_fails_basic() {
        assert!(!basic_filter(&[0u8; 100]));
        assert!(!basic_filter(&[0u8; 5]));
    }
}
