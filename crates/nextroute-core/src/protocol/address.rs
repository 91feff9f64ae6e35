//! Fixed-width address form (route tokens) and filter address bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::constants::ADDRESS_BYTES;
use crate::error::{NextRouteError, Result};

const ADDRESS_NONE: u8 = 0;
const ADDRESS_IPV4: u8 = 1;
const ADDRESS_IPV6: u8 = 2;

/// Encode as `[kind, ip (4 or 16 bytes), port LE]`, zero padded to 19 bytes.
pub fn write_fixed(addr: Option<&SocketAddr>) -> [u8; ADDRESS_BYTES] {
    let mut out = [0u8; ADDRESS_BYTES];
    match addr {
        None => out[0] = ADDRESS_NONE,
        Some(SocketAddr::V4(v4)) => {
            out[0] = ADDRESS_IPV4;
            out[1..5].copy_from_slice(&v4.ip().octets());
            out[5..7].copy_from_slice(&v4.port().to_le_bytes());
        }
        Some(SocketAddr::V6(v6)) => {
            out[0] = ADDRESS_IPV6;
            out[1..17].copy_from_slice(&v6.ip().octets());
            out[17..19].copy_from_slice(&v6.port().to_le_bytes());
        }
    }
    out
}

pub fn read_fixed(buf: &[u8]) -> Result<Option<SocketAddr>> {
    let bytes: &[u8; ADDRESS_BYTES] = buf
        .get(..ADDRESS_BYTES)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| NextRouteError::Malformed("address needs 19 bytes".into()))?;

    match bytes[0] {
        ADDRESS_NONE => Ok(None),
        ADDRESS_IPV4 => {
            let ip = Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]);
            let port = u16::from_le_bytes([bytes[5], bytes[6]]);
            Ok(Some(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        ADDRESS_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[1..17]);
            let port = u16::from_le_bytes([bytes[17], bytes[18]]);
            Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
        }
        other => Err(NextRouteError::Malformed(format!("unknown address type {other}"))),
    }
}

/// Raw ip bytes and port, as hashed by the packet filters and ping tokens.
pub fn address_data(addr: &SocketAddr) -> (Vec<u8>, u16) {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    (ip, addr.port())
}
