//! Match data: opaque per-match values a game server attaches to a session.

use std::net::SocketAddr;

use super::{read_required_address, Packet};
use crate::error::{NextRouteError, Result};
use crate::protocol::bitstream::{BitReader, BitWriter};
use crate::protocol::constants::MAX_MATCH_VALUES;
use crate::protocol::packet_type::PacketType;
use crate::protocol::version::SdkVersion;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchDataRequest {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub server_address: SocketAddr,
    pub datacenter_id: u64,
    pub user_hash: u64,
    pub session_id: u64,
    pub retry_number: u32,
    pub match_id: u64,
    pub match_values: Vec<f64>,
}

impl Packet for MatchDataRequest {
    const TYPE: PacketType = PacketType::MatchDataRequest;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        if self.match_values.len() > MAX_MATCH_VALUES {
            return Err(NextRouteError::OutOfRange(format!(
                "{} match values, max {MAX_MATCH_VALUES}",
                self.match_values.len()
            )));
        }
        self.version.write(w)?;
        w.write_u64(self.buyer_id)?;
        w.write_address(Some(&self.server_address))?;
        w.write_u64(self.datacenter_id)?;
        w.write_u64(self.user_hash)?;
        w.write_u64(self.session_id)?;
        w.write_u32(self.retry_number)?;
        w.write_u64(self.match_id)?;

        w.write_bool(!self.match_values.is_empty())?;
        if !self.match_values.is_empty() {
            w.write_integer(self.match_values.len() as u32, 1, MAX_MATCH_VALUES as u32)?;
            for v in &self.match_values {
                w.write_f64(*v)?;
            }
        }
        Ok(())
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let version = SdkVersion::read(r)?;
        let buyer_id = r.read_u64()?;
        let server_address = read_required_address(r, "server")?;
        let datacenter_id = r.read_u64()?;
        let user_hash = r.read_u64()?;
        let session_id = r.read_u64()?;
        let retry_number = r.read_u32()?;
        let match_id = r.read_u64()?;

        let mut match_values = Vec::new();
        if r.read_bool()? {
            let count = r.read_integer(1, MAX_MATCH_VALUES as u32)?;
            for _ in 0..count {
                match_values.push(r.read_f64()?);
            }
        }

        Ok(Self {
            version,
            buyer_id,
            server_address,
            datacenter_id,
            user_hash,
            session_id,
            retry_number,
            match_id,
            match_values,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDataResponse {
    pub session_id: u64,
}

impl Packet for MatchDataResponse {
    const TYPE: PacketType = PacketType::MatchDataResponse;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u64(self.session_id)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            session_id: r.read_u64()?,
        })
    }
}
