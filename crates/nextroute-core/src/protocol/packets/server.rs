//! Server init / server update handshakes.

use std::net::SocketAddr;

use serde::Serialize;

use super::{read_required_address, MagicValues, Packet};
use crate::error::{NextRouteError, Result};
use crate::protocol::bitstream::{BitReader, BitWriter};
use crate::protocol::constants::MAX_DATACENTER_NAME;
use crate::protocol::packet_type::PacketType;
use crate::protocol::version::SdkVersion;

/// Explicit rejection code returned to init/update handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ServerResponseCode {
    Ok = 0,
    UnknownBuyer = 1,
    BuyerNotActive = 2,
    OldSdkVersion = 3,
}

impl ServerResponseCode {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::UnknownBuyer),
            2 => Ok(Self::BuyerNotActive),
            3 => Ok(Self::OldSdkVersion),
            other => Err(NextRouteError::Malformed(format!("unknown response code {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInitRequest {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub request_id: u64,
    pub datacenter_id: u64,
    pub datacenter_name: String,
}

impl Packet for ServerInitRequest {
    const TYPE: PacketType = PacketType::ServerInitRequest;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.version.write(w)?;
        w.write_u64(self.buyer_id)?;
        w.write_u64(self.request_id)?;
        w.write_u64(self.datacenter_id)?;
        w.write_string(&self.datacenter_name, MAX_DATACENTER_NAME)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            version: SdkVersion::read(r)?,
            buyer_id: r.read_u64()?,
            request_id: r.read_u64()?,
            datacenter_id: r.read_u64()?,
            datacenter_name: r.read_string(MAX_DATACENTER_NAME)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInitResponse {
    pub request_id: u64,
    pub response: ServerResponseCode,
    pub magic: MagicValues,
}

impl Packet for ServerInitResponse {
    const TYPE: PacketType = PacketType::ServerInitResponse;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u64(self.request_id)?;
        w.write_u8(self.response as u8)?;
        self.magic.write(w)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            request_id: r.read_u64()?,
            response: ServerResponseCode::from_u8(r.read_u8()?)?,
            magic: MagicValues::read(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdateRequest {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub request_id: u64,
    pub datacenter_id: u64,
    pub match_id: u64,
    pub num_sessions: u32,
    pub server_address: SocketAddr,
}

impl Packet for ServerUpdateRequest {
    const TYPE: PacketType = PacketType::ServerUpdateRequest;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.version.write(w)?;
        w.write_u64(self.buyer_id)?;
        w.write_u64(self.request_id)?;
        w.write_u64(self.datacenter_id)?;
        w.write_u64(self.match_id)?;
        w.write_u32(self.num_sessions)?;
        w.write_address(Some(&self.server_address))
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            version: SdkVersion::read(r)?,
            buyer_id: r.read_u64()?,
            request_id: r.read_u64()?,
            datacenter_id: r.read_u64()?,
            match_id: r.read_u64()?,
            num_sessions: r.read_u32()?,
            server_address: read_required_address(r, "server")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdateResponse {
    pub request_id: u64,
    pub response: ServerResponseCode,
    pub magic: MagicValues,
}

impl Packet for ServerUpdateResponse {
    const TYPE: PacketType = PacketType::ServerUpdateResponse;

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u64(self.request_id)?;
        w.write_u8(self.response as u8)?;
        self.magic.write(w)
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            request_id: r.read_u64()?,
            response: ServerResponseCode::from_u8(r.read_u8()?)?,
            magic: MagicValues::read(r)?,
        })
    }
}
