//! Wire protocol between game server SDKs and the routing backend.
//!
//! - `bitstream`: bit-packed primitives every payload is built from.
//! - `envelope` and `filter`: the byte layout wrapped around each datagram.
//! - `packets`: typed request/response payloads.
//! - `session_data`: the signed per-session record echoed back each slice.
//!
//! All decoders are panic-free: hostile input is reported as
//! `NextRouteError` instead of panicking or indexing raw buffers.

pub mod address;
pub mod bitstream;
pub mod constants;
pub mod envelope;
pub mod filter;
pub mod packet_type;
pub mod packets;
pub mod session_data;
pub mod version;

pub use packet_type::PacketType;
pub use version::SdkVersion;
