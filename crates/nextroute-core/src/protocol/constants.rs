//! Protocol limits and sizes shared by the SDK codec and the backend.

/// Largest datagram the protocol produces. A session update response with
/// every section at its limit (32 IPv6 near relays, 7 route tokens, full
/// session data and debug text) is 4430 bytes framed.
pub const MAX_PACKET_BYTES: usize = 4608;

/// Bytes before the payload: one type tag plus fifteen filter bytes.
pub const PACKET_HEADER_BYTES: usize = 16;
/// Ed25519 signature length.
pub const SIGNATURE_BYTES: usize = 64;
/// Trailing filter bytes.
pub const PACKET_TRAILER_BYTES: usize = 2;
/// SDK version bytes that precede the buyer id in every request.
pub const VERSION_BYTES: usize = 3;
/// Offset of the little-endian buyer id inside a request datagram.
pub const BUYER_ID_OFFSET: usize = PACKET_HEADER_BYTES + VERSION_BYTES;
/// Largest payload that still frames within [`MAX_PACKET_BYTES`].
pub const MAX_PAYLOAD_BYTES: usize =
    MAX_PACKET_BYTES - PACKET_HEADER_BYTES - SIGNATURE_BYTES - PACKET_TRAILER_BYTES;
/// Narrowest datagram any request type can occupy.
pub const MIN_PACKET_BYTES: usize =
    PACKET_HEADER_BYTES + VERSION_BYTES + 8 + SIGNATURE_BYTES + PACKET_TRAILER_BYTES;

pub const KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 24;
pub const MAC_BYTES: usize = 16;
pub const MAGIC_BYTES: usize = 8;
pub const PING_TOKEN_BYTES: usize = 32;

/// Fixed-width address form used inside route tokens.
pub const ADDRESS_BYTES: usize = 19;

pub const MAX_NEAR_RELAYS: usize = 32;
pub const MAX_RELAYS_PER_ROUTE: usize = 5;
/// Route hops including the client and the server.
pub const MAX_TOKENS: usize = MAX_RELAYS_PER_ROUTE + 2;

pub const ROUTE_TOKEN_BYTES: usize = 8 + 8 + 1 + 4 + 4 + ADDRESS_BYTES + KEY_BYTES;
pub const ENCRYPTED_ROUTE_TOKEN_BYTES: usize = NONCE_BYTES + ROUTE_TOKEN_BYTES + MAC_BYTES;
pub const CONTINUE_TOKEN_BYTES: usize = 8 + 8 + 1;
pub const ENCRYPTED_CONTINUE_TOKEN_BYTES: usize = NONCE_BYTES + CONTINUE_TOKEN_BYTES + MAC_BYTES;

pub const SESSION_DATA_VERSION_MIN: u32 = 1;
pub const SESSION_DATA_VERSION_MAX: u32 = 1;
pub const SESSION_DATA_VERSION_WRITE: u32 = 1;
pub const MAX_SESSION_DATA_BYTES: usize = 511;

pub const MAX_SESSION_DEBUG: usize = 1024;
pub const MAX_DATACENTER_NAME: usize = 256;
pub const MAX_MATCH_VALUES: usize = 64;
pub const MAX_TAGS: usize = 8;
pub const MAX_SESSION_UPDATE_RETRIES: u32 = 10;
pub const MAX_PLATFORM_TYPE: u32 = 10;
pub const MAX_CONNECTION_TYPE: u32 = 3;

/// Wire ceiling for near relay RTT and jitter; also the "unroutable" cost.
pub const MAX_NEAR_RELAY_RTT: u32 = 255;
pub const MAX_NEAR_RELAY_JITTER: u32 = 255;

pub const BILLING_SLICE_SECONDS: u64 = 10;
/// Ceiling for stored route costs.
pub const INVALID_ROUTE_VALUE: u32 = 10_000;
pub const COST_BIAS: i32 = 3;
pub const JITTER_THRESHOLD: i32 = 15;
