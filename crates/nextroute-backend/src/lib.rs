//! nextroute backend: the stateless session-routing server.
//!
//! Datagrams pass the authentication gate, are dispatched to one handler per
//! request type, and session updates run through the per-slice state
//! machine. Session continuity lives in the signed `SessionData` each
//! response hands back to the SDK, so any instance can serve any packet.
//! The only shared state is read-mostly: the tenant directory and the
//! routing topology snapshot, both swapped wholesale on refresh.
//!
//! Consumed by the binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dispatch;
pub mod gate;
pub mod messages;
pub mod obs;
pub mod ops;
pub mod router;
pub mod routing;
pub mod session;
pub mod tokens;
pub mod topology;
pub mod transport;
