//! nextroute core: the session-routing wire protocol and shared error surface.
//!
//! This crate defines the bit-packed packet formats exchanged between game
//! server SDKs and the routing backend, the self-versioned `SessionData`
//! record that carries session continuity inside those packets, and the
//! envelope/filter byte layout wrapped around every datagram. It carries no
//! transport, runtime or crypto dependencies so the SDK tooling and the
//! backend can share it.
//!
//! # Failure behaviour
//! Panics, `unwrap`, and `expect` are compile-denied here. Every decode path
//! returns `NextRouteError` on hostile input instead of crashing the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, NextRouteError, Result};
