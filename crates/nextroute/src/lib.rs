//! Top-level facade crate for nextroute.
//!
//! Re-exports the wire protocol and the routing backend so tooling can depend
//! on a single crate.

pub mod core {
    pub use nextroute_core::*;
}

pub mod backend {
    pub use nextroute_backend::*;
}
