//! Routing topology snapshot: relays, precomputed routes and near relay
//! handling. Produced externally, consumed read-only.

pub mod matrix;
pub mod near;

pub use matrix::{
    Relay, Route, RouteCandidate, RouteMatrix, SourceRelay, TopologySource, UNROUTABLE_COST,
};
pub use near::{
    held_near_relays, reframe_near_relays, source_relays, ClosestRelays, NearRelayCost,
    NearRelaySelector,
};
