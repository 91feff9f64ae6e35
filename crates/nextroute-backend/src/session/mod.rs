//! Per-slice session routing.

pub mod engine;
pub mod flags;

pub use engine::{EngineSettings, SessionContext, SessionOutcome, SessionUpdateEngine};
pub use flags::{FlagSet, RouteOutcome, SessionFlag};
