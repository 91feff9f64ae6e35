//! Dispatcher module exports.
//!
//! The dispatcher runs the gate and hands admitted packets to the handler
//! registered for their type; the four request handlers live in `handlers`.

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::{Dispatcher, Handled, HandlerEvent, PacketContext, PacketHandler};
pub use handlers::{
    HandlerDeps, MatchDataHandler, ServerInitHandler, ServerUpdateHandler, SessionUpdateHandler,
};
