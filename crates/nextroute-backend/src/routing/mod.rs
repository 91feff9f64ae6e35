//! Route decision strategy.

pub mod decision;

pub use decision::{
    LeaveReason, NextInputs, RouteDecider, RouteInputs, StayDecision, ThresholdDecider,
};
