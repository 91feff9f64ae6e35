//! Take / stay decisions for one slice.
//!
//! The session engine owns the state machine; it asks a [`RouteDecider`]
//! only two questions: should a direct session take a route, and should a
//! session on a route stay on it. Deciders mutate the carried
//! [`RouteState`] flags and counters but never apply a veto themselves.

use nextroute_core::protocol::session_data::{RouteState, MAX_ROUTE_COUNTER};

use crate::config::{InternalConfig, RouteShader};
use crate::topology::{RouteCandidate, RouteMatrix, SourceRelay};

/// Mispredicting by this many milliseconds counts toward leaving a route.
const MISPREDICT_MARGIN_MS: i32 = 10;

/// Inputs shared by both decisions.
pub struct RouteInputs<'a> {
    pub matrix: &'a RouteMatrix,
    pub shader: &'a RouteShader,
    pub internal: &'a InternalConfig,
    pub user_hash: u64,
    pub direct_rtt: i32,
    pub direct_packet_loss: f32,
    pub sources: &'a [SourceRelay],
    pub dests: &'a [usize],
}

/// What is known about the route the session is on.
pub struct NextInputs<'a> {
    pub next_rtt: i32,
    /// Route cost stored last slice; 0 when unknown.
    pub predicted_rtt: i32,
    /// Current route by topology index; `None` when a hop left the topology.
    pub current_route: Option<&'a [usize]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Buyer policy turned acceleration off for this session.
    EarlyOut,
    Mispredict,
    MultipathOverload,
    LatencyWorse,
    NoRoute,
    NextLatencyTooHigh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StayDecision {
    Stay { route: RouteCandidate, changed: bool },
    Leave(LeaveReason),
}

pub trait RouteDecider: Send + Sync {
    /// Route to take from direct, if any.
    fn decide_take_route(&self, inputs: &RouteInputs<'_>, state: &mut RouteState) -> Option<RouteCandidate>;

    fn decide_stay_on_route(
        &self,
        inputs: &RouteInputs<'_>,
        next: &NextInputs<'_>,
        state: &mut RouteState,
    ) -> StayDecision;
}

/// Applies the buyer's route shader and internal thresholds to topology
/// route costs. Route choice is the cheapest qualifying route.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdDecider;

/// Policy reasons a session never accelerates. Sets the matching flag.
fn early_out_direct(shader: &RouteShader, state: &mut RouteState, user_hash: u64) -> bool {
    if state.veto || state.location_veto || state.disabled || state.not_selected || state.b {
        return true;
    }
    if shader.disable_network_next {
        state.disabled = true;
        return true;
    }
    if shader.selection_percent == 0 || user_hash % 100 > u64::from(shader.selection_percent) {
        state.not_selected = true;
        return true;
    }
    if shader.ab_test {
        state.ab_test = true;
        if user_hash % 2 == 1 {
            state.b = true;
            return true;
        }
        state.a = true;
    }
    false
}

fn bump(counter: &mut u32) -> u32 {
    *counter = (*counter + 1).min(MAX_ROUTE_COUNTER);
    *counter
}

impl RouteDecider for ThresholdDecider {
    fn decide_take_route(&self, inputs: &RouteInputs<'_>, state: &mut RouteState) -> Option<RouteCandidate> {
        let shader = inputs.shader;
        let internal = inputs.internal;
        if early_out_direct(shader, state, inputs.user_hash) {
            return None;
        }

        let direct = inputs.direct_rtt;
        let mut max_cost = direct;

        let mut reduce_latency = false;
        if shader.reduce_latency {
            if direct > shader.acceptable_latency {
                max_cost = direct - (shader.latency_threshold + internal.route_select_threshold);
                reduce_latency = true;
            } else {
                max_cost = -1;
            }
        }

        let mut reduce_packet_loss = false;
        if shader.reduce_packet_loss && inputs.direct_packet_loss > shader.acceptable_packet_loss {
            max_cost = direct + internal.max_latency_trade_off - internal.route_select_threshold;
            reduce_packet_loss = true;
        }

        if shader.force_next {
            max_cost = i32::MAX;
            state.forced_next = true;
        }

        let route = inputs.matrix.best_route(inputs.sources, inputs.dests, max_cost)?;
        if route.cost > internal.max_rtt {
            return None;
        }

        let mut multipath = shader.multipath;
        if internal.multipath_threshold > 0 && direct - route.cost > internal.multipath_threshold {
            multipath = false;
        }

        state.next = true;
        state.reduce_latency = reduce_latency;
        state.reduce_packet_loss = reduce_packet_loss;
        state.multipath = multipath;
        state.committed = !internal.uncommitted;
        Some(route)
    }

    fn decide_stay_on_route(
        &self,
        inputs: &RouteInputs<'_>,
        next: &NextInputs<'_>,
        state: &mut RouteState,
    ) -> StayDecision {
        let shader = inputs.shader;
        let internal = inputs.internal;
        if early_out_direct(shader, state, inputs.user_hash) {
            return StayDecision::Leave(LeaveReason::EarlyOut);
        }

        let direct = inputs.direct_rtt;

        if next.predicted_rtt > 0 && next.next_rtt >= next.predicted_rtt + MISPREDICT_MARGIN_MS {
            if bump(&mut state.mispredict_counter) == MAX_ROUTE_COUNTER {
                state.mispredict = true;
                return StayDecision::Leave(LeaveReason::Mispredict);
            }
        } else {
            state.mispredict_counter = 0;
        }

        if state.multipath && direct >= internal.multipath_overload_threshold {
            return StayDecision::Leave(LeaveReason::MultipathOverload);
        }

        let mut max_cost = i32::MAX;
        if !shader.force_next {
            let rtt_veto = if state.multipath {
                internal.rtt_veto_multipath
            } else if state.reduce_packet_loss {
                internal.rtt_veto_packet_loss
            } else {
                internal.rtt_veto_default
            };

            if state.committed {
                let worse = next.next_rtt > direct - rtt_veto;
                if !state.multipath {
                    if worse {
                        state.latency_worse = true;
                        return StayDecision::Leave(LeaveReason::LatencyWorse);
                    }
                } else if worse {
                    if bump(&mut state.latency_worse_counter) == MAX_ROUTE_COUNTER {
                        state.latency_worse = true;
                        return StayDecision::Leave(LeaveReason::LatencyWorse);
                    }
                } else {
                    state.latency_worse_counter = 0;
                }
            }
            max_cost = direct - rtt_veto;
        }

        let matrix = inputs.matrix;
        let current_cost = next
            .current_route
            .and_then(|route| matrix.current_route_cost(route, inputs.sources));

        let (route, changed, lost) = match (current_cost, next.current_route) {
            (Some(cost), Some(relays)) => {
                let best = matrix.best_route(inputs.sources, inputs.dests, i32::MAX);
                match best {
                    Some(b) if cost > b.cost.saturating_add(internal.route_switch_threshold) => {
                        (Some(b), true, false)
                    }
                    _ => (
                        Some(RouteCandidate {
                            cost,
                            relays: relays.to_vec(),
                        }),
                        false,
                        false,
                    ),
                }
            }
            _ => (matrix.best_route(inputs.sources, inputs.dests, max_cost), true, true),
        };

        state.route_lost = lost;

        let Some(route) = route else {
            state.no_route = true;
            return StayDecision::Leave(LeaveReason::NoRoute);
        };

        if route.cost > internal.max_rtt {
            state.next_latency_too_high = true;
            return StayDecision::Leave(LeaveReason::NextLatencyTooHigh);
        }

        StayDecision::Stay { route, changed }
    }
}
