//! Session update state machine.
//!
//! Every slice is processed from scratch: the previous slice's state arrives
//! signed inside the request, is transformed, and goes back down in the
//! response. Nothing about a session is kept here between packets.
//!
//! Stages run in a fixed order; any stage may end the slice early with a
//! direct response:
//!
//! 1. pre-check (tenant, session data, vetoes, snapshot, datacenter)
//! 2. slice transform (inside pre-check, once the session data is trusted)
//! 3. fallback to direct
//! 4. near relay reframing / holding
//! 5. route decision
//! 6. post (near relay selection, bookkeeping, response, messages)

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;

use nextroute_core::error::Result;
use nextroute_core::protocol::constants::{BILLING_SLICE_SECONDS, INVALID_ROUTE_VALUE, MAX_SESSION_DEBUG};
use nextroute_core::protocol::packets::{
    NearRelayList, ResponseNearRelay, RouteTokens, SessionDataBlob, SessionUpdateRequest,
    SessionUpdateResponse, TokenKind,
};
use nextroute_core::protocol::session_data::{HeldNearRelay, SessionData};
use nextroute_core::protocol::SdkVersion;

use crate::config::BackendSection;
use crate::context::{Buyer, DatacenterLookup, Locator, MagicSource};
use crate::crypto::{self, BackendKeys};
use crate::messages::{
    FirstSliceFields, MessageSinks, NextSliceFields, PortalNearRelayUpdateMessage,
    PortalSessionUpdateMessage, SessionSummaryMessage, SessionUpdateMessage,
};
use crate::routing::{LeaveReason, NextInputs, RouteDecider, RouteInputs, StayDecision, ThresholdDecider};
use crate::tokens::{RouteHop, RouteTokenBuilder, TokenParams};
use crate::topology::{
    held_near_relays, reframe_near_relays, source_relays, ClosestRelays, NearRelayCost,
    NearRelaySelector, RouteCandidate, RouteMatrix, TopologySource, UNROUTABLE_COST,
};

use super::flags::{FlagSet, RouteOutcome, SessionFlag};

const MAX_REAL_JITTER: f32 = 1000.0;

/// Engine knobs taken from the `backend` config section.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub route_matrix_stale_secs: u64,
    pub long_update: Duration,
    pub max_near_relays: usize,
    pub minimum_sdk_version: SdkVersion,
}

impl EngineSettings {
    pub fn from_config(cfg: &BackendSection) -> Result<Self> {
        Ok(Self {
            route_matrix_stale_secs: cfg.route_matrix_stale_secs,
            long_update: Duration::from_millis(cfg.long_update_ms),
            max_near_relays: cfg.max_near_relays,
            minimum_sdk_version: cfg.min_sdk_version()?,
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            route_matrix_stale_secs: 30,
            long_update: Duration::from_millis(100),
            max_near_relays: 16,
            minimum_sdk_version: SdkVersion::new(5, 0, 0),
        }
    }
}

/// Per-request inputs that are not part of the packet.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    /// Unix seconds.
    pub now: u64,
}

impl SessionContext {
    pub fn at(now: u64) -> Self {
        Self { now }
    }

    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { now }
    }
}

/// Everything one slice decided.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub kind: RouteOutcome,
    pub flags: Vec<SessionFlag>,
    /// Same flags as a bitmask.
    pub flag_bits: u64,
    pub response: SessionUpdateResponse,
    pub output: SessionData,
    pub real_packet_loss: f32,
    pub real_jitter: f32,
    pub real_out_of_order: f32,
    pub sent_session_update_message: bool,
    pub elapsed: Duration,
}

impl SessionOutcome {
    pub fn has(&self, flag: SessionFlag) -> bool {
        self.flag_bits & flag.bit() != 0
    }
}

pub struct SessionUpdateEngine {
    keys: Arc<BackendKeys>,
    topology: Arc<dyn TopologySource>,
    datacenters: Arc<dyn DatacenterLookup>,
    magic: Arc<dyn MagicSource>,
    sinks: MessageSinks,
    locator: Option<Arc<dyn Locator>>,
    selector: Arc<dyn NearRelaySelector>,
    decider: Arc<dyn RouteDecider>,
    settings: EngineSettings,
}

/// Working state for one slice. Dropped when the slice is done.
struct Slice<'a> {
    request: &'a SessionUpdateRequest,
    buyer: &'a Buyer,
    now: u64,
    matrix: Arc<RouteMatrix>,
    input: SessionData,
    output: SessionData,
    /// Session data was created or verified; it is written back.
    trusted: bool,
    response: SessionUpdateResponse,
    flags: FlagSet,
    kind: RouteOutcome,
    debug: Option<String>,
    real_packet_loss: f32,
    real_jitter: f32,
    real_out_of_order: f32,
    dest_relays: Vec<usize>,
    near: Vec<NearRelayCost>,
}

impl Slice<'_> {
    fn flag(&mut self, flag: SessionFlag) {
        self.flags.set(flag);
    }

    fn note(&mut self, line: &str) {
        if let Some(debug) = self.debug.as_mut() {
            debug.push_str(line);
            debug.push('\n');
            truncate_debug(debug);
        }
    }

    fn analysis_only(&self) -> bool {
        self.flags.contains(SessionFlag::AnalysisOnly)
    }

    fn datacenter_usable(&self) -> bool {
        !self.flags.contains(SessionFlag::UnknownDatacenter)
            && !self.flags.contains(SessionFlag::DatacenterNotEnabled)
    }

    fn clear_route(&mut self) {
        self.output.route_state.next = false;
        self.output.route_relay_ids.clear();
        self.output.route_cost = 0;
        self.output.route_changed = false;
        self.response.route = None;
    }

    fn veto(&mut self) {
        self.clear_route();
        self.output.route_state.apply_veto();
        self.kind = RouteOutcome::Vetoed;
    }
}

fn delta_percent(now: u64, prev: u64, sent: u64) -> f32 {
    if sent == 0 {
        return 0.0;
    }
    (now.saturating_sub(prev) as f64 / sent as f64 * 100.0) as f32
}

fn random_session_id() -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u64 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

/// Keep the debug trace within what the response can carry, cutting on a
/// char boundary.
fn truncate_debug(debug: &mut String) {
    let limit = MAX_SESSION_DEBUG - 1;
    if debug.len() <= limit {
        return;
    }
    let mut end = limit;
    while !debug.is_char_boundary(end) {
        end -= 1;
    }
    debug.truncate(end);
}

/// Flags that keep slice 0 from handing out near relays.
const NO_NEAR_RELAYS_WHEN: [SessionFlag; 9] = [
    SessionFlag::BuyerNotLive,
    SessionFlag::SdkTooOld,
    SessionFlag::ClientPingTimedOut,
    SessionFlag::LocationVeto,
    SessionFlag::OptOut,
    SessionFlag::StaleRouteMatrix,
    SessionFlag::AnalysisOnly,
    SessionFlag::UnknownDatacenter,
    SessionFlag::DatacenterNotEnabled,
];

impl SessionUpdateEngine {
    pub fn new(
        keys: Arc<BackendKeys>,
        topology: Arc<dyn TopologySource>,
        datacenters: Arc<dyn DatacenterLookup>,
        magic: Arc<dyn MagicSource>,
        sinks: MessageSinks,
        settings: EngineSettings,
    ) -> Self {
        Self {
            keys,
            topology,
            datacenters,
            magic,
            sinks,
            locator: None,
            selector: Arc::new(ClosestRelays),
            decider: Arc::new(ThresholdDecider),
            settings,
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn NearRelaySelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn RouteDecider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Process one session update request from an admitted tenant.
    pub fn process(
        &self,
        ctx: &SessionContext,
        buyer: &Buyer,
        request: &SessionUpdateRequest,
    ) -> SessionOutcome {
        let started = Instant::now();

        let mut slice = Slice {
            request,
            buyer,
            now: ctx.now,
            matrix: self.topology.current(),
            input: SessionData::default(),
            output: SessionData::default(),
            trusted: false,
            response: SessionUpdateResponse {
                session_id: request.session_id,
                slice_number: request.slice_number,
                ..SessionUpdateResponse::default()
            },
            flags: FlagSet::default(),
            kind: RouteOutcome::Direct,
            debug: None,
            real_packet_loss: 0.0,
            real_jitter: 0.0,
            real_out_of_order: 0.0,
            dest_relays: Vec::new(),
            near: Vec::new(),
        };
        slice.output.session_id = request.session_id;

        let terminal = self.pre_check(&mut slice);
        if terminal {
            // The SDK is told to go direct; stop claiming a route.
            slice.clear_route();
        } else if !self.fallback_to_direct(&mut slice) {
            self.update_near_relays(&mut slice);
            self.make_route_decision(&mut slice);
        }

        self.post(&mut slice);

        let elapsed = started.elapsed();
        if elapsed > self.settings.long_update {
            slice.flag(SessionFlag::LongDuration);
            tracing::warn!(
                buyer_id = buyer.id,
                session_id = slice.output.session_id,
                slice = request.slice_number,
                elapsed_ms = elapsed.as_millis() as u64,
                "long session update"
            );
        }

        let sent = self.emit_messages(&slice);

        SessionOutcome {
            kind: slice.kind,
            flag_bits: slice.flags.bits(),
            flags: slice.flags.into_vec(),
            response: slice.response,
            output: slice.output,
            real_packet_loss: slice.real_packet_loss,
            real_jitter: slice.real_jitter,
            real_out_of_order: slice.real_out_of_order,
            sent_session_update_message: sent,
            elapsed,
        }
    }

    /// Returns true when the slice ends here with a direct response.
    fn pre_check(&self, s: &mut Slice<'_>) -> bool {
        let request = s.request;
        let buyer = s.buyer;

        if buyer.route_shader.analysis_only {
            s.flag(SessionFlag::AnalysisOnly);
        }
        if request.client_bandwidth_over_limit {
            s.flag(SessionFlag::ClientNextBandwidthOverLimit);
        }
        if request.server_bandwidth_over_limit {
            s.flag(SessionFlag::ServerNextBandwidthOverLimit);
        }

        if !buyer.live {
            s.flag(SessionFlag::BuyerNotLive);
            return true;
        }
        if !request.version.at_least(&self.settings.minimum_sdk_version) {
            s.flag(SessionFlag::SdkTooOld);
            return true;
        }

        if request.slice_number == 0 {
            self.new_session(s);
        } else if !self.existing_session(s) {
            return true;
        }

        if request.client_ping_timed_out {
            s.flag(SessionFlag::ClientPingTimedOut);
            return true;
        }

        if s.output.route_state.location_veto {
            s.flag(SessionFlag::LocationVeto);
            return true;
        }
        if s.output.route_state.opt_out {
            s.flag(SessionFlag::OptOut);
            return true;
        }

        if request.slice_number == 0 {
            if let Some(locator) = &self.locator {
                match locator.locate(&request.client_address) {
                    Some((lat, lon)) if !(lat == 0.0 && lon == 0.0) => {
                        s.output.latitude = lat;
                        s.output.longitude = lon;
                    }
                    _ => {
                        tracing::debug!(
                            buyer_id = buyer.id,
                            session_id = s.output.session_id,
                            "location veto"
                        );
                        s.output.route_state.location_veto = true;
                        s.flag(SessionFlag::LocationVeto);
                        return true;
                    }
                }
            }
            if buyer.opted_out(&request.tags) {
                s.output.route_state.opt_out = true;
                s.flag(SessionFlag::OptOut);
                return true;
            }
        }

        if s.matrix.is_stale(s.now, self.settings.route_matrix_stale_secs) {
            tracing::debug!(created_at = s.matrix.created_at(), now = s.now, "stale route matrix");
            s.flag(SessionFlag::StaleRouteMatrix);
            return true;
        }

        let terminal_unless_analysis = !s.analysis_only();
        if self.datacenters.lookup_datacenter(request.datacenter_id).is_none() {
            s.flag(SessionFlag::UnknownDatacenter);
            if terminal_unless_analysis {
                return true;
            }
        }
        if !buyer.datacenter_enabled(request.datacenter_id) {
            s.flag(SessionFlag::DatacenterNotEnabled);
            if terminal_unless_analysis {
                return true;
            }
        }

        s.dest_relays = s.matrix.dest_relays(request.datacenter_id);
        if s.dest_relays.is_empty() {
            s.flag(SessionFlag::NoRelaysInDatacenter);
        }

        if buyer.debug {
            s.debug = Some(String::new());
        }
        false
    }

    fn new_session(&self, s: &mut Slice<'_>) {
        let now = s.now;
        let session_id = if s.request.session_id != 0 {
            s.request.session_id
        } else {
            random_session_id()
        };
        s.output = SessionData {
            session_id,
            session_version: 0,
            slice_number: 1,
            start_timestamp: now,
            expire_timestamp: now + 2 * BILLING_SLICE_SECONDS,
            ..SessionData::default()
        };
        s.input = s.output.clone();
        s.response.session_id = session_id;
        s.trusted = true;
    }

    /// Verify, decode and advance the session data. False when it cannot be
    /// trusted; the response then carries none.
    fn existing_session(&self, s: &mut Slice<'_>) -> bool {
        let request = s.request;
        let Some(blob) = request.session_data.as_ref() else {
            s.flag(SessionFlag::SessionDataSignatureCheckFailed);
            return false;
        };
        if !self.keys.verify_own(&blob.data, &blob.signature) {
            tracing::debug!(
                buyer_id = s.buyer.id,
                session_id = request.session_id,
                "session data signature check failed"
            );
            s.flag(SessionFlag::SessionDataSignatureCheckFailed);
            return false;
        }

        let input = match SessionData::decode(&blob.data) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(
                    buyer_id = s.buyer.id,
                    session_id = request.session_id,
                    error = %e,
                    "failed to read session data"
                );
                s.flag(SessionFlag::FailedToReadSessionData);
                return false;
            }
        };

        if input.session_id != request.session_id {
            s.flag(SessionFlag::BadSessionId);
            return false;
        }
        if input.slice_number != request.slice_number {
            s.flag(SessionFlag::BadSliceNumber);
            return false;
        }

        s.output = input.clone();
        s.output.slice_number += 1;
        s.output.expire_timestamp += BILLING_SLICE_SECONDS;

        if input.route_state.next && !input.wrote_summary {
            let shader = &s.buyer.route_shader;
            s.output.envelope_bytes_up_sum +=
                u64::from(shader.bandwidth_envelope_up_kbps) * 1000 * BILLING_SLICE_SECONDS / 8;
            s.output.envelope_bytes_down_sum +=
                u64::from(shader.bandwidth_envelope_down_kbps) * 1000 * BILLING_SLICE_SECONDS / 8;
        }

        let sent_c2s = request
            .packets_sent_client_to_server
            .saturating_sub(input.prev_packets_sent_client_to_server);
        let sent_s2c = request
            .packets_sent_server_to_client
            .saturating_sub(input.prev_packets_sent_server_to_client);

        s.real_packet_loss = delta_percent(
            request.packets_lost_client_to_server,
            input.prev_packets_lost_client_to_server,
            sent_c2s,
        )
        .max(delta_percent(
            request.packets_lost_server_to_client,
            input.prev_packets_lost_server_to_client,
            sent_s2c,
        ));
        s.real_out_of_order = delta_percent(
            request.packets_out_of_order_client_to_server,
            input.prev_packets_out_of_order_client_to_server,
            sent_c2s,
        )
        .max(delta_percent(
            request.packets_out_of_order_server_to_client,
            input.prev_packets_out_of_order_server_to_client,
            sent_s2c,
        ));
        s.real_jitter = request
            .jitter_client_to_server
            .min(MAX_REAL_JITTER)
            .max(request.jitter_server_to_client.min(MAX_REAL_JITTER));

        s.input = input;
        s.response.session_id = s.output.session_id;
        s.trusted = true;
        true
    }

    /// Returns true when the session is (now or already) fallen back.
    fn fallback_to_direct(&self, s: &mut Slice<'_>) -> bool {
        if s.request.fallback_to_direct && !s.output.fallback_to_direct {
            tracing::debug!(
                buyer_id = s.buyer.id,
                session_id = s.output.session_id,
                "fallback to direct"
            );
            s.output.fallback_to_direct = true;
            s.flag(SessionFlag::FallbackToDirect);
        }
        if s.output.fallback_to_direct {
            s.clear_route();
            s.kind = RouteOutcome::Fallback;
            return true;
        }
        false
    }

    fn update_near_relays(&self, s: &mut Slice<'_>) {
        if s.request.slice_number == 0 || s.analysis_only() || !s.datacenter_usable() {
            return;
        }

        s.near = match &s.output.held_near_relays {
            Some(held) => held_near_relays(&s.matrix, held),
            None => reframe_near_relays(
                &s.matrix,
                &s.request.near_relays,
                s.request.direct.rtt,
                s.request.direct.jitter,
            ),
        };

        if s.buyer.internal.large_customer && s.request.slice_number >= 4 && s.output.held_near_relays.is_none() {
            let held = s
                .near
                .iter()
                .map(|c| HeldNearRelay {
                    id: c.id,
                    rtt: c.cost.clamp(0, UNROUTABLE_COST) as u32,
                })
                .collect();
            s.output.held_near_relays = Some(held);
            s.flag(SessionFlag::HoldingNearRelays);
            s.note("holding near relays");
        }
        if s.output.held_near_relays.is_some() {
            s.response.exclude_near_relays = true;
        }
    }

    fn make_route_decision(&self, s: &mut Slice<'_>) {
        let sources = source_relays(&s.near);
        let dests = s.dest_relays.clone();
        let matrix = Arc::clone(&s.matrix);
        let buyer = s.buyer;
        let inputs = RouteInputs {
            matrix: &matrix,
            shader: &buyer.route_shader,
            internal: &buyer.internal,
            user_hash: s.request.user_hash,
            direct_rtt: s.request.direct.rtt as i32,
            direct_packet_loss: s.real_packet_loss,
            sources: &sources,
            dests: &dests,
        };

        if !s.input.route_state.next {
            if s.analysis_only() || sources.is_empty() || s.dest_relays.is_empty() {
                s.flag(SessionFlag::StayDirect);
                s.note("staying direct");
                return;
            }
            match self.decider.decide_take_route(&inputs, &mut s.output.route_state) {
                Some(route) => {
                    s.flag(SessionFlag::TakeNetworkNext);
                    self.issue_route(s, &route, TokenKind::New, true);
                }
                None => {
                    let rs = &s.output.route_state;
                    if rs.veto || rs.disabled || rs.not_selected || rs.b || rs.location_veto {
                        s.flag(SessionFlag::EarlyOutDirect);
                    }
                    s.flag(SessionFlag::StayDirect);
                    s.note("staying direct");
                }
            }
            return;
        }

        if s.input.route_relay_ids.is_empty() {
            tracing::debug!(session_id = s.output.session_id, "on next without route relays");
            s.flag(SessionFlag::NoRouteRelays);
            s.note("no route relays");
            s.veto();
            return;
        }

        if s.request.next.is_none() {
            s.flag(SessionFlag::Aborted);
            s.note("aborted");
            s.veto();
            s.kind = RouteOutcome::Aborted;
            return;
        }

        let current = matrix.reframe_route(&s.output.route_relay_ids);
        if current.is_none() {
            s.flag(SessionFlag::RouteRelayNoLongerExists);
            s.note("route relay no longer exists");
        }

        let next = NextInputs {
            next_rtt: s.request.next.map_or(0, |n| n.rtt as i32),
            predicted_rtt: s.input.route_cost as i32,
            current_route: current.as_deref(),
        };

        match self
            .decider
            .decide_stay_on_route(&inputs, &next, &mut s.output.route_state)
        {
            StayDecision::Stay { route, changed: true } => {
                s.flag(SessionFlag::RouteChanged);
                self.issue_route(s, &route, TokenKind::New, true);
            }
            StayDecision::Stay { route, changed: false } => {
                s.flag(SessionFlag::RouteContinued);
                self.issue_route(s, &route, TokenKind::Continue, false);
            }
            StayDecision::Leave(reason) => {
                let flag = match reason {
                    LeaveReason::NoRoute if s.output.route_state.route_lost => {
                        SessionFlag::RouteNoLongerExists
                    }
                    LeaveReason::NoRoute => SessionFlag::NoRoute,
                    LeaveReason::Mispredict => SessionFlag::Mispredict,
                    LeaveReason::LatencyWorse => SessionFlag::LatencyWorse,
                    LeaveReason::NextLatencyTooHigh => SessionFlag::NextLatencyTooHigh,
                    LeaveReason::MultipathOverload => SessionFlag::MultipathOverload,
                    LeaveReason::EarlyOut => SessionFlag::EarlyOutDirect,
                };
                s.flag(flag);
                s.note(flag.as_str());
                s.veto();
            }
        }
    }

    /// Build tokens for `route` and store it in the output.
    fn issue_route(&self, s: &mut Slice<'_>, route: &RouteCandidate, kind: TokenKind, changed: bool) {
        let matrix = Arc::clone(&s.matrix);
        let request = s.request;

        let mut hops = Vec::with_capacity(route.relays.len() + 2);
        hops.push(RouteHop {
            address: request.client_address,
            public_key: request.client_route_public_key,
        });
        for &index in &route.relays {
            let Some(relay) = matrix.relay(index) else {
                tracing::error!(index, "route refers to a relay outside the snapshot");
                s.clear_route();
                return;
            };
            hops.push(RouteHop {
                address: relay.address,
                public_key: relay.public_key,
            });
        }
        hops.push(RouteHop {
            address: request.server_address,
            public_key: request.server_route_public_key,
        });

        let mut session_version = s.output.session_version;
        let expire_timestamp = match kind {
            TokenKind::New => {
                session_version = session_version.wrapping_add(1);
                if s.output.write_summary {
                    s.output.expire_timestamp
                } else {
                    s.output.expire_timestamp + BILLING_SLICE_SECONDS
                }
            }
            TokenKind::Continue => s.output.expire_timestamp,
        };
        let params = TokenParams {
            expire_timestamp,
            session_id: s.output.session_id,
            session_version,
            kbps_up: s.buyer.route_shader.bandwidth_envelope_up_kbps,
            kbps_down: s.buyer.route_shader.bandwidth_envelope_down_kbps,
        };

        let tokens = match RouteTokenBuilder::new(self.keys.routing_secret()).build(kind, &params, &hops) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(
                    buyer_id = s.buyer.id,
                    session_id = s.output.session_id,
                    error = %e,
                    "failed to build route tokens"
                );
                s.clear_route();
                s.kind = RouteOutcome::Direct;
                return;
            }
        };

        let relay_ids = matrix.relay_ids(&route.relays);
        if s.debug.is_some() {
            let names: Vec<&str> = route
                .relays
                .iter()
                .filter_map(|&i| matrix.relay(i).map(|r| r.name.as_str()))
                .collect();
            let label = match kind {
                TokenKind::Continue => "route continued",
                TokenKind::New if s.flags.contains(SessionFlag::TakeNetworkNext) => "take network next",
                TokenKind::New => "route changed",
            };
            s.note(&format!("{}: {} (cost {})", label, names.join(" - "), route.cost));
        }

        s.output.session_version = session_version;
        s.output.route_state.next = true;
        s.output.route_cost = route.cost.clamp(0, INVALID_ROUTE_VALUE as i32) as u32;
        s.output.route_changed = changed;
        s.output.route_relay_ids = relay_ids;
        s.response.route = Some(RouteTokens {
            multipath: s.output.route_state.multipath,
            ..tokens
        });
        s.kind = match kind {
            TokenKind::New => RouteOutcome::NewRoute,
            TokenKind::Continue => RouteOutcome::ContinueRoute,
        };
    }

    fn post(&self, s: &mut Slice<'_>) {
        let request = s.request;

        if request.slice_number == 0
            && s.trusted
            && !NO_NEAR_RELAYS_WHEN.iter().any(|f| s.flags.contains(*f))
        {
            self.attach_near_relays(s);
        }

        if s.trusted {
            if !s.output.wrote_summary {
                s.output.session_duration += BILLING_SLICE_SECONDS as u32;
                if s.input.route_state.next {
                    s.output.duration_on_next += BILLING_SLICE_SECONDS as u32;
                    s.flag(SessionFlag::EverOnNext);
                }
            }

            s.output.prev_packets_sent_client_to_server = request.packets_sent_client_to_server;
            s.output.prev_packets_sent_server_to_client = request.packets_sent_server_to_client;
            s.output.prev_packets_lost_client_to_server = request.packets_lost_client_to_server;
            s.output.prev_packets_lost_server_to_client = request.packets_lost_server_to_client;
            s.output.prev_packets_out_of_order_client_to_server =
                request.packets_out_of_order_client_to_server;
            s.output.prev_packets_out_of_order_server_to_client =
                request.packets_out_of_order_server_to_client;

            if request.client_ping_timed_out {
                if s.output.write_summary {
                    s.output.wrote_summary = true;
                    s.output.write_summary = false;
                }
                if !s.output.wrote_summary {
                    s.output.write_summary = true;
                    s.flag(SessionFlag::Summary);
                }
            }
        }

        if s.output.slice_number != 1 {
            s.response.near_relays = None;
        }

        if s.trusted {
            match self.sign_session_data(&s.output) {
                Ok(blob) => s.response.session_data = Some(blob),
                Err(e) => {
                    tracing::error!(
                        session_id = s.output.session_id,
                        error = %e,
                        "failed to write session data"
                    );
                    s.flag(SessionFlag::FailedToWriteSessionData);
                }
            }
        }

        if s.response.route.is_some() {
            s.flag(SessionFlag::Next);
        }
        s.response.debug = s.debug.take().filter(|d| !d.is_empty());
        s.response.magic = self.magic.magic_values();
    }

    fn attach_near_relays(&self, s: &mut Slice<'_>) {
        let matrix = Arc::clone(&s.matrix);
        let selected = self.selector.select(
            &matrix,
            s.output.latitude,
            s.output.longitude,
            self.settings.max_near_relays,
        );
        if selected.is_empty() {
            s.flag(SessionFlag::NoNearRelays);
            return;
        }

        let expire_timestamp = s.output.expire_timestamp;
        let relays = selected
            .into_iter()
            .filter_map(|i| matrix.relay(i))
            .map(|relay| ResponseNearRelay {
                id: relay.id,
                address: relay.address,
                ping_token: self.keys.ping_token(expire_timestamp, &s.request.client_address, &relay.address),
            })
            .collect();
        s.response.near_relays = NearRelayList::new(relays, expire_timestamp);
    }

    fn sign_session_data(&self, output: &SessionData) -> Result<SessionDataBlob> {
        let data = output.encode()?;
        let signature = crypto::sign(self.keys.signing_key(), &data);
        Ok(SessionDataBlob { data, signature })
    }

    /// Returns whether the session update message was accepted by its sink.
    fn emit_messages(&self, s: &Slice<'_>) -> bool {
        let request = s.request;
        let buyer_id = s.buyer.id;
        let session_id = s.output.session_id;
        let on_next = s.flags.contains(SessionFlag::Next);
        let route_relay_ids = if on_next {
            s.output.route_relay_ids.clone()
        } else {
            Vec::new()
        };

        let first_slice = (request.slice_number == 0).then(|| FirstSliceFields {
            datacenter_id: request.datacenter_id,
            platform_type: request.platform_type,
            connection_type: request.connection_type,
            client_address: request.client_address,
            server_address: request.server_address,
            tags: request.tags.clone(),
        });
        let next = on_next.then(|| {
            let stats = request.next.unwrap_or_default();
            NextSliceFields {
                next_rtt: stats.rtt,
                next_jitter: stats.jitter,
                next_packet_loss: stats.packet_loss,
                next_kbps_up: stats.kbps_up,
                next_kbps_down: stats.kbps_down,
                route_cost: s.output.route_cost,
                route_relay_ids: route_relay_ids.clone(),
            }
        });

        let sent = self.sinks.session_update.offer(SessionUpdateMessage {
            timestamp: s.now,
            buyer_id,
            session_id,
            slice_number: request.slice_number,
            flags: s.flags.bits(),
            route_type: s.response.route_type(),
            user_hash: request.user_hash,
            direct_rtt: request.direct.rtt,
            direct_jitter: request.direct.jitter,
            direct_packet_loss: request.direct.packet_loss,
            real_packet_loss: s.real_packet_loss,
            real_jitter: s.real_jitter,
            real_out_of_order: s.real_out_of_order,
            first_slice,
            next,
        });

        if s.flags.contains(SessionFlag::Summary) {
            self.sinks.session_summary.offer(SessionSummaryMessage {
                timestamp: s.now,
                buyer_id,
                session_id,
                start_timestamp: s.output.start_timestamp,
                session_duration: s.output.session_duration,
                duration_on_next: s.output.duration_on_next,
                envelope_bytes_up_sum: s.output.envelope_bytes_up_sum,
                envelope_bytes_down_sum: s.output.envelope_bytes_down_sum,
                ever_on_next: s.output.duration_on_next > 0,
            });
        }

        if !request.client_ping_timed_out {
            self.sinks.portal_session_update.offer(PortalSessionUpdateMessage {
                timestamp: s.now,
                buyer_id,
                session_id,
                user_hash: request.user_hash,
                slice_number: request.slice_number,
                next: on_next,
                direct_rtt: request.direct.rtt,
                next_rtt: request.next.map_or(0.0, |n| n.rtt),
                real_packet_loss: s.real_packet_loss,
                route_relay_ids,
            });

            if request.slice_number == 1 && !request.near_relays.is_empty() {
                self.sinks.portal_near_relay_update.offer(PortalNearRelayUpdateMessage {
                    timestamp: s.now,
                    buyer_id,
                    session_id,
                    near_relays: request.near_relays.clone(),
                });
            }
        }

        sent
    }
}

