//! Per-slice diagnostic flags and outcome kinds.

use serde::Serialize;

/// One decision branch taken while processing a slice.
///
/// Discriminants are stable: they are bit positions in [`FlagSet::bits`]
/// and in the `flags` field of session update messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionFlag {
    AnalysisOnly = 0,
    ClientNextBandwidthOverLimit = 1,
    ServerNextBandwidthOverLimit = 2,
    BuyerNotLive = 3,
    SdkTooOld = 4,
    SessionDataSignatureCheckFailed = 5,
    FailedToReadSessionData = 6,
    BadSessionId = 7,
    BadSliceNumber = 8,
    ClientPingTimedOut = 9,
    LocationVeto = 10,
    OptOut = 11,
    StaleRouteMatrix = 12,
    UnknownDatacenter = 13,
    DatacenterNotEnabled = 14,
    NoRelaysInDatacenter = 15,
    FallbackToDirect = 16,
    HoldingNearRelays = 17,
    StayDirect = 18,
    TakeNetworkNext = 19,
    NoRouteRelays = 20,
    Aborted = 21,
    RouteRelayNoLongerExists = 22,
    RouteChanged = 23,
    RouteContinued = 24,
    RouteNoLongerExists = 25,
    Mispredict = 26,
    LatencyWorse = 27,
    NextLatencyTooHigh = 28,
    NoRoute = 29,
    MultipathOverload = 30,
    EarlyOutDirect = 31,
    NoNearRelays = 32,
    EverOnNext = 33,
    Summary = 34,
    Next = 35,
    FailedToWriteSessionData = 36,
    LongDuration = 37,
}

impl SessionFlag {
    pub fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionFlag::AnalysisOnly => "analysis_only",
            SessionFlag::ClientNextBandwidthOverLimit => "client_next_bandwidth_over_limit",
            SessionFlag::ServerNextBandwidthOverLimit => "server_next_bandwidth_over_limit",
            SessionFlag::BuyerNotLive => "buyer_not_live",
            SessionFlag::SdkTooOld => "sdk_too_old",
            SessionFlag::SessionDataSignatureCheckFailed => "session_data_signature_check_failed",
            SessionFlag::FailedToReadSessionData => "failed_to_read_session_data",
            SessionFlag::BadSessionId => "bad_session_id",
            SessionFlag::BadSliceNumber => "bad_slice_number",
            SessionFlag::ClientPingTimedOut => "client_ping_timed_out",
            SessionFlag::LocationVeto => "location_veto",
            SessionFlag::OptOut => "opt_out",
            SessionFlag::StaleRouteMatrix => "stale_route_matrix",
            SessionFlag::UnknownDatacenter => "unknown_datacenter",
            SessionFlag::DatacenterNotEnabled => "datacenter_not_enabled",
            SessionFlag::NoRelaysInDatacenter => "no_relays_in_datacenter",
            SessionFlag::FallbackToDirect => "fallback_to_direct",
            SessionFlag::HoldingNearRelays => "holding_near_relays",
            SessionFlag::StayDirect => "stay_direct",
            SessionFlag::TakeNetworkNext => "take_network_next",
            SessionFlag::NoRouteRelays => "no_route_relays",
            SessionFlag::Aborted => "aborted",
            SessionFlag::RouteRelayNoLongerExists => "route_relay_no_longer_exists",
            SessionFlag::RouteChanged => "route_changed",
            SessionFlag::RouteContinued => "route_continued",
            SessionFlag::RouteNoLongerExists => "route_no_longer_exists",
            SessionFlag::Mispredict => "mispredict",
            SessionFlag::LatencyWorse => "latency_worse",
            SessionFlag::NextLatencyTooHigh => "next_latency_too_high",
            SessionFlag::NoRoute => "no_route",
            SessionFlag::MultipathOverload => "multipath_overload",
            SessionFlag::EarlyOutDirect => "early_out_direct",
            SessionFlag::NoNearRelays => "no_near_relays",
            SessionFlag::EverOnNext => "ever_on_next",
            SessionFlag::Summary => "summary",
            SessionFlag::Next => "next",
            SessionFlag::FailedToWriteSessionData => "failed_to_write_session_data",
            SessionFlag::LongDuration => "long_duration",
        }
    }
}

/// Flags in the order their branches fired, without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    order: Vec<SessionFlag>,
    bits: u64,
}

impl FlagSet {
    pub fn set(&mut self, flag: SessionFlag) {
        if self.bits & flag.bit() == 0 {
            self.bits |= flag.bit();
            self.order.push(flag);
        }
    }

    pub fn contains(&self, flag: SessionFlag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn as_slice(&self) -> &[SessionFlag] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<SessionFlag> {
        self.order
    }
}

/// What a slice ended up doing with the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    Direct,
    NewRoute,
    ContinueRoute,
    Fallback,
    Vetoed,
    Aborted,
}

impl RouteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteOutcome::Direct => "direct",
            RouteOutcome::NewRoute => "new_route",
            RouteOutcome::ContinueRoute => "continue_route",
            RouteOutcome::Fallback => "fallback",
            RouteOutcome::Vetoed => "vetoed",
            RouteOutcome::Aborted => "aborted",
        }
    }
}
