#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use std::sync::Arc;

use nextroute_backend::context::{Buyer, StaticLocator};
use nextroute_backend::session::{RouteOutcome, SessionFlag};
use nextroute_backend::tokens::{open_continue_token, open_route_token};
use nextroute_backend::topology::{Route, RouteMatrix};
use nextroute_core::protocol::constants::{ENCRYPTED_CONTINUE_TOKEN_BYTES, ENCRYPTED_ROUTE_TOKEN_BYTES};
use nextroute_core::protocol::constants::MAX_SESSION_DEBUG;
use nextroute_core::protocol::packets::{
    encode_payload, NearRelaySample, RouteType, SessionDataBlob, SessionUpdateRequest, TokenKind,
};
use nextroute_core::protocol::SdkVersion;

use harness::*;

fn with_near_relays(samples: Vec<NearRelaySample>) -> SessionUpdateRequest {
    SessionUpdateRequest {
        near_relays: samples,
        ..first_request()
    }
}

#[test]
fn first_slice_creates_session_and_hands_out_near_relays() {
    let h = Harness::new();
    let out = h.process(&first_request());

    assert_eq!(out.kind, RouteOutcome::Direct);
    assert!(out.has(SessionFlag::StayDirect));
    assert!(out.response.route.is_none());
    assert_eq!(out.response.session_id, SESSION_ID);
    assert_eq!(out.response.slice_number, 0);

    assert_eq!(out.output.slice_number, 1);
    assert_eq!(out.output.session_version, 0);
    assert_eq!(out.output.start_timestamp, NOW);
    assert_eq!(out.output.expire_timestamp, NOW + 20);
    assert_eq!(out.output.session_duration, 10);

    let near = out.response.near_relays.as_ref().expect("near relays on slice 0");
    assert_eq!(near.expire_timestamp, NOW + 20);
    let ids: Vec<u64> = near.relays.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    for relay in &near.relays {
        let expected = h.keys.ping_token(NOW + 20, &client_address(), &relay.address);
        assert_eq!(relay.ping_token, expected);
    }

    let blob = out.response.session_data.as_ref().expect("session data");
    assert!(h.keys.verify_own(&blob.data, &blob.signature));
}

#[test]
fn zero_session_id_gets_a_fresh_one() {
    let h = Harness::new();
    let out = h.process(&SessionUpdateRequest {
        session_id: 0,
        ..first_request()
    });
    assert_ne!(out.response.session_id, 0);
    assert_eq!(out.output.session_id, out.response.session_id);
}

#[test]
fn stale_topology_goes_direct() {
    let h = Harness::build(buyer(), matrix(NOW - 31), None);
    let out = h.process(&first_request());

    assert!(out.has(SessionFlag::StaleRouteMatrix));
    assert_eq!(out.kind, RouteOutcome::Direct);
    assert!(out.response.route.is_none());
    assert!(out.response.near_relays.is_none());
    assert!(out.response.session_data.is_some());
}

#[test]
fn empty_topology_goes_direct_with_no_tokens() {
    let h = Harness::build(buyer(), RouteMatrix::empty(), None);
    let out = h.process(&first_request());

    assert!(out.has(SessionFlag::StaleRouteMatrix));
    assert_eq!(out.response.route_type(), RouteType::Direct);
    assert!(out.response.route.is_none());
}

#[test]
fn takes_a_route_then_continues_it() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);

    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &template));

    assert_eq!(s1.kind, RouteOutcome::NewRoute);
    assert!(s1.has(SessionFlag::TakeNetworkNext));
    assert!(s1.has(SessionFlag::Next));
    assert_eq!(s1.output.session_version, 1);
    assert_eq!(s1.output.route_relay_ids, vec![1, 2]);
    assert_eq!(s1.output.route_cost, 10 + 20 + 3);
    assert!(s1.output.route_state.next);
    assert!(s1.output.route_state.committed);
    assert!(s1.response.near_relays.is_none());

    let route = s1.response.route.as_ref().expect("route");
    assert_eq!(route.kind, TokenKind::New);
    assert_eq!(route.num_tokens, 4);
    assert_eq!(route.data.len(), 4 * ENCRYPTED_ROUTE_TOKEN_BYTES);

    // Every hop can open its own token and learns the next hop.
    let routing_public = h.keys.routing_public_key();
    let tokens: Vec<&[u8]> = route.data.chunks(ENCRYPTED_ROUTE_TOKEN_BYTES).collect();
    let client = open_route_token(&hop_secret(1), &routing_public, tokens[0]).unwrap();
    let first_relay = open_route_token(&hop_secret(101), &routing_public, tokens[1]).unwrap();
    let last_relay = open_route_token(&hop_secret(102), &routing_public, tokens[2]).unwrap();
    let server = open_route_token(&hop_secret(2), &routing_public, tokens[3]).unwrap();

    assert_eq!(client.next_address, Some(relay(1, 5).address));
    assert_eq!(first_relay.next_address, Some(relay(2, DATACENTER_ID).address));
    assert_eq!(last_relay.next_address, Some(server_address()));
    assert_eq!(server.next_address, None);
    assert_eq!(client.session_id, SESSION_ID);
    assert_eq!(client.session_version, 1);
    assert_eq!(client.expire_timestamp, NOW + 40);
    assert_eq!(client.private_key, server.private_key);
    assert!(open_route_token(&hop_secret(2), &routing_public, tokens[0]).is_err());

    let s2 = h.process(&next_request(&s1, &template));
    assert_eq!(s2.kind, RouteOutcome::ContinueRoute);
    assert!(s2.has(SessionFlag::RouteContinued));
    assert!(s2.has(SessionFlag::EverOnNext));
    assert_eq!(s2.output.session_version, 1);
    assert_eq!(s2.output.duration_on_next, 10);
    assert_eq!(s2.output.route_relay_ids, vec![1, 2]);

    let route = s2.response.route.as_ref().expect("route");
    assert_eq!(route.kind, TokenKind::Continue);
    assert_eq!(route.data.len(), 4 * ENCRYPTED_CONTINUE_TOKEN_BYTES);
    let token = open_continue_token(
        &hop_secret(101),
        &routing_public,
        &route.data[ENCRYPTED_CONTINUE_TOKEN_BYTES..2 * ENCRYPTED_CONTINUE_TOKEN_BYTES],
    )
    .unwrap();
    assert_eq!(token.session_version, 1);
    assert_eq!(token.expire_timestamp, NOW + 40);
}

#[test]
fn switches_to_a_cheaper_route() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &template));

    let cheaper = with_near_relays(vec![sample(1, 10), sample(4, 5)]);
    let s2 = h.process(&next_request(&s1, &cheaper));

    assert_eq!(s2.kind, RouteOutcome::NewRoute);
    assert!(s2.has(SessionFlag::RouteChanged));
    assert_eq!(s2.output.session_version, 2);
    assert_eq!(s2.output.route_relay_ids, vec![4, 3]);
    assert_eq!(s2.output.route_cost, 5 + 10 + 3);
    assert_eq!(s2.response.route.as_ref().unwrap().kind, TokenKind::New);
}

#[test]
fn replaces_a_route_whose_relay_left_the_topology() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &template));
    assert_eq!(s1.output.route_relay_ids, vec![1, 2]);

    let without_relay_2 = RouteMatrix::new(
        NOW,
        vec![relay(1, 5), relay(3, DATACENTER_ID), relay(4, 5)],
        vec![Route {
            cost: 30,
            relays: vec![0, 1],
        }],
    )
    .unwrap();
    h.topology.store(without_relay_2);

    let s2 = h.process(&next_request(&s1, &template));
    assert!(s2.has(SessionFlag::RouteRelayNoLongerExists));
    assert!(s2.has(SessionFlag::RouteChanged));
    assert_eq!(s2.output.route_relay_ids, vec![1, 3]);
    assert_eq!(s2.kind, RouteOutcome::NewRoute);
}

#[test]
fn real_packet_loss_comes_from_counter_deltas() {
    let h = Harness::new();
    let s0 = h.process(&first_request());

    let request = SessionUpdateRequest {
        packets_sent_client_to_server: 2000,
        packets_lost_client_to_server: 50,
        packets_out_of_order_client_to_server: 10,
        jitter_client_to_server: 2500.0,
        jitter_server_to_client: 3.0,
        ..next_request(&s0, &first_request())
    };
    let s1 = h.process(&request);

    assert!((s1.real_packet_loss - 5.0).abs() < 1e-4);
    assert!((s1.real_out_of_order - 1.0).abs() < 1e-4);
    assert!((s1.real_jitter - 1000.0).abs() < 1e-4);
    assert_eq!(s1.output.prev_packets_sent_client_to_server, 2000);
    assert_eq!(s1.output.prev_packets_lost_client_to_server, 50);
}

#[test]
fn fallback_to_direct_is_sticky() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());

    let s1 = h.process(&SessionUpdateRequest {
        fallback_to_direct: true,
        ..next_request(&s0, &template)
    });
    assert!(s1.has(SessionFlag::FallbackToDirect));
    assert_eq!(s1.kind, RouteOutcome::Fallback);
    assert!(s1.response.route.is_none());

    let s2 = h.process(&next_request(&s1, &template));
    assert_eq!(s2.kind, RouteOutcome::Fallback);
    assert!(!s2.has(SessionFlag::FallbackToDirect));
    assert!(s2.output.fallback_to_direct);
    assert!(s2.response.route.is_none());
}

#[test]
fn unknown_location_vetoes_the_whole_session() {
    let h = Harness::build(buyer(), matrix(NOW), Some(Arc::new(StaticLocator::new(0.0, 0.0))));
    let template = with_near_relays(vec![sample(1, 10)]);

    let s0 = h.process(&first_request());
    assert!(s0.has(SessionFlag::LocationVeto));
    assert!(s0.output.route_state.location_veto);
    assert!(s0.response.near_relays.is_none());

    let s1 = h.process(&next_request(&s0, &template));
    assert!(s1.has(SessionFlag::LocationVeto));
    assert!(s1.response.route.is_none());
}

#[test]
fn located_client_keeps_its_coordinates() {
    let h = Harness::build(buyer(), matrix(NOW), Some(Arc::new(StaticLocator::new(10.0, 20.0))));
    let s0 = h.process(&first_request());

    assert!(!s0.has(SessionFlag::LocationVeto));
    assert_eq!(s0.output.latitude, 10.0);
    assert_eq!(s0.output.longitude, 20.0);
    assert!(s0.response.near_relays.is_some());
}

#[test]
fn opt_out_tag_is_sticky() {
    let mut b = buyer();
    b.opt_out_tag = Some(777);
    let h = Harness::build(b, matrix(NOW), None);

    let s0 = h.process(&SessionUpdateRequest {
        tags: vec![1, 777],
        ..first_request()
    });
    assert!(s0.has(SessionFlag::OptOut));
    assert!(s0.output.route_state.opt_out);

    let s1 = h.process(&next_request(&s0, &with_near_relays(vec![sample(1, 10)])));
    assert!(s1.has(SessionFlag::OptOut));
    assert!(s1.response.route.is_none());
}

#[test]
fn tampered_session_data_is_not_echoed_back() {
    let h = Harness::new();
    let s0 = h.process(&first_request());

    let mut request = next_request(&s0, &first_request());
    if let Some(blob) = request.session_data.as_mut() {
        blob.signature[0] ^= 0x01;
    }
    let s1 = h.process(&request);

    assert!(s1.has(SessionFlag::SessionDataSignatureCheckFailed));
    assert_eq!(s1.kind, RouteOutcome::Direct);
    assert!(s1.response.session_data.is_none());
    assert!(s1.response.route.is_none());
}

#[test]
fn missing_session_data_after_first_slice_fails_the_signature_check() {
    let h = Harness::new();
    let s1 = h.process(&SessionUpdateRequest {
        slice_number: 1,
        ..first_request()
    });
    assert!(s1.has(SessionFlag::SessionDataSignatureCheckFailed));
    assert!(s1.response.session_data.is_none());
}

#[test]
fn session_data_must_match_session_and_slice() {
    let h = Harness::new();
    let s0 = h.process(&first_request());

    let wrong_session = h.process(&SessionUpdateRequest {
        session_id: SESSION_ID + 1,
        ..next_request(&s0, &first_request())
    });
    assert!(wrong_session.has(SessionFlag::BadSessionId));
    assert!(wrong_session.response.session_data.is_none());

    let wrong_slice = h.process(&SessionUpdateRequest {
        slice_number: 5,
        ..next_request(&s0, &first_request())
    });
    assert!(wrong_slice.has(SessionFlag::BadSliceNumber));
    assert!(wrong_slice.response.session_data.is_none());
}

#[test]
fn signed_garbage_fails_to_read() {
    let h = Harness::new();
    let data = vec![0xff, 0xff, 0xff];
    let signature = nextroute_backend::crypto::sign(h.keys.signing_key(), &data);
    let s1 = h.process(&SessionUpdateRequest {
        slice_number: 1,
        session_data: Some(SessionDataBlob { data, signature }),
        ..first_request()
    });
    assert!(s1.has(SessionFlag::FailedToReadSessionData));
    assert!(s1.response.session_data.is_none());
}

#[test]
fn on_route_without_relays_is_vetoed() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &template));

    let mut broken = s1.output.clone();
    broken.route_relay_ids.clear();
    let request = SessionUpdateRequest {
        session_data: Some(h.resign(&broken)),
        ..next_request(&s1, &template)
    };
    let s2 = h.process(&request);

    assert!(s2.has(SessionFlag::NoRouteRelays));
    assert_eq!(s2.kind, RouteOutcome::Vetoed);
    assert!(s2.output.route_state.veto);
    assert!(s2.response.route.is_none());
}

#[test]
fn missing_next_stats_abort_and_the_session_stays_direct() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &template));
    assert!(s1.response.route.is_some());

    let s2 = h.process(&SessionUpdateRequest {
        next: None,
        ..next_request(&s1, &template)
    });
    assert!(s2.has(SessionFlag::Aborted));
    assert_eq!(s2.kind, RouteOutcome::Aborted);
    assert!(s2.output.route_state.veto);
    assert!(!s2.output.route_state.next);
    assert!(s2.output.route_relay_ids.is_empty());

    let s3 = h.process(&next_request(&s2, &template));
    assert!(s3.has(SessionFlag::EarlyOutDirect));
    assert!(s3.has(SessionFlag::StayDirect));
    assert!(s3.response.route.is_none());
}

#[test]
fn large_customer_holds_near_relays_from_slice_four() {
    let mut b = buyer();
    b.internal.large_customer = true;
    let h = Harness::build(b, matrix(NOW), None);
    let template = with_near_relays(vec![sample(1, 10)]);

    let mut out = h.process(&first_request());
    for _ in 1..4 {
        out = h.process(&next_request(&out, &template));
        assert!(!out.response.exclude_near_relays);
    }

    out = h.process(&next_request(&out, &template));
    assert_eq!(out.response.slice_number, 4);
    assert!(out.has(SessionFlag::HoldingNearRelays));
    assert!(out.response.exclude_near_relays);
    let held = out.output.held_near_relays.clone().expect("held");
    assert_eq!(held.len(), 1);
    assert_eq!((held[0].id, held[0].rtt), (1, 10));

    // Held costs stand in for pings the SDK no longer sends.
    let no_pings = SessionUpdateRequest {
        near_relays: Vec::new(),
        ..first_request()
    };
    out = h.process(&next_request(&out, &no_pings));
    assert!(!out.has(SessionFlag::HoldingNearRelays));
    assert!(out.response.exclude_near_relays);
    assert_eq!(out.kind, RouteOutcome::ContinueRoute);
}

#[test]
fn summary_is_written_once() {
    let h = Harness::new();
    let s0 = h.process(&first_request());

    let timed_out = SessionUpdateRequest {
        client_ping_timed_out: true,
        ..first_request()
    };
    let s1 = h.process(&next_request(&s0, &timed_out));
    assert!(s1.has(SessionFlag::ClientPingTimedOut));
    assert!(s1.has(SessionFlag::Summary));
    assert!(s1.output.write_summary);

    let s2 = h.process(&next_request(&s1, &timed_out));
    assert!(!s2.has(SessionFlag::Summary));
    assert!(s2.output.wrote_summary);
    assert!(!s2.output.write_summary);

    let summaries = h.sinks.session_summary.take();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].session_id, SESSION_ID);
    assert_eq!(summaries[0].session_duration, 20);

    // Timed out slices are not reported to the portal.
    assert_eq!(h.sinks.portal_session_update.len(), 1);
    assert_eq!(h.sinks.session_update.len(), 3);
}

#[test]
fn tenant_checks_end_the_slice_without_session_data() {
    let mut not_live = buyer();
    not_live.live = false;
    let h = Harness::build(not_live, matrix(NOW), None);
    let out = h.process(&first_request());
    assert!(out.has(SessionFlag::BuyerNotLive));
    assert!(out.response.session_data.is_none());

    let h = Harness::new();
    let out = h.process(&SessionUpdateRequest {
        version: SdkVersion::new(4, 9, 9),
        ..first_request()
    });
    assert!(out.has(SessionFlag::SdkTooOld));
    assert!(out.response.session_data.is_none());
    assert!(out.response.near_relays.is_none());
}

#[test]
fn datacenter_must_be_known_and_enabled() {
    let h = Harness::new();
    let out = h.process(&SessionUpdateRequest {
        datacenter_id: 77,
        ..first_request()
    });
    assert!(out.has(SessionFlag::UnknownDatacenter));
    assert!(out.response.near_relays.is_none());

    let not_enabled = Buyer::new(BUYER_ID, buyer_signing_key().verifying_key());
    let h = Harness::build(not_enabled, matrix(NOW), None);
    let out = h.process(&first_request());
    assert!(out.has(SessionFlag::DatacenterNotEnabled));
    assert!(!out.has(SessionFlag::UnknownDatacenter));
    assert!(out.response.route.is_none());
}

#[test]
fn analysis_only_never_routes() {
    let mut b = buyer();
    b.route_shader.analysis_only = true;
    let h = Harness::build(b, matrix(NOW), None);
    let template = with_near_relays(vec![sample(1, 10)]);

    let s0 = h.process(&first_request());
    assert!(s0.has(SessionFlag::AnalysisOnly));
    assert!(s0.response.near_relays.is_none());

    let s1 = h.process(&next_request(&s0, &template));
    assert!(s1.has(SessionFlag::StayDirect));
    assert!(s1.response.route.is_none());
}

#[test]
fn debug_buyers_get_a_decision_trace() {
    let mut b = buyer();
    b.debug = true;
    let h = Harness::build(b, matrix(NOW), None);
    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &with_near_relays(vec![sample(1, 10)])));

    let debug = s1.response.debug.expect("debug text");
    assert!(debug.contains("take network next"));
    assert!(debug.contains("relay.1 - relay.2"));
}

#[test]
fn long_debug_traces_are_cut_to_fit_the_response() {
    let mut b = buyer();
    b.debug = true;
    let mut near = relay(1, 5);
    near.name = "é".repeat(300);
    let mut dest = relay(2, DATACENTER_ID);
    dest.name = "ü".repeat(300);
    let m = RouteMatrix::new(NOW, vec![near, dest], vec![Route { cost: 20, relays: vec![0, 1] }]).unwrap();
    let h = Harness::build(b, m, None);

    let s0 = h.process(&first_request());
    let s1 = h.process(&next_request(&s0, &with_near_relays(vec![sample(1, 10)])));

    assert_eq!(s1.kind, RouteOutcome::NewRoute);
    let debug = s1.response.debug.as_ref().expect("debug text");
    assert!(debug.len() < MAX_SESSION_DEBUG);
    assert!(debug.contains("take network next"));
    assert!(encode_payload(&s1.response).is_ok());
}

#[test]
fn session_update_messages_describe_each_slice() {
    let h = Harness::new();
    let template = with_near_relays(vec![sample(1, 10)]);
    let s0 = h.process(&first_request());
    let _s1 = h.process(&next_request(&s0, &template));

    let messages = h.sinks.session_update.take();
    assert_eq!(messages.len(), 2);

    assert!(messages[0].first_slice.is_some());
    assert!(messages[0].next.is_none());
    assert_eq!(messages[0].route_type, RouteType::Direct);

    let next = messages[1].next.as_ref().expect("next fields");
    assert_eq!(next.route_relay_ids, vec![1, 2]);
    assert_eq!(messages[1].route_type, RouteType::New);
    assert_ne!(messages[1].flags & SessionFlag::TakeNetworkNext.bit(), 0);

    assert_eq!(h.sinks.portal_near_relay_update.len(), 1);
}
