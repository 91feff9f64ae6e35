#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use nextroute_backend::tokens::{open_continue_token, open_route_token, RouteHop, RouteTokenBuilder, TokenParams};
use nextroute_core::protocol::constants::{ENCRYPTED_CONTINUE_TOKEN_BYTES, ENCRYPTED_ROUTE_TOKEN_BYTES};
use nextroute_core::protocol::packets::TokenKind;
use nextroute_core::ErrorCode;

use harness::*;

fn hops(n: u8) -> Vec<RouteHop> {
    (0..n)
        .map(|i| RouteHop {
            address: format!("10.9.0.{}:4000{}", i + 1, i).parse().unwrap(),
            public_key: hop_public(50 + i),
        })
        .collect()
}

fn params() -> TokenParams {
    TokenParams {
        expire_timestamp: NOW + 20,
        session_id: SESSION_ID,
        session_version: 3,
        kbps_up: 256,
        kbps_down: 512,
    }
}

#[test]
fn hop_count_must_be_two_to_seven() {
    let keys = backend_keys();
    let builder = RouteTokenBuilder::new(keys.routing_secret());

    for n in [0u8, 1, 8] {
        let err = builder.build(TokenKind::New, &params(), &hops(n)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfRange, "{n} hops");
    }
    for n in [2u8, 7] {
        let tokens = builder.build(TokenKind::Continue, &params(), &hops(n)).unwrap();
        assert_eq!(tokens.num_tokens, u32::from(n));
    }
}

#[test]
fn new_tokens_chain_hops_together() {
    let keys = backend_keys();
    let route = hops(4);
    let tokens = RouteTokenBuilder::new(keys.routing_secret())
        .build(TokenKind::New, &params(), &route)
        .unwrap();

    assert_eq!(tokens.kind, TokenKind::New);
    assert!(!tokens.multipath);
    assert_eq!(tokens.data.len(), 4 * ENCRYPTED_ROUTE_TOKEN_BYTES);
    assert_eq!(ENCRYPTED_ROUTE_TOKEN_BYTES, 116);

    let routing_public = keys.routing_public_key();
    let opened: Vec<_> = tokens
        .data
        .chunks(ENCRYPTED_ROUTE_TOKEN_BYTES)
        .enumerate()
        .map(|(i, token)| open_route_token(&hop_secret(50 + i as u8), &routing_public, token).unwrap())
        .collect();

    for (i, token) in opened.iter().enumerate() {
        assert_eq!(token.expire_timestamp, NOW + 20);
        assert_eq!(token.session_id, SESSION_ID);
        assert_eq!(token.session_version, 3);
        assert_eq!((token.kbps_up, token.kbps_down), (256, 512));
        assert_eq!(token.next_address, route.get(i + 1).map(|h| h.address));
        assert_eq!(token.private_key, opened[0].private_key);
    }
}

#[test]
fn continue_tokens_only_extend_expiry() {
    let keys = backend_keys();
    let tokens = RouteTokenBuilder::new(keys.routing_secret())
        .build(TokenKind::Continue, &params(), &hops(3))
        .unwrap();

    assert_eq!(tokens.data.len(), 3 * ENCRYPTED_CONTINUE_TOKEN_BYTES);
    assert_eq!(ENCRYPTED_CONTINUE_TOKEN_BYTES, 57);

    let token = open_continue_token(
        &hop_secret(52),
        &keys.routing_public_key(),
        &tokens.data[2 * ENCRYPTED_CONTINUE_TOKEN_BYTES..],
    )
    .unwrap();
    assert_eq!(token.expire_timestamp, NOW + 20);
    assert_eq!(token.session_id, SESSION_ID);
    assert_eq!(token.session_version, 3);
}

#[test]
fn tokens_only_open_for_their_hop() {
    let keys = backend_keys();
    let tokens = RouteTokenBuilder::new(keys.routing_secret())
        .build(TokenKind::New, &params(), &hops(2))
        .unwrap();
    let first = &tokens.data[..ENCRYPTED_ROUTE_TOKEN_BYTES];

    let err = open_route_token(&hop_secret(51), &keys.routing_public_key(), first).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Crypto);

    let err = open_route_token(&hop_secret(50), &keys.routing_public_key(), &first[1..]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Malformed);
}

#[test]
fn low_order_hop_keys_are_refused() {
    let keys = backend_keys();
    let mut route = hops(2);
    route[1].public_key = [0u8; 32];
    let err = RouteTokenBuilder::new(keys.routing_secret())
        .build(TokenKind::New, &params(), &route)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Crypto);
}
