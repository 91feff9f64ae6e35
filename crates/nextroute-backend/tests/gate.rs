#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use std::net::SocketAddr;

use bytes::Bytes;
use ed25519_dalek::SigningKey;

use nextroute_backend::gate::{self, Gate, Rejected};
use nextroute_core::protocol::packets::{
    decode_payload, encode_payload, MatchDataRequest, Packet, ServerInitRequest,
    ServerUpdateRequest, SessionUpdateRequest,
};
use nextroute_core::protocol::{PacketType, SdkVersion};

use harness::*;

fn backend_address() -> SocketAddr {
    "192.0.2.1:40000".parse().unwrap()
}

fn gate() -> Gate {
    Gate::new(directory(buyer()))
}

fn server_init(buyer_id: u64) -> ServerInitRequest {
    ServerInitRequest {
        version: SdkVersion::new(5, 1, 0),
        buyer_id,
        request_id: 77,
        datacenter_id: DATACENTER_ID,
        datacenter_name: "test.dc".into(),
    }
}

fn sealed<P: Packet>(request: &P, key: &SigningKey) -> Vec<u8> {
    let payload = encode_payload(request).unwrap();
    gate::seal(P::TYPE, &payload, key, &server_address(), &backend_address()).unwrap()
}

fn admit(packet: Vec<u8>) -> Result<gate::Admitted, Rejected> {
    gate().admit(Bytes::from(packet), &server_address(), &backend_address())
}

#[test]
fn admits_every_request_type() {
    let key = buyer_signing_key();

    let init = server_init(BUYER_ID);
    let admitted = admit(sealed(&init, &key)).unwrap();
    assert_eq!(admitted.packet_type, PacketType::ServerInitRequest);
    assert_eq!(admitted.buyer.id, BUYER_ID);
    assert_eq!(decode_payload::<ServerInitRequest>(&admitted.payload()).unwrap(), init);

    let update = ServerUpdateRequest {
        version: SdkVersion::new(5, 1, 0),
        buyer_id: BUYER_ID,
        request_id: 78,
        datacenter_id: DATACENTER_ID,
        match_id: 5,
        num_sessions: 12,
        server_address: server_address(),
    };
    let admitted = admit(sealed(&update, &key)).unwrap();
    assert_eq!(admitted.packet_type, PacketType::ServerUpdateRequest);
    assert_eq!(decode_payload::<ServerUpdateRequest>(&admitted.payload()).unwrap(), update);

    let session = first_request();
    let admitted = admit(sealed(&session, &key)).unwrap();
    assert_eq!(admitted.packet_type, PacketType::SessionUpdateRequest);
    assert_eq!(decode_payload::<SessionUpdateRequest>(&admitted.payload()).unwrap(), session);

    let match_data = MatchDataRequest {
        version: SdkVersion::new(5, 1, 0),
        buyer_id: BUYER_ID,
        server_address: server_address(),
        datacenter_id: DATACENTER_ID,
        user_hash: 42,
        session_id: SESSION_ID,
        retry_number: 0,
        match_id: 5,
        match_values: vec![1.5, -2.0],
    };
    let admitted = admit(sealed(&match_data, &key)).unwrap();
    assert_eq!(admitted.packet_type, PacketType::MatchDataRequest);
}

#[test]
fn short_packets_are_too_small() {
    assert_eq!(admit(Vec::new()).unwrap_err(), Rejected::TooSmall);
    assert_eq!(admit(vec![PacketType::ServerInitRequest.as_u8(); 20]).unwrap_err(), Rejected::TooSmall);

    let mut truncated = sealed(&server_init(BUYER_ID), &buyer_signing_key());
    truncated.truncate(PacketType::ServerInitRequest.min_packet_bytes() - 1);
    assert_eq!(admit(truncated).unwrap_err(), Rejected::TooSmall);
}

#[test]
fn only_request_types_are_supported() {
    let mut response = vec![0u8; 200];
    response[0] = PacketType::ServerInitResponse.as_u8();
    assert_eq!(admit(response).unwrap_err(), Rejected::UnsupportedType(2));

    let mut unknown = vec![0u8; 200];
    unknown[0] = 99;
    assert_eq!(admit(unknown).unwrap_err(), Rejected::UnsupportedType(99));
}

#[test]
fn size_is_checked_before_type() {
    let mut tiny = vec![0u8; 10];
    tiny[0] = 99;
    assert_eq!(admit(tiny).unwrap_err(), Rejected::TooSmall);
}

#[test]
fn filters_reject_unstamped_and_misaddressed_packets() {
    let mut unstamped = sealed(&server_init(BUYER_ID), &buyer_signing_key());
    for b in unstamped.iter_mut().skip(1).take(15) {
        *b = 0;
    }
    assert_eq!(admit(unstamped).unwrap_err(), Rejected::BasicFilterFailed);

    let packet = sealed(&server_init(BUYER_ID), &buyer_signing_key());
    let elsewhere: SocketAddr = "198.51.100.99:30000".parse().unwrap();
    let rejected = gate()
        .admit(Bytes::from(packet), &elsewhere, &backend_address())
        .unwrap_err();
    assert_eq!(rejected, Rejected::AdvancedFilterFailed);
}

#[test]
fn unknown_buyer_is_rejected() {
    let packet = sealed(&server_init(999), &buyer_signing_key());
    assert_eq!(admit(packet).unwrap_err(), Rejected::UnknownBuyer(999));
}

#[test]
fn signature_must_come_from_the_buyer_key() {
    let other = SigningKey::from_bytes(&[8u8; 32]);
    let packet = sealed(&server_init(BUYER_ID), &other);
    assert_eq!(admit(packet).unwrap_err(), Rejected::SignatureCheckFailed);

    // Payload tampering after signing; the filter bytes still match.
    let mut packet = sealed(&server_init(BUYER_ID), &buyer_signing_key());
    let last_payload_byte = packet.len() - 67;
    packet[last_payload_byte] ^= 0x01;
    assert_eq!(admit(packet).unwrap_err(), Rejected::SignatureCheckFailed);
}

#[test]
fn rejection_labels_are_stable() {
    assert_eq!(Rejected::TooSmall.as_str(), "too_small");
    assert_eq!(Rejected::UnknownBuyer(1).as_str(), "unknown_buyer");
    assert_eq!(
        Rejected::CouldNotRead(PacketType::MatchDataRequest).as_str(),
        "could_not_read"
    );
}
