#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::net::UdpSocket;

use nextroute_backend::app_state::AppState;
use nextroute_backend::config;
use nextroute_backend::gate;
use nextroute_backend::messages::MessageSinks;
use nextroute_backend::transport::udp;
use nextroute_core::protocol::envelope;
use nextroute_core::protocol::filter::{self, BACKEND_MAGIC};
use nextroute_core::protocol::packets::{
    decode_payload, encode_payload, Packet, ServerInitRequest, ServerInitResponse, ServerResponseCode,
};
use nextroute_core::protocol::SdkVersion;

use harness::*;

fn state(listen: SocketAddr, public: SocketAddr) -> AppState {
    let yaml = format!(
        r#"
version: 1
backend:
  listen: "{listen}"
  public_address: "{public}"
keys:
  backend_private_key: "{k1}"
  routing_private_key: "{k2}"
  ping_key: "{k3}"
datacenters:
  - id: {dc}
    name: "test.dc"
buyers:
  - id: {buyer_id}
    public_key: "{buyer}"
    datacenters: [{dc}]
"#,
        k1 = STANDARD.encode([11u8; 32]),
        k2 = STANDARD.encode([12u8; 32]),
        k3 = STANDARD.encode([13u8; 32]),
        dc = DATACENTER_ID,
        buyer_id = BUYER_ID,
        buyer = STANDARD.encode(buyer_signing_key().verifying_key().to_bytes()),
    );
    let cfg = config::load_from_str(&yaml).unwrap();
    let (sinks, _memory) = MessageSinks::memory();
    AppState::new(cfg, sinks).unwrap()
}

#[tokio::test]
async fn wildcard_listener_filters_against_the_public_address() {
    let socket = udp::bind("0.0.0.0:0".parse().unwrap()).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let public: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let state = state(socket.local_addr().unwrap(), public);
    tokio::spawn(udp::serve(socket, state));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();
    let request = ServerInitRequest {
        version: SdkVersion::new(5, 1, 0),
        buyer_id: BUYER_ID,
        request_id: 4321,
        datacenter_id: DATACENTER_ID,
        datacenter_name: "test.dc".into(),
    };
    let payload = encode_payload(&request).unwrap();
    let packet = gate::seal(ServerInitRequest::TYPE, &payload, &buyer_signing_key(), &client_addr, &public).unwrap();
    client.send_to(&packet, public).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("backend answered")
        .unwrap();
    let response = &buf[..len];

    assert_eq!(from.port(), port);
    assert!(filter::advanced_filter(response, &BACKEND_MAGIC, &public, &client_addr));
    let decoded: ServerInitResponse = decode_payload(envelope::payload(response).unwrap()).unwrap();
    assert_eq!(decoded.request_id, 4321);
    assert_eq!(decoded.response, ServerResponseCode::Ok);
}
