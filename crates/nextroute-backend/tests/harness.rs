//! Fixtures shared by the backend integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use x25519_dalek::{PublicKey, StaticSecret};

use nextroute_backend::context::{Buyer, Datacenter, Directory, DirectoryData, Locator, RotatingMagic, SnapshotCell};
use nextroute_backend::crypto::{self, BackendKeys};
use nextroute_backend::messages::{MemorySinks, MessageSinks};
use nextroute_backend::session::{EngineSettings, SessionContext, SessionOutcome, SessionUpdateEngine};
use nextroute_backend::topology::{Relay, Route, RouteMatrix};
use nextroute_core::protocol::packets::{
    NearRelaySample, NextPathStats, PathStats, SessionDataBlob, SessionUpdateRequest,
};
use nextroute_core::protocol::session_data::SessionData;
use nextroute_core::protocol::SdkVersion;

pub const NOW: u64 = 1_700_000_000;
pub const BUYER_ID: u64 = 0x5eed_0001;
pub const DATACENTER_ID: u64 = 9;
pub const SESSION_ID: u64 = 0xfeed_beef;

pub fn buyer_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn backend_keys() -> BackendKeys {
    BackendKeys::new(
        SigningKey::from_bytes(&[11u8; 32]),
        StaticSecret::from([12u8; 32]),
        [13u8; 32],
    )
}

/// Secret of the hop whose public key is [`hop_public`]`(seed)`.
pub fn hop_secret(seed: u8) -> StaticSecret {
    StaticSecret::from([seed; 32])
}

pub fn hop_public(seed: u8) -> [u8; 32] {
    PublicKey::from(&hop_secret(seed)).to_bytes()
}

pub fn client_address() -> SocketAddr {
    "203.0.113.5:50000".parse().unwrap()
}

pub fn server_address() -> SocketAddr {
    "198.51.100.7:30000".parse().unwrap()
}

pub fn relay(id: u64, datacenter_id: u64) -> Relay {
    Relay {
        id,
        name: format!("relay.{id}"),
        address: format!("10.0.0.{id}:40000").parse().unwrap(),
        public_key: hop_public(100 + id as u8),
        datacenter_id,
        latitude: 0.0,
        longitude: id as f32,
    }
}

/// Relays 1 and 4 sit near the client, 2 and 3 in the server datacenter.
///
/// ```text
/// [1] -> [2]  cost 20
/// [1] -> [3]  cost 40
/// [4] -> [3]  cost 10
/// ```
pub fn matrix(created_at: u64) -> RouteMatrix {
    RouteMatrix::new(
        created_at,
        vec![relay(1, 5), relay(2, DATACENTER_ID), relay(3, DATACENTER_ID), relay(4, 5)],
        vec![
            Route { cost: 20, relays: vec![0, 1] },
            Route { cost: 40, relays: vec![0, 2] },
            Route { cost: 10, relays: vec![3, 2] },
        ],
    )
    .unwrap()
}

pub fn buyer() -> Buyer {
    let mut buyer = Buyer::new(BUYER_ID, buyer_signing_key().verifying_key());
    buyer.enable_datacenter(DATACENTER_ID);
    buyer
}

pub fn datacenter() -> Datacenter {
    Datacenter {
        id: DATACENTER_ID,
        name: "test.dc".into(),
        latitude: 0.0,
        longitude: 0.0,
    }
}

pub fn directory(buyer: Buyer) -> Arc<Directory> {
    Arc::new(Directory::new(DirectoryData::new(vec![buyer], vec![datacenter()])))
}

pub struct Harness {
    pub engine: SessionUpdateEngine,
    pub sinks: MemorySinks,
    pub keys: Arc<BackendKeys>,
    pub topology: Arc<SnapshotCell<RouteMatrix>>,
    pub buyer: Buyer,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(buyer(), matrix(NOW), None)
    }

    pub fn build(buyer: Buyer, matrix: RouteMatrix, locator: Option<Arc<dyn Locator>>) -> Self {
        let keys = Arc::new(backend_keys());
        let topology = Arc::new(SnapshotCell::new(matrix));
        let (message_sinks, sinks) = MessageSinks::memory();
        let mut engine = SessionUpdateEngine::new(
            Arc::clone(&keys),
            topology.clone(),
            directory(buyer.clone()),
            Arc::new(RotatingMagic::new(std::time::Duration::from_secs(60))),
            message_sinks,
            EngineSettings::default(),
        );
        if let Some(locator) = locator {
            engine = engine.with_locator(locator);
        }
        Self {
            engine,
            sinks,
            keys,
            topology,
            buyer,
        }
    }

    pub fn process(&self, request: &SessionUpdateRequest) -> SessionOutcome {
        self.engine.process(&SessionContext::at(NOW), &self.buyer, request)
    }

    /// Re-sign a tampered output as if the backend had written it.
    pub fn resign(&self, data: &SessionData) -> SessionDataBlob {
        let bytes = data.encode().unwrap();
        let signature = crypto::sign(self.keys.signing_key(), &bytes);
        SessionDataBlob { data: bytes, signature }
    }
}

pub fn first_request() -> SessionUpdateRequest {
    SessionUpdateRequest {
        version: SdkVersion::new(5, 1, 0),
        buyer_id: BUYER_ID,
        datacenter_id: DATACENTER_ID,
        session_id: SESSION_ID,
        slice_number: 0,
        client_address: client_address(),
        server_address: server_address(),
        client_route_public_key: hop_public(1),
        server_route_public_key: hop_public(2),
        user_hash: 42,
        direct: PathStats {
            rtt: 100.0,
            jitter: 0.0,
            packet_loss: 0.0,
        },
        packets_sent_client_to_server: 1000,
        packets_sent_server_to_client: 1000,
        ..SessionUpdateRequest::default()
    }
}

/// The request an SDK sends after receiving `prev`: same session, next
/// slice, the returned session data echoed back.
pub fn next_request(prev: &SessionOutcome, template: &SessionUpdateRequest) -> SessionUpdateRequest {
    SessionUpdateRequest {
        session_id: prev.response.session_id,
        slice_number: prev.output.slice_number,
        session_data: prev.response.session_data.clone(),
        next: prev.response.route.as_ref().map(|_| NextPathStats {
            rtt: 35.0,
            jitter: 0.0,
            packet_loss: 0.0,
            kbps_up: 64,
            kbps_down: 64,
        }),
        ..template.clone()
    }
}

pub fn sample(id: u64, rtt: u32) -> NearRelaySample {
    NearRelaySample {
        id,
        rtt,
        jitter: 0,
        packet_loss: 0.0,
    }
}
