//! Key material and signature helpers.
//!
//! Packets and `SessionData` are signed with Ed25519. Near relay ping tokens
//! are a SHA-256 keyed digest; route tokens live in [`crate::tokens`].

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use nextroute_core::error::{NextRouteError, Result};
use nextroute_core::protocol::address::address_data;
use nextroute_core::protocol::constants::{KEY_BYTES, PING_TOKEN_BYTES, SIGNATURE_BYTES};

use crate::config::KeysSection;

/// Decode a base64 config value into exactly 32 bytes.
pub fn decode_key(what: &str, value: &str) -> Result<[u8; KEY_BYTES]> {
    let raw = STANDARD
        .decode(value.trim())
        .map_err(|e| NextRouteError::BadRequest(format!("{what} is not valid base64: {e}")))?;
    raw.as_slice().try_into().map_err(|_| {
        NextRouteError::BadRequest(format!("{what} must be {KEY_BYTES} bytes, got {}", raw.len()))
    })
}

pub fn verifying_key(what: &str, value: &str) -> Result<VerifyingKey> {
    let bytes = decode_key(what, value)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| NextRouteError::BadRequest(format!("{what} is not an ed25519 key: {e}")))
}

pub fn sign(key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_BYTES] {
    key.sign(message).to_bytes()
}

pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8; SIGNATURE_BYTES]) -> bool {
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig).is_ok()
}

/// Keys the backend holds for its own traffic.
pub struct BackendKeys {
    signing: SigningKey,
    routing: StaticSecret,
    ping_key: [u8; KEY_BYTES],
}

impl BackendKeys {
    pub fn new(signing: SigningKey, routing: StaticSecret, ping_key: [u8; KEY_BYTES]) -> Self {
        Self {
            signing,
            routing,
            ping_key,
        }
    }

    pub fn from_config(keys: &KeysSection) -> Result<Self> {
        let signing = decode_key("keys.backend_private_key", &keys.backend_private_key)?;
        let routing = decode_key("keys.routing_private_key", &keys.routing_private_key)?;
        let ping_key = decode_key("keys.ping_key", &keys.ping_key)?;
        Ok(Self::new(
            SigningKey::from_bytes(&signing),
            StaticSecret::from(routing),
            ping_key,
        ))
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Public half of the response signing key, as distributed to SDKs.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn routing_secret(&self) -> &StaticSecret {
        &self.routing
    }

    /// Public half of the routing key, as distributed to relays.
    pub fn routing_public_key(&self) -> PublicKey {
        PublicKey::from(&self.routing)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_BYTES] {
        sign(&self.signing, message)
    }

    pub fn verify_own(&self, message: &[u8], signature: &[u8; SIGNATURE_BYTES]) -> bool {
        verify(&self.signing.verifying_key(), message, signature)
    }

    pub fn ping_token(
        &self,
        expire_timestamp: u64,
        client: &SocketAddr,
        relay: &SocketAddr,
    ) -> [u8; PING_TOKEN_BYTES] {
        ping_token(&self.ping_key, expire_timestamp, client, relay)
    }
}

/// `SHA-256(key ‖ expire LE ‖ client ip ‖ client port LE ‖ relay ip ‖ relay port LE)`.
pub fn ping_token(
    key: &[u8; KEY_BYTES],
    expire_timestamp: u64,
    client: &SocketAddr,
    relay: &SocketAddr,
) -> [u8; PING_TOKEN_BYTES] {
    let (client_ip, client_port) = address_data(client);
    let (relay_ip, relay_port) = address_data(relay);

    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(expire_timestamp.to_le_bytes());
    hasher.update(&client_ip);
    hasher.update(client_port.to_le_bytes());
    hasher.update(&relay_ip);
    hasher.update(relay_port.to_le_bytes());
    hasher.finalize().into()
}
