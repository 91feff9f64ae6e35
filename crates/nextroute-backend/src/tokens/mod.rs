//! Route token builder.
//!
//! Every hop on a route (client, relays, server) receives one token sealed to
//! its x25519 public key. The sealing key is
//! `HKDF-SHA256(x25519(routing secret, hop public))`; each token is
//! `nonce(24) ‖ XChaCha20-Poly1305(plaintext) ‖ tag(16)`.
//!
//! New tokens carry the next hop's address and a fresh per-route key, so they
//! are issued whenever the hop set changes. Continue tokens only extend the
//! expiry of a route the hops already know.

use std::net::SocketAddr;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use nextroute_core::error::{NextRouteError, Result};
use nextroute_core::protocol::address::{read_fixed, write_fixed};
use nextroute_core::protocol::constants::{
    ADDRESS_BYTES, CONTINUE_TOKEN_BYTES, KEY_BYTES, MAX_TOKENS, NONCE_BYTES, ROUTE_TOKEN_BYTES,
};
use nextroute_core::protocol::packets::{RouteTokens, TokenKind};

const TOKEN_KEY_INFO: &[u8] = b"nextroute route token v1";

/// One hop a token is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHop {
    pub address: SocketAddr,
    pub public_key: [u8; KEY_BYTES],
}

/// Fields shared by every token of one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenParams {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub kbps_up: u32,
    pub kbps_down: u32,
}

/// Decrypted new-route token, as a hop sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub kbps_up: u32,
    pub kbps_down: u32,
    /// `None` on the last hop.
    pub next_address: Option<SocketAddr>,
    pub private_key: [u8; KEY_BYTES],
}

/// Decrypted continue token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinueToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

fn sealing_key(secret: &StaticSecret, peer: &PublicKey) -> Result<[u8; KEY_BYTES]> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(NextRouteError::Crypto("hop public key is low order".into()));
    }
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; KEY_BYTES];
    hk.expand(TOKEN_KEY_INFO, &mut key)
        .map_err(|e| NextRouteError::Crypto(format!("token key derivation failed: {e}")))?;
    Ok(key)
}

fn seal(key: &[u8; KEY_BYTES], plaintext: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| NextRouteError::Crypto("bad token key length".into()))?;
    let mut nonce = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| NextRouteError::Crypto("token encryption failed".into()))?;
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(())
}

fn open(key: &[u8; KEY_BYTES], token: &[u8], plain_len: usize) -> Result<Vec<u8>> {
    let expected = NONCE_BYTES + plain_len + 16;
    if token.len() != expected {
        return Err(NextRouteError::Malformed(format!(
            "token is {} bytes, expected {expected}",
            token.len()
        )));
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| NextRouteError::Crypto("bad token key length".into()))?;
    let (nonce, ciphertext) = token.split_at(NONCE_BYTES);
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| NextRouteError::Crypto("token authentication failed".into()))
}

fn write_continue(params: &TokenParams, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&params.expire_timestamp.to_le_bytes());
    buf.extend_from_slice(&params.session_id.to_le_bytes());
    buf.push(params.session_version);
}

fn check_hops(hops: &[RouteHop]) -> Result<()> {
    if hops.len() < 2 || hops.len() > MAX_TOKENS {
        return Err(NextRouteError::OutOfRange(format!(
            "route has {} hops, must be 2..={MAX_TOKENS}",
            hops.len()
        )));
    }
    Ok(())
}

/// Seals route tokens with the backend routing key.
pub struct RouteTokenBuilder<'a> {
    secret: &'a StaticSecret,
}

impl<'a> RouteTokenBuilder<'a> {
    pub fn new(secret: &'a StaticSecret) -> Self {
        Self { secret }
    }

    /// Build one token per hop. `multipath` is left for the caller to set.
    pub fn build(&self, kind: TokenKind, params: &TokenParams, hops: &[RouteHop]) -> Result<RouteTokens> {
        check_hops(hops)?;

        let mut data = Vec::with_capacity(hops.len() * kind.token_bytes());
        let mut route_key = [0u8; KEY_BYTES];
        if kind == TokenKind::New {
            OsRng.fill_bytes(&mut route_key);
        }

        for (i, hop) in hops.iter().enumerate() {
            let mut plain = Vec::with_capacity(ROUTE_TOKEN_BYTES);
            write_continue(params, &mut plain);
            if kind == TokenKind::New {
                plain.extend_from_slice(&params.kbps_up.to_le_bytes());
                plain.extend_from_slice(&params.kbps_down.to_le_bytes());
                let next = hops.get(i + 1).map(|h| &h.address);
                plain.extend_from_slice(&write_fixed(next));
                plain.extend_from_slice(&route_key);
            }

            let key = sealing_key(self.secret, &PublicKey::from(hop.public_key))?;
            seal(&key, &plain, &mut data)?;
        }

        Ok(RouteTokens {
            kind,
            multipath: false,
            num_tokens: hops.len() as u32,
            data,
        })
    }
}

fn le_u64(buf: &[u8], at: usize) -> Result<u64> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| NextRouteError::Malformed("token too short".into()))
}

fn le_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| NextRouteError::Malformed("token too short".into()))
}

/// Decrypt a new-route token as the hop holding `hop_secret`.
pub fn open_route_token(
    hop_secret: &StaticSecret,
    routing_public: &PublicKey,
    token: &[u8],
) -> Result<RouteToken> {
    let key = sealing_key(hop_secret, routing_public)?;
    let plain = open(&key, token, ROUTE_TOKEN_BYTES)?;

    let address_at = 8 + 8 + 1 + 4 + 4;
    let key_at = address_at + ADDRESS_BYTES;
    let private_key: [u8; KEY_BYTES] = plain
        .get(key_at..key_at + KEY_BYTES)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| NextRouteError::Malformed("token too short".into()))?;

    Ok(RouteToken {
        expire_timestamp: le_u64(&plain, 0)?,
        session_id: le_u64(&plain, 8)?,
        session_version: plain[16],
        kbps_up: le_u32(&plain, 17)?,
        kbps_down: le_u32(&plain, 21)?,
        next_address: read_fixed(&plain[address_at..])?,
        private_key,
    })
}

/// Decrypt a continue token as the hop holding `hop_secret`.
pub fn open_continue_token(
    hop_secret: &StaticSecret,
    routing_public: &PublicKey,
    token: &[u8],
) -> Result<ContinueToken> {
    let key = sealing_key(hop_secret, routing_public)?;
    let plain = open(&key, token, CONTINUE_TOKEN_BYTES)?;
    Ok(ContinueToken {
        expire_timestamp: le_u64(&plain, 0)?,
        session_id: le_u64(&plain, 8)?,
        session_version: plain[16],
    })
}
