//! UDP receive loop.
//!
//! One task per datagram; nothing is shared between them except `AppState`.
//! Rejected datagrams are dropped silently.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::net::UdpSocket;

use nextroute_core::error::{NextRouteError, Result};

use crate::app_state::AppState;
use crate::dispatch::PacketContext;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub async fn bind(addr: SocketAddr) -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| NextRouteError::Internal(format!("udp bind failed ({addr}): {e}")))?;
    Ok(Arc::new(socket))
}

/// Errors a UDP socket reports for a single peer (ICMP unreachable and the
/// like); the socket itself is still usable.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Receive forever. Returns only on a non-transient socket error.
///
/// Filters are checked and responses stamped against the configured public
/// address, not the bound one, which may be a wildcard.
pub async fn serve(socket: Arc<UdpSocket>, state: AppState) -> Result<()> {
    let public = state.cfg().backend.public_addr()?;
    let max_bytes = state.cfg().backend.max_packet_bytes;
    // one spare byte so oversized datagrams are detectable
    let mut buf = vec![0u8; max_bytes + 1];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "udp recv failed, continuing");
                continue;
            }
            Err(e) => return Err(NextRouteError::Internal(format!("udp recv failed: {e}"))),
        };
        if len > max_bytes {
            tracing::debug!(%from, len, "datagram too large");
            continue;
        }

        let packet = Bytes::copy_from_slice(&buf[..len]);
        let ctx = PacketContext {
            from,
            to: public,
            now: unix_now(),
        };
        let socket = Arc::clone(&socket);
        let state = state.clone();
        tokio::spawn(async move {
            let Ok(handled) = state.handle_datagram(packet, ctx).await else {
                return;
            };
            if let Some(response) = handled.response {
                if let Err(e) = socket.send_to(&response, from).await {
                    tracing::warn!(%from, packet_type = %handled.packet_type, error = %e, "send failed");
                }
            }
        });
    }
}
