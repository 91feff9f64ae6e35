use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use nextroute_core::protocol::PacketType;

use crate::gate::{Admitted, Gate, Rejected};
use crate::session::SessionOutcome;

/// Per-datagram inputs that do not come from the packet itself.
#[derive(Debug, Clone, Copy)]
pub struct PacketContext {
    /// Sender of the datagram; responses go back here.
    pub from: SocketAddr,
    /// Backend address the sender addressed the datagram to.
    pub to: SocketAddr,
    /// Unix seconds.
    pub now: u64,
}

/// Notable things a handler did, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerEvent {
    UnknownDatacenter,
    BuyerNotLive,
    SdkTooOld,
    SentServerInitResponse,
    SentServerUpdateResponse,
    SentSessionUpdateResponse,
    SentMatchDataResponse,
    SentServerInitMessage,
    SentServerUpdateMessage,
    SentSessionUpdateMessage,
    SentMatchDataMessage,
    LongSessionUpdate,
}

impl HandlerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerEvent::UnknownDatacenter => "unknown_datacenter",
            HandlerEvent::BuyerNotLive => "buyer_not_live",
            HandlerEvent::SdkTooOld => "sdk_too_old",
            HandlerEvent::SentServerInitResponse => "sent_server_init_response",
            HandlerEvent::SentServerUpdateResponse => "sent_server_update_response",
            HandlerEvent::SentSessionUpdateResponse => "sent_session_update_response",
            HandlerEvent::SentMatchDataResponse => "sent_match_data_response",
            HandlerEvent::SentServerInitMessage => "sent_server_init_message",
            HandlerEvent::SentServerUpdateMessage => "sent_server_update_message",
            HandlerEvent::SentSessionUpdateMessage => "sent_session_update_message",
            HandlerEvent::SentMatchDataMessage => "sent_match_data_message",
            HandlerEvent::LongSessionUpdate => "long_session_update",
        }
    }
}

/// Result of handling one admitted packet.
#[derive(Debug, Clone)]
pub struct Handled {
    pub packet_type: PacketType,
    pub events: Vec<HandlerEvent>,
    /// Framed, signed and filter-stamped datagram for the sender.
    pub response: Option<Bytes>,
    /// Present for session updates.
    pub session: Option<SessionOutcome>,
}

impl Handled {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            events: Vec::new(),
            response: None,
            session: None,
        }
    }

    pub fn has(&self, event: HandlerEvent) -> bool {
        self.events.contains(&event)
    }
}

/// One handler per request type.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    fn packet_type(&self) -> PacketType;
    async fn handle(&self, ctx: PacketContext, admitted: Admitted) -> Result<Handled, Rejected>;
}

/// Gate plus handler registry.
pub struct Dispatcher {
    gate: Gate,
    handlers: DashMap<PacketType, Arc<dyn PacketHandler>>,
}

impl Dispatcher {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers.insert(handler.packet_type(), handler);
    }

    pub fn registered_types(&self) -> Vec<PacketType> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    pub async fn dispatch(&self, packet: Bytes, ctx: PacketContext) -> Result<Handled, Rejected> {
        let admitted = self.gate.admit(packet, &ctx.from, &ctx.to)?;
        let packet_type = admitted.packet_type;

        let handler = match self.handlers.get(&packet_type) {
            Some(h) => h.value().clone(),
            None => {
                tracing::error!(%packet_type, "admitted packet type has no handler");
                return Err(Rejected::UnknownType(packet_type));
            }
        };
        handler.handle(ctx, admitted).await
    }
}
