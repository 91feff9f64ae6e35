//! Request handlers.
//!
//! Handlers decode the admitted payload, apply tenant checks, emit
//! messages and build the signed response datagram. A payload that fails to
//! decode is rejected without a response.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use nextroute_core::protocol::packets::{
    decode_payload, encode_payload, MatchDataRequest, MatchDataResponse, Packet, ServerInitRequest,
    ServerInitResponse, ServerResponseCode, ServerUpdateRequest, ServerUpdateResponse,
    SessionUpdateRequest,
};
use nextroute_core::protocol::{PacketType, SdkVersion};

use crate::context::{Buyer, DatacenterLookup, MagicSource};
use crate::crypto::BackendKeys;
use crate::gate::{self, Admitted, Rejected};
use crate::messages::{
    MatchDataMessage, MessageSinks, PortalServerUpdateMessage, ServerInitMessage,
    ServerUpdateMessage,
};
use crate::session::{SessionContext, SessionFlag, SessionUpdateEngine};

use super::dispatcher::{Handled, HandlerEvent, PacketContext, PacketHandler};

/// Collaborators shared by every handler.
pub struct HandlerDeps {
    pub keys: Arc<BackendKeys>,
    pub datacenters: Arc<dyn DatacenterLookup>,
    pub magic: Arc<dyn MagicSource>,
    pub sinks: MessageSinks,
    pub minimum_sdk_version: SdkVersion,
}

impl HandlerDeps {
    /// Tenant checks shared by the handshakes: not live wins over old SDK.
    fn check_buyer(&self, buyer: &Buyer, version: SdkVersion, handled: &mut Handled) -> ServerResponseCode {
        if !buyer.live {
            handled.events.push(HandlerEvent::BuyerNotLive);
            return ServerResponseCode::BuyerNotActive;
        }
        if !version.at_least(&self.minimum_sdk_version) {
            handled.events.push(HandlerEvent::SdkTooOld);
            return ServerResponseCode::OldSdkVersion;
        }
        ServerResponseCode::Ok
    }

    fn check_datacenter(&self, datacenter_id: u64, handled: &mut Handled) {
        if self.datacenters.lookup_datacenter(datacenter_id).is_none() {
            handled.events.push(HandlerEvent::UnknownDatacenter);
        }
    }

    /// Frame, sign and stamp a response back to the sender. Encode failures
    /// are logged and leave the packet unanswered.
    fn respond<P: Packet>(&self, ctx: &PacketContext, response: &P) -> Option<Bytes> {
        let sealed = encode_payload(response).and_then(|payload| {
            gate::seal(P::TYPE, &payload, self.keys.signing_key(), &ctx.to, &ctx.from)
        });
        match sealed {
            Ok(packet) => Some(Bytes::from(packet)),
            Err(e) => {
                tracing::error!(packet_type = %P::TYPE, error = %e, "failed to write response");
                None
            }
        }
    }
}

fn decode<P: Packet>(admitted: &Admitted) -> Result<P, Rejected> {
    decode_payload::<P>(&admitted.payload()).map_err(|e| {
        tracing::warn!(
            packet_type = %admitted.packet_type,
            buyer_id = admitted.buyer.id,
            error = %e,
            "could not read packet"
        );
        Rejected::CouldNotRead(admitted.packet_type)
    })
}

pub struct ServerInitHandler {
    deps: Arc<HandlerDeps>,
}

impl ServerInitHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl PacketHandler for ServerInitHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::ServerInitRequest
    }

    async fn handle(&self, ctx: PacketContext, admitted: Admitted) -> Result<Handled, Rejected> {
        let request: ServerInitRequest = decode(&admitted)?;
        let buyer = &admitted.buyer;
        let mut handled = Handled::new(admitted.packet_type);

        let code = self.deps.check_buyer(buyer, request.version, &mut handled);
        self.deps.check_datacenter(request.datacenter_id, &mut handled);

        tracing::debug!(
            buyer_id = buyer.id,
            datacenter_id = request.datacenter_id,
            response = ?code,
            "server init"
        );

        let response = ServerInitResponse {
            request_id: request.request_id,
            response: code,
            magic: self.deps.magic.magic_values(),
        };
        handled.response = self.deps.respond(&ctx, &response);
        if handled.response.is_some() {
            handled.events.push(HandlerEvent::SentServerInitResponse);
        }

        let sent = self.deps.sinks.server_init.offer(ServerInitMessage {
            timestamp: ctx.now,
            buyer_id: buyer.id,
            sdk_version: request.version,
            datacenter_id: request.datacenter_id,
            datacenter_name: request.datacenter_name,
        });
        if sent {
            handled.events.push(HandlerEvent::SentServerInitMessage);
        }
        Ok(handled)
    }
}

pub struct ServerUpdateHandler {
    deps: Arc<HandlerDeps>,
}

impl ServerUpdateHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl PacketHandler for ServerUpdateHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::ServerUpdateRequest
    }

    async fn handle(&self, ctx: PacketContext, admitted: Admitted) -> Result<Handled, Rejected> {
        let request: ServerUpdateRequest = decode(&admitted)?;
        let buyer = &admitted.buyer;
        let mut handled = Handled::new(admitted.packet_type);

        let code = self.deps.check_buyer(buyer, request.version, &mut handled);
        self.deps.check_datacenter(request.datacenter_id, &mut handled);

        let response = ServerUpdateResponse {
            request_id: request.request_id,
            response: code,
            magic: self.deps.magic.magic_values(),
        };
        handled.response = self.deps.respond(&ctx, &response);
        if handled.response.is_some() {
            handled.events.push(HandlerEvent::SentServerUpdateResponse);
        }

        if code != ServerResponseCode::Ok {
            return Ok(handled);
        }

        let message = ServerUpdateMessage {
            timestamp: ctx.now,
            buyer_id: buyer.id,
            sdk_version: request.version,
            datacenter_id: request.datacenter_id,
            match_id: request.match_id,
            num_sessions: request.num_sessions,
            server_address: request.server_address,
        };
        self.deps
            .sinks
            .portal_server_update
            .offer(PortalServerUpdateMessage::from(&message));
        if self.deps.sinks.server_update.offer(message) {
            handled.events.push(HandlerEvent::SentServerUpdateMessage);
        }
        Ok(handled)
    }
}

pub struct SessionUpdateHandler {
    deps: Arc<HandlerDeps>,
    engine: Arc<SessionUpdateEngine>,
}

impl SessionUpdateHandler {
    pub fn new(deps: Arc<HandlerDeps>, engine: Arc<SessionUpdateEngine>) -> Self {
        Self { deps, engine }
    }
}

#[async_trait]
impl PacketHandler for SessionUpdateHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::SessionUpdateRequest
    }

    async fn handle(&self, ctx: PacketContext, admitted: Admitted) -> Result<Handled, Rejected> {
        let request: SessionUpdateRequest = decode(&admitted)?;
        let mut handled = Handled::new(admitted.packet_type);

        let outcome = self
            .engine
            .process(&SessionContext::at(ctx.now), &admitted.buyer, &request);

        if outcome.has(SessionFlag::BuyerNotLive) {
            handled.events.push(HandlerEvent::BuyerNotLive);
        }
        if outcome.has(SessionFlag::SdkTooOld) {
            handled.events.push(HandlerEvent::SdkTooOld);
        }
        if outcome.has(SessionFlag::UnknownDatacenter) {
            handled.events.push(HandlerEvent::UnknownDatacenter);
        }
        if outcome.has(SessionFlag::LongDuration) {
            handled.events.push(HandlerEvent::LongSessionUpdate);
        }
        if outcome.sent_session_update_message {
            handled.events.push(HandlerEvent::SentSessionUpdateMessage);
        }

        tracing::debug!(
            buyer_id = admitted.buyer.id,
            session_id = outcome.response.session_id,
            slice = request.slice_number,
            outcome = outcome.kind.as_str(),
            "session update"
        );

        handled.response = self.deps.respond(&ctx, &outcome.response);
        if handled.response.is_some() {
            handled.events.push(HandlerEvent::SentSessionUpdateResponse);
        }
        handled.session = Some(outcome);
        Ok(handled)
    }
}

pub struct MatchDataHandler {
    deps: Arc<HandlerDeps>,
}

impl MatchDataHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl PacketHandler for MatchDataHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::MatchDataRequest
    }

    async fn handle(&self, ctx: PacketContext, admitted: Admitted) -> Result<Handled, Rejected> {
        let request: MatchDataRequest = decode(&admitted)?;
        let buyer = &admitted.buyer;
        let mut handled = Handled::new(admitted.packet_type);

        if self.deps.check_buyer(buyer, request.version, &mut handled) != ServerResponseCode::Ok {
            return Ok(handled);
        }

        let response = MatchDataResponse {
            session_id: request.session_id,
        };
        handled.response = self.deps.respond(&ctx, &response);
        if handled.response.is_some() {
            handled.events.push(HandlerEvent::SentMatchDataResponse);
        }

        let sent = self.deps.sinks.match_data.offer(MatchDataMessage {
            timestamp: ctx.now,
            buyer_id: buyer.id,
            server_address: request.server_address,
            datacenter_id: request.datacenter_id,
            user_hash: request.user_hash,
            session_id: request.session_id,
            match_id: request.match_id,
            match_values: request.match_values,
        });
        if sent {
            handled.events.push(HandlerEvent::SentMatchDataMessage);
        }
        Ok(handled)
    }
}
