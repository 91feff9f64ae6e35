//! Message sinks.
//!
//! `offer` never waits. `ChannelSink` is a bounded queue that drops the new
//! message when full; `MemorySink` collects everything for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{
    MatchDataMessage, PortalNearRelayUpdateMessage, PortalServerUpdateMessage,
    PortalSessionUpdateMessage, ServerInitMessage, ServerUpdateMessage, SessionSummaryMessage,
    SessionUpdateMessage,
};

pub trait Sink<M>: Send + Sync {
    /// Hand a message off. `false` when it was dropped.
    fn offer(&self, msg: M) -> bool;
}

/// Bounded channel, drop-new on overflow.
pub struct ChannelSink<M> {
    tx: mpsc::Sender<M>,
    dropped: Arc<AtomicU64>,
}

impl<M: Send> ChannelSink<M> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<M>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl<M: Send> Sink<M> for ChannelSink<M> {
    fn offer(&self, msg: M) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

pub struct MemorySink<M> {
    items: Mutex<Vec<M>>,
}

impl<M> Default for MemorySink<M> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<M> MemorySink<M> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<M>> {
        match self.items.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<M> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Send> Sink<M> for MemorySink<M> {
    fn offer(&self, msg: M) -> bool {
        self.lock().push(msg);
        true
    }
}

/// One sink per message type.
#[derive(Clone)]
pub struct MessageSinks {
    pub server_init: Arc<dyn Sink<ServerInitMessage>>,
    pub server_update: Arc<dyn Sink<ServerUpdateMessage>>,
    pub session_update: Arc<dyn Sink<SessionUpdateMessage>>,
    pub session_summary: Arc<dyn Sink<SessionSummaryMessage>>,
    pub match_data: Arc<dyn Sink<MatchDataMessage>>,
    pub portal_server_update: Arc<dyn Sink<PortalServerUpdateMessage>>,
    pub portal_session_update: Arc<dyn Sink<PortalSessionUpdateMessage>>,
    pub portal_near_relay_update: Arc<dyn Sink<PortalNearRelayUpdateMessage>>,
    drops: Vec<(&'static str, Arc<AtomicU64>)>,
}

impl MessageSinks {
    /// Bounded channel sinks, plus the receiving ends to drain.
    pub fn bounded(capacity: usize) -> (Self, MessageReceivers) {
        let mut drops = Vec::new();

        macro_rules! channel {
            ($name:literal, $msg:ty) => {{
                let (sink, rx) = ChannelSink::<$msg>::new(capacity);
                drops.push(($name, sink.drop_counter()));
                let sink: Arc<dyn Sink<$msg>> = Arc::new(sink);
                (sink, rx)
            }};
        }

        let (server_init, server_init_rx) = channel!("server_init", ServerInitMessage);
        let (server_update, server_update_rx) = channel!("server_update", ServerUpdateMessage);
        let (session_update, session_update_rx) = channel!("session_update", SessionUpdateMessage);
        let (session_summary, session_summary_rx) = channel!("session_summary", SessionSummaryMessage);
        let (match_data, match_data_rx) = channel!("match_data", MatchDataMessage);
        let (portal_server_update, portal_server_update_rx) = channel!("portal_server_update", PortalServerUpdateMessage);
        let (portal_session_update, portal_session_update_rx) = channel!("portal_session_update", PortalSessionUpdateMessage);
        let (portal_near_relay_update, portal_near_relay_update_rx) =
            channel!("portal_near_relay_update", PortalNearRelayUpdateMessage);

        let sinks = Self {
            server_init,
            server_update,
            session_update,
            session_summary,
            match_data,
            portal_server_update,
            portal_session_update,
            portal_near_relay_update,
            drops,
        };
        let receivers = MessageReceivers {
            server_init: server_init_rx,
            server_update: server_update_rx,
            session_update: session_update_rx,
            session_summary: session_summary_rx,
            match_data: match_data_rx,
            portal_server_update: portal_server_update_rx,
            portal_session_update: portal_session_update_rx,
            portal_near_relay_update: portal_near_relay_update_rx,
        };
        (sinks, receivers)
    }

    /// In-memory sinks; the returned collectors see every offered message.
    pub fn memory() -> (Self, MemorySinks) {
        let mem = MemorySinks::default();
        let sinks = Self {
            server_init: mem.server_init.clone(),
            server_update: mem.server_update.clone(),
            session_update: mem.session_update.clone(),
            session_summary: mem.session_summary.clone(),
            match_data: mem.match_data.clone(),
            portal_server_update: mem.portal_server_update.clone(),
            portal_session_update: mem.portal_session_update.clone(),
            portal_near_relay_update: mem.portal_near_relay_update.clone(),
            drops: Vec::new(),
        };
        (sinks, mem)
    }

    /// Dropped message counts by message name (channel sinks only).
    pub fn drop_counts(&self) -> Vec<(&'static str, u64)> {
        self.drops
            .iter()
            .map(|(name, n)| (*name, n.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Default)]
pub struct MemorySinks {
    pub server_init: Arc<MemorySink<ServerInitMessage>>,
    pub server_update: Arc<MemorySink<ServerUpdateMessage>>,
    pub session_update: Arc<MemorySink<SessionUpdateMessage>>,
    pub session_summary: Arc<MemorySink<SessionSummaryMessage>>,
    pub match_data: Arc<MemorySink<MatchDataMessage>>,
    pub portal_server_update: Arc<MemorySink<PortalServerUpdateMessage>>,
    pub portal_session_update: Arc<MemorySink<PortalSessionUpdateMessage>>,
    pub portal_near_relay_update: Arc<MemorySink<PortalNearRelayUpdateMessage>>,
}

pub struct MessageReceivers {
    pub server_init: mpsc::Receiver<ServerInitMessage>,
    pub server_update: mpsc::Receiver<ServerUpdateMessage>,
    pub session_update: mpsc::Receiver<SessionUpdateMessage>,
    pub session_summary: mpsc::Receiver<SessionSummaryMessage>,
    pub match_data: mpsc::Receiver<MatchDataMessage>,
    pub portal_server_update: mpsc::Receiver<PortalServerUpdateMessage>,
    pub portal_session_update: mpsc::Receiver<PortalSessionUpdateMessage>,
    pub portal_near_relay_update: mpsc::Receiver<PortalNearRelayUpdateMessage>,
}

impl MessageReceivers {
    /// Spawn one task per channel that writes each message as a JSON log
    /// event under the `nextroute::messages` target.
    pub fn spawn_log_drains(self) {
        tokio::spawn(drain_to_log("server_init", self.server_init));
        tokio::spawn(drain_to_log("server_update", self.server_update));
        tokio::spawn(drain_to_log("session_update", self.session_update));
        tokio::spawn(drain_to_log("session_summary", self.session_summary));
        tokio::spawn(drain_to_log("match_data", self.match_data));
        tokio::spawn(drain_to_log("portal_server_update", self.portal_server_update));
        tokio::spawn(drain_to_log("portal_session_update", self.portal_session_update));
        tokio::spawn(drain_to_log(
            "portal_near_relay_update",
            self.portal_near_relay_update,
        ));
    }
}

pub async fn drain_to_log<M: Serialize>(name: &'static str, mut rx: mpsc::Receiver<M>) {
    while let Some(msg) = rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(body) => tracing::info!(target: "nextroute::messages", message = name, %body),
            Err(e) => tracing::warn!(target: "nextroute::messages", message = name, error = %e, "encode failed"),
        }
    }
}
