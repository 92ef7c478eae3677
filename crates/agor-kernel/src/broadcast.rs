//! A channel-backed broadcaster with bounded per-subscriber buffers.
//!
//! Fan-out must never block the emitting task on a slow viewer. Each
//! session (and user) gets a `tokio::sync::broadcast` channel: buffers
//! are bounded, and a lagging subscriber loses the oldest events, not
//! the emitter's time.

use agor_core::{BroadcastEvent, Broadcaster, SessionId, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-channel buffer capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Registry {
    by_session: HashMap<SessionId, broadcast::Sender<BroadcastEvent>>,
    by_user: HashMap<UserId, broadcast::Sender<BroadcastEvent>>,
}

/// In-process fan-out over broadcast channels. The transport layer
/// subscribes per session or per user and drains at its own pace;
/// `RecvError::Lagged` tells a slow subscriber how much it missed.
#[derive(Debug)]
pub struct ChannelBroadcaster {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl ChannelBroadcaster {
    /// Create a broadcaster with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broadcaster with a specific per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            capacity,
        }
    }

    /// Subscribe to a session's events.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn subscribe_session(&self, session_id: SessionId) -> broadcast::Receiver<BroadcastEvent> {
        let mut registry = self.registry.lock().expect("broadcast registry lock");
        registry
            .by_session
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to a user's events.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn subscribe_user(&self, user_id: UserId) -> broadcast::Receiver<BroadcastEvent> {
        let mut registry = self.registry.lock().expect("broadcast registry lock");
        registry
            .by_user
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit_to_session(&self, session_id: SessionId, event: &BroadcastEvent) {
        let registry = self.registry.lock().expect("broadcast registry lock");
        if let Some(sender) = registry.by_session.get(&session_id) {
            // No receivers is fine; events exist for whoever watches.
            if sender.send(event.clone()).is_err() {
                trace!(session = %session_id, "no session subscribers");
            }
        }
    }

    fn emit_to_user(&self, user_id: UserId, event: &BroadcastEvent) {
        let registry = self.registry.lock().expect("broadcast registry lock");
        if let Some(sender) = registry.by_user.get(&user_id) {
            if sender.send(event.clone()).is_err() {
                trace!(user = %user_id, "no user subscribers");
            }
        }
    }
}
