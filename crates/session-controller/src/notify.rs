//! Notification fan-out.
//!
//! Delivers server-push notifications to logical scopes. Room scopes
//! multicast to every subscribed connection; guest scopes are isolated so
//! one guest's admission outcome is invisible to other guests; device
//! scopes address one (recipient, device) pair for sender-key delivery.
//!
//! Delivery is best-effort and at-most-once. A failed or subscriber-less
//! publish is reported to the caller but never fails the primary
//! operation that triggered it.

use crate::protocol::Notification;
use common::types::{ChannelId, DeviceId, SessionId};
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

/// Per-scope buffer for slow subscribers before messages are dropped.
const SCOPE_CHANNEL_CAPACITY: usize = 64;

/// Addressable delivery scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotifyScope {
    /// All connections joined to a room.
    Room(ChannelId),
    /// One guest's isolated channel.
    Guest(SessionId),
    /// One recipient device, used for real-time sender-key delivery.
    Device {
        recipient_id: String,
        device: DeviceId,
    },
}

/// Fan-out hub for real-time notifications.
pub struct Notifier {
    scopes: Mutex<HashMap<NotifyScope, broadcast::Sender<Notification>>>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a scope. The subscription ends when the returned
    /// receiver is dropped.
    pub async fn subscribe(&self, scope: NotifyScope) -> broadcast::Receiver<Notification> {
        let mut scopes = self.scopes.lock().await;
        scopes
            .entry(scope)
            .or_insert_with(|| broadcast::channel(SCOPE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Whether any connection is currently subscribed to `scope`.
    pub async fn has_subscribers(&self, scope: &NotifyScope) -> bool {
        let scopes = self.scopes.lock().await;
        scopes.get(scope).is_some_and(|tx| tx.receiver_count() > 0)
    }

    /// Publish a notification to every subscriber of `scope`.
    ///
    /// Returns the number of subscribers reached. Zero is not an error;
    /// callers that need durable delivery fall back to queueing.
    pub async fn publish(&self, scope: &NotifyScope, notification: Notification) -> usize {
        let mut scopes = self.scopes.lock().await;

        let reached = match scopes.get(scope) {
            Some(tx) => tx.send(notification).unwrap_or(0),
            None => 0,
        };

        // Drop scopes whose last subscriber is gone
        scopes.retain(|_, tx| tx.receiver_count() > 0);

        if reached == 0 {
            tracing::debug!(
                target: "sc.notify",
                ?scope,
                "Notification had no subscribers"
            );
        }

        reached
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
