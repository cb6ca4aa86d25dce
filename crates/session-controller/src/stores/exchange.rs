//! Key-bundle exchange gateway.
//!
//! Brokers cross-party bundle fetches (guest to participant and back) on
//! top of [`KeyBundleStore`], enforcing a per-requester rolling-window
//! rate limit, and routes encrypted sender-key distribution messages:
//! online recipients get them over the real-time channel, offline
//! recipients get a durable FIFO queue per (recipient, device).

use crate::errors::ScError;
use crate::models::{KeyOwner, PreKeyBundle, QueuedSenderKey};
use crate::notify::{Notifier, NotifyScope};
use crate::protocol::Notification;
use crate::stores::key_bundles::KeyBundleStore;
use chrono::{DateTime, Duration, Utc};
use common::types::{ChannelId, DeviceId, MeetingId, SessionId, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Device id under which guest key material is stored. Guests register a
/// single ephemeral bundle, not per-device material.
pub const GUEST_DEVICE_ID: &str = "guest";

/// Identity a fetch is rate-limited by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FetchKey {
    Participant {
        meeting: MeetingId,
        user: UserId,
        device: DeviceId,
    },
    Guest(SessionId),
}

/// Whether a sender-key distribution reached the recipient live or was
/// parked for later retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
}

struct Inner {
    fetch_log: HashMap<FetchKey, VecDeque<DateTime<Utc>>>,
    offline_queues: HashMap<(String, DeviceId), VecDeque<QueuedSenderKey>>,
}

/// Brokers key-bundle fetches and sender-key distribution.
pub struct KeybundleExchangeGateway {
    key_bundles: Arc<KeyBundleStore>,
    notifier: Arc<Notifier>,
    fetch_limit: usize,
    fetch_window: Duration,
    inner: Mutex<Inner>,
}

impl KeybundleExchangeGateway {
    #[must_use]
    pub fn new(
        key_bundles: Arc<KeyBundleStore>,
        notifier: Arc<Notifier>,
        fetch_limit: usize,
        fetch_window_seconds: i64,
    ) -> Self {
        Self {
            key_bundles,
            notifier,
            fetch_limit,
            fetch_window: Duration::seconds(fetch_window_seconds),
            inner: Mutex::new(Inner {
                fetch_log: HashMap::new(),
                offline_queues: HashMap::new(),
            }),
        }
    }

    /// Fetch-and-consume a participant's key bundle on behalf of a guest.
    pub async fn get_participant_keybundle(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        device_id: DeviceId,
    ) -> Result<PreKeyBundle, ScError> {
        self.get_participant_keybundle_at(meeting_id, user_id, device_id, Utc::now())
            .await
    }

    pub async fn get_participant_keybundle_at(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        device_id: DeviceId,
        now: DateTime<Utc>,
    ) -> Result<PreKeyBundle, ScError> {
        let key = FetchKey::Participant {
            meeting: meeting_id,
            user: user_id,
            device: device_id.clone(),
        };
        self.check_and_record_fetch(key, now).await?;

        self.key_bundles
            .issue_pre_key_bundle(KeyOwner::User(user_id), &device_id)
            .await
    }

    /// Fetch-and-consume a guest's key bundle on behalf of a participant.
    pub async fn get_guest_keybundle(&self, session_id: SessionId) -> Result<PreKeyBundle, ScError> {
        self.get_guest_keybundle_at(session_id, Utc::now()).await
    }

    pub async fn get_guest_keybundle_at(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<PreKeyBundle, ScError> {
        self.check_and_record_fetch(FetchKey::Guest(session_id), now)
            .await?;

        self.key_bundles
            .issue_pre_key_bundle(
                KeyOwner::Guest(session_id),
                &DeviceId::new(GUEST_DEVICE_ID),
            )
            .await
    }

    /// Route an encrypted group-key distribution message to its recipient.
    ///
    /// The payload is opaque to the server. Recipients with a live device
    /// subscription get it immediately; otherwise it is appended to that
    /// device's durable queue, preserving FIFO order, for at-least-once
    /// delivery on the next retrieval.
    pub async fn distribute_sender_key(
        &self,
        group_id: ChannelId,
        sender_id: String,
        recipient_id: String,
        recipient_device: DeviceId,
        encrypted_payload: String,
    ) -> Result<DeliveryOutcome, ScError> {
        let message = QueuedSenderKey::new(group_id, sender_id, encrypted_payload);
        let scope = NotifyScope::Device {
            recipient_id: recipient_id.clone(),
            device: recipient_device.clone(),
        };

        let reached = self
            .notifier
            .publish(
                &scope,
                Notification::SenderKeyDistribution {
                    message_id: message.message_id,
                    group_id: message.group_id.clone(),
                    sender_id: message.sender_id.clone(),
                    encrypted_payload: message.encrypted_payload.clone(),
                },
            )
            .await;

        if reached > 0 {
            return Ok(DeliveryOutcome::Delivered);
        }

        let mut inner = self.inner.lock().await;
        inner
            .offline_queues
            .entry((recipient_id, recipient_device))
            .or_default()
            .push_back(message);

        Ok(DeliveryOutcome::Queued)
    }

    /// Drain every queued sender-key message for (recipient, device), in
    /// the order they were enqueued.
    pub async fn drain_queued_sender_keys(
        &self,
        recipient_id: &str,
        recipient_device: &DeviceId,
    ) -> Vec<QueuedSenderKey> {
        let mut inner = self.inner.lock().await;
        inner
            .offline_queues
            .remove(&(recipient_id.to_string(), recipient_device.clone()))
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Enforce the rolling-window fetch quota for one requester identity.
    ///
    /// A rejected call records nothing, so hammering a limited identity
    /// never extends its own lockout.
    async fn check_and_record_fetch(
        &self,
        key: FetchKey,
        now: DateTime<Utc>,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        let log = inner.fetch_log.entry(key).or_default();

        let cutoff = now - self.fetch_window;
        while log.front().is_some_and(|t| *t <= cutoff) {
            log.pop_front();
        }

        if log.len() >= self.fetch_limit {
            let retry_after_seconds = log
                .front()
                .map(|oldest| ceil_seconds(*oldest + self.fetch_window - now))
                .unwrap_or(1);
            return Err(ScError::RateLimited {
                retry_after_seconds,
            });
        }

        log.push_back(now);
        Ok(())
    }
}

fn ceil_seconds(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0);
    millis.unsigned_abs().div_ceil(1000).max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::OneTimePreKey;
    use crate::models::PUBLIC_KEY_LENGTH_BYTES;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    const LIMIT: usize = 3;
    const WINDOW: i64 = 60;

    fn payload() -> String {
        BASE64.encode([7u8; PUBLIC_KEY_LENGTH_BYTES])
    }

    async fn gateway_with_participant_keys(
        user_id: UserId,
        device: &DeviceId,
        pool_size: u32,
    ) -> KeybundleExchangeGateway {
        let store = Arc::new(KeyBundleStore::new());
        let owner = KeyOwner::User(user_id);
        store
            .store_identity(owner, device.clone(), payload(), 1)
            .await
            .unwrap();
        store
            .store_signed_pre_key(owner, device.clone(), 1, payload(), "sig".to_string())
            .await
            .unwrap();
        let pre_keys = (0..pool_size)
            .map(|id| OneTimePreKey {
                id,
                data: payload(),
            })
            .collect();
        store
            .store_pre_keys(owner, device.clone(), pre_keys)
            .await
            .unwrap();

        KeybundleExchangeGateway::new(store, Arc::new(Notifier::new()), LIMIT, WINDOW)
    }

    #[tokio::test]
    async fn test_fourth_fetch_in_window_is_rate_limited() {
        let user_id = UserId::new();
        let device = DeviceId::new("desktop");
        let gateway = gateway_with_participant_keys(user_id, &device, 10).await;
        let meeting = MeetingId::new();
        let start = Utc::now();

        for i in 0..LIMIT {
            let result = gateway
                .get_participant_keybundle_at(
                    meeting,
                    user_id,
                    device.clone(),
                    start + Duration::seconds(i as i64),
                )
                .await;
            assert!(result.is_ok(), "fetch {i} should pass");
        }

        let fourth = gateway
            .get_participant_keybundle_at(
                meeting,
                user_id,
                device.clone(),
                start + Duration::seconds(10),
            )
            .await;
        match fourth {
            Err(ScError::RateLimited {
                retry_after_seconds,
            }) => assert!(retry_after_seconds <= WINDOW as u64),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_succeeds_after_window_elapses() {
        let user_id = UserId::new();
        let device = DeviceId::new("desktop");
        let gateway = gateway_with_participant_keys(user_id, &device, 10).await;
        let meeting = MeetingId::new();
        let start = Utc::now();

        for _ in 0..LIMIT {
            gateway
                .get_participant_keybundle_at(meeting, user_id, device.clone(), start)
                .await
                .unwrap();
        }

        let after_window = start + Duration::seconds(WINDOW + 1);
        let fifth = gateway
            .get_participant_keybundle_at(meeting, user_id, device.clone(), after_window)
            .await;
        assert!(fifth.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limited_fetch_consumes_no_key() {
        let user_id = UserId::new();
        let device = DeviceId::new("desktop");
        let gateway = gateway_with_participant_keys(user_id, &device, 10).await;
        let meeting = MeetingId::new();
        let now = Utc::now();

        for _ in 0..LIMIT {
            gateway
                .get_participant_keybundle_at(meeting, user_id, device.clone(), now)
                .await
                .unwrap();
        }
        let remaining_before = gateway
            .key_bundles
            .count_pre_keys(KeyOwner::User(user_id), &device)
            .await;

        let rejected = gateway
            .get_participant_keybundle_at(meeting, user_id, device.clone(), now)
            .await;
        assert!(matches!(rejected, Err(ScError::RateLimited { .. })));

        let remaining_after = gateway
            .key_bundles
            .count_pre_keys(KeyOwner::User(user_id), &device)
            .await;
        assert_eq!(remaining_before, remaining_after);
    }

    #[tokio::test]
    async fn test_distinct_requesters_have_independent_quotas() {
        let user_id = UserId::new();
        let device = DeviceId::new("desktop");
        let gateway = gateway_with_participant_keys(user_id, &device, 10).await;
        let now = Utc::now();

        let meeting_a = MeetingId::new();
        let meeting_b = MeetingId::new();

        for _ in 0..LIMIT {
            gateway
                .get_participant_keybundle_at(meeting_a, user_id, device.clone(), now)
                .await
                .unwrap();
        }

        // Same target through a different meeting identity is not limited
        let result = gateway
            .get_participant_keybundle_at(meeting_b, user_id, device.clone(), now)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sender_key_queued_for_offline_recipient() {
        let store = Arc::new(KeyBundleStore::new());
        let gateway =
            KeybundleExchangeGateway::new(store, Arc::new(Notifier::new()), LIMIT, WINDOW);
        let device = DeviceId::new("phone");

        let outcome = gateway
            .distribute_sender_key(
                ChannelId::new("group-1"),
                "alice".to_string(),
                "bob".to_string(),
                device.clone(),
                "encrypted-blob-1".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Queued);

        gateway
            .distribute_sender_key(
                ChannelId::new("group-1"),
                "alice".to_string(),
                "bob".to_string(),
                device.clone(),
                "encrypted-blob-2".to_string(),
            )
            .await
            .unwrap();

        let drained = gateway.drain_queued_sender_keys("bob", &device).await;
        assert_eq!(drained.len(), 2);
        // FIFO order preserved
        assert_eq!(drained.first().unwrap().encrypted_payload, "encrypted-blob-1");
        assert_eq!(drained.get(1).unwrap().encrypted_payload, "encrypted-blob-2");

        // Drained queue is gone
        assert!(gateway.drain_queued_sender_keys("bob", &device).await.is_empty());
    }

    #[tokio::test]
    async fn test_sender_key_delivered_live_when_subscribed() {
        let store = Arc::new(KeyBundleStore::new());
        let notifier = Arc::new(Notifier::new());
        let gateway =
            KeybundleExchangeGateway::new(store, Arc::clone(&notifier), LIMIT, WINDOW);
        let device = DeviceId::new("phone");

        let mut rx = notifier
            .subscribe(NotifyScope::Device {
                recipient_id: "bob".to_string(),
                device: device.clone(),
            })
            .await;

        let outcome = gateway
            .distribute_sender_key(
                ChannelId::new("group-1"),
                "alice".to_string(),
                "bob".to_string(),
                device.clone(),
                "encrypted-blob".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        match rx.recv().await.unwrap() {
            Notification::SenderKeyDistribution {
                encrypted_payload, ..
            } => assert_eq!(encrypted_payload, "encrypted-blob"),
            other => panic!("unexpected notification {other:?}"),
        }

        // Nothing was parked in the offline queue
        assert!(gateway.drain_queued_sender_keys("bob", &device).await.is_empty());
    }
}
