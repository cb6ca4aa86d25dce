//! Domain model for the signaling core.
//!
//! These types are shared by the stores, the admission controller, and the
//! HTTP/real-time surfaces. Key material is carried opaquely: the server
//! stores and routes public artifacts but never performs cryptographic
//! operations on them.

use chrono::{DateTime, Duration, Utc};
use common::types::{ChannelId, DeviceId, MeetingId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum guest display name length.
pub const MIN_GUEST_DISPLAY_NAME_LENGTH: usize = 2;

/// Maximum guest display name length.
pub const MAX_GUEST_DISPLAY_NAME_LENGTH: usize = 100;

/// Decoded length of a valid pre-key public payload.
///
/// Curve25519 public keys arrive as a type byte plus 32 key bytes. Anything
/// that decodes to a different length is rejected as a key-format error.
pub const PUBLIC_KEY_LENGTH_BYTES: usize = 33;

/// Guest session lifetime from registration.
pub const GUEST_SESSION_TTL_HOURS: i64 = 4;

/// A scheduled meeting. Owns the validity window that invitation tokens
/// are evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_by: UserId,
}

/// An opaque bearer credential granting guest access to one meeting.
///
/// The token value itself is the lookup key; validity is re-evaluated
/// against the meeting's start time on every use, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationToken {
    pub token: String,
    pub meeting_id: MeetingId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Admission state of a guest session.
///
/// `NotRequested` and `Reset` are both re-request eligible; they are kept
/// distinct so "never asked" and "declined, may retry" stay observable.
/// `Admitted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    NotRequested,
    Requesting,
    Admitted,
    Reset,
}

impl AdmissionState {
    /// Whether this session may issue a new admission request.
    #[must_use]
    pub fn can_request(self) -> bool {
        matches!(self, AdmissionState::NotRequested | AdmissionState::Reset)
    }
}

/// An ephemeral token-derived identity for an unauthenticated participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSession {
    pub session_id: SessionId,
    pub meeting_id: MeetingId,
    /// The invitation token this session was registered with. Retained so
    /// key-material reads can be authenticated and so a later registration
    /// with the same token can invalidate this session.
    pub token: String,
    pub display_name: String,
    pub admission: AdmissionState,
    pub admitted_by: Option<UserId>,
    /// True when the guest supplied no public keys at registration and the
    /// server generated a placeholder bundle (reduced-security mode).
    pub temporary_keys: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GuestSession {
    /// Expiry is computed from `expires_at` at call time, never from a flag.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn default_expiry(created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::hours(GUEST_SESSION_TTL_HOURS)
    }
}

/// Owner of stored key material. Participants are keyed by user id,
/// guests by their ephemeral session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum KeyOwner {
    User(UserId),
    Guest(SessionId),
}

impl std::fmt::Display for KeyOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyOwner::User(id) => write!(f, "user:{id}"),
            KeyOwner::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

/// Long-lived identity key for one (owner, device). Overwritten on rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKey {
    pub public_key: String,
    pub registration_id: u32,
}

/// Medium-lived pre-key signed by the identity key. The most recently
/// created one is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub id: u32,
    pub data: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// Single-use public key material. Each id is issued at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub id: u32,
    pub data: String,
}

/// The material returned by a key-bundle fetch. The one-time component is
/// absent when the owner's pool is exhausted (protocol-level fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub identity_key: IdentityKey,
    pub signed_pre_key: SignedPreKey,
    pub one_time_pre_key: Option<OneTimePreKey>,
}

/// Encrypted group-messaging key material, keyed by (channel, device).
/// Stored and served as an opaque blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKey {
    pub channel: ChannelId,
    pub device: DeviceId,
    pub key_material: String,
    pub updated_at: DateTime<Utc>,
}

/// A sender-key distribution message queued for an offline recipient.
///
/// `message_id` lets recipients de-duplicate on at-least-once redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSenderKey {
    pub message_id: Uuid,
    pub group_id: ChannelId,
    pub sender_id: String,
    pub encrypted_payload: String,
    pub queued_at: DateTime<Utc>,
}

impl QueuedSenderKey {
    #[must_use]
    pub fn new(group_id: ChannelId, sender_id: String, encrypted_payload: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            group_id,
            sender_id,
            encrypted_payload,
            queued_at: Utc::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub room_count: usize,
    pub connection_count: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_state_can_request() {
        assert!(AdmissionState::NotRequested.can_request());
        assert!(AdmissionState::Reset.can_request());
        assert!(!AdmissionState::Requesting.can_request());
        assert!(!AdmissionState::Admitted.can_request());
    }

    #[test]
    fn test_admission_state_serializes_snake_case() {
        let json = serde_json::to_string(&AdmissionState::NotRequested).unwrap();
        assert_eq!(json, "\"not_requested\"");

        let json = serde_json::to_string(&AdmissionState::Admitted).unwrap();
        assert_eq!(json, "\"admitted\"");
    }

    #[test]
    fn test_session_expiry_is_time_based() {
        let created_at = Utc::now();
        let session = GuestSession {
            session_id: SessionId::new(),
            meeting_id: MeetingId::new(),
            token: "tok".to_string(),
            display_name: "Guest".to_string(),
            admission: AdmissionState::NotRequested,
            admitted_by: None,
            temporary_keys: false,
            created_at,
            expires_at: GuestSession::default_expiry(created_at),
        };

        assert!(!session.is_expired(created_at));
        assert!(!session.is_expired(created_at + Duration::hours(GUEST_SESSION_TTL_HOURS - 1)));
        assert!(session.is_expired(created_at + Duration::hours(GUEST_SESSION_TTL_HOURS)));
    }

    #[test]
    fn test_key_owner_display_distinguishes_kinds() {
        let user = UserId::new();
        let session = SessionId::new();

        assert_eq!(KeyOwner::User(user).to_string(), format!("user:{user}"));
        assert_eq!(
            KeyOwner::Guest(session).to_string(),
            format!("guest:{session}")
        );
    }

    #[test]
    fn test_queued_sender_key_ids_are_unique() {
        let a = QueuedSenderKey::new(
            ChannelId::new("c1"),
            "sender".to_string(),
            "blob".to_string(),
        );
        let b = QueuedSenderKey::new(
            ChannelId::new("c1"),
            "sender".to_string(),
            "blob".to_string(),
        );
        assert_ne!(a.message_id, b.message_id);
    }
}
