//! Meeting and invitation-token store.
//!
//! Invitation tokens are opaque bearer credentials minted from a CSPRNG.
//! Validity is evaluated against the meeting's start time on every call,
//! never cached at issuance.

use crate::errors::ScError;
use crate::models::{InvitationToken, Meeting};
use chrono::{DateTime, Duration, Utc};
use common::types::{MeetingId, UserId};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Length of the random portion of an invitation token in bytes.
const INVITATION_TOKEN_BYTES: usize = 32;

/// Owns meetings and the invitation tokens minted for them.
pub struct MeetingStore {
    inner: Mutex<Inner>,
    rng: SystemRandom,
}

struct Inner {
    meetings: HashMap<MeetingId, Meeting>,
    invitations: HashMap<String, InvitationToken>,
}

impl MeetingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                meetings: HashMap::new(),
                invitations: HashMap::new(),
            }),
            rng: SystemRandom::new(),
        }
    }

    /// Create a meeting with the given schedule.
    pub async fn create_meeting(
        &self,
        title: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        created_by: UserId,
    ) -> Result<Meeting, ScError> {
        if end_time <= start_time {
            return Err(ScError::Validation(
                "end_time must be after start_time".to_string(),
            ));
        }

        let meeting = Meeting {
            id: MeetingId::new(),
            title,
            start_time,
            end_time,
            created_by,
        };

        let mut inner = self.inner.lock().await;
        inner.meetings.insert(meeting.id, meeting.clone());

        tracing::info!(
            target: "sc.stores.meetings",
            meeting_id = %meeting.id,
            start_time = %meeting.start_time,
            "Meeting created"
        );

        Ok(meeting)
    }

    pub async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Meeting, ScError> {
        let inner = self.inner.lock().await;
        inner
            .meetings
            .get(&meeting_id)
            .cloned()
            .ok_or_else(|| ScError::NotFound("Meeting not found".to_string()))
    }

    /// Mint an invitation token for a meeting.
    pub async fn create_invitation(
        &self,
        meeting_id: MeetingId,
        created_by: UserId,
    ) -> Result<InvitationToken, ScError> {
        let mut bytes = [0u8; INVITATION_TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| ScError::Internal("Failed to generate invitation token".to_string()))?;

        let invitation = InvitationToken {
            token: hex::encode(bytes),
            meeting_id,
            created_by,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        if !inner.meetings.contains_key(&meeting_id) {
            return Err(ScError::NotFound("Meeting not found".to_string()));
        }
        inner
            .invitations
            .insert(invitation.token.clone(), invitation.clone());

        tracing::info!(
            target: "sc.stores.meetings",
            meeting_id = %meeting_id,
            "Invitation token minted"
        );

        Ok(invitation)
    }

    /// Validate an invitation token against the current wall clock.
    pub async fn validate_invitation_token(
        &self,
        token: &str,
        window_seconds: i64,
    ) -> Result<Meeting, ScError> {
        self.validate_invitation_token_at(token, window_seconds, Utc::now())
            .await
    }

    /// Validate an invitation token at an explicit instant.
    ///
    /// The token must exist and `now` must fall inside
    /// [start − window, start + window], endpoints inclusive.
    pub async fn validate_invitation_token_at(
        &self,
        token: &str,
        window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Meeting, ScError> {
        let inner = self.inner.lock().await;

        let invitation = inner
            .invitations
            .get(token)
            .ok_or_else(|| ScError::NotFound("Invalid invitation token".to_string()))?;

        let meeting = inner
            .meetings
            .get(&invitation.meeting_id)
            .ok_or_else(|| ScError::NotFound("Meeting not found".to_string()))?;

        let window = Duration::seconds(window_seconds);
        if now < meeting.start_time - window || now > meeting.start_time + window {
            tracing::debug!(
                target: "sc.stores.meetings",
                meeting_id = %meeting.id,
                now = %now,
                start_time = %meeting.start_time,
                "Invitation token outside validity window"
            );
            return Err(ScError::OutsideTimeWindow);
        }

        Ok(meeting.clone())
    }
}

impl Default for MeetingStore {
    fn default() -> Self {
        Self::new()
    }
}
