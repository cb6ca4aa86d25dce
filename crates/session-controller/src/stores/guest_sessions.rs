//! Guest session registry.
//!
//! Sessions are ephemeral identities derived from invitation tokens. The
//! admission state machine lives here so that its check-then-write is a
//! single critical section: `decide_admission` observes `Requesting` and
//! writes the decision under one lock, which is the sole concurrency guard
//! against two hosts resolving the same request.

use crate::errors::ScError;
use crate::models::{
    AdmissionState, GuestSession, MAX_GUEST_DISPLAY_NAME_LENGTH, MIN_GUEST_DISPLAY_NAME_LENGTH,
};
use chrono::{DateTime, Utc};
use common::types::{MeetingId, SessionId, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Owns all live guest sessions, keyed by session id.
pub struct GuestSessionRegistry {
    sessions: Mutex<HashMap<SessionId, GuestSession>>,
}

impl GuestSessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new guest session for a meeting.
    ///
    /// Prior sessions registered with the same token are removed first, so
    /// the most recent registration from one invite link always wins and a
    /// single link cannot yield duplicate guest identities.
    pub async fn create_session(
        &self,
        meeting_id: MeetingId,
        token: String,
        display_name: String,
        temporary_keys: bool,
    ) -> Result<GuestSession, ScError> {
        validate_display_name(&display_name)?;

        let created_at = Utc::now();
        let session = GuestSession {
            session_id: SessionId::new(),
            meeting_id,
            token: token.clone(),
            display_name,
            admission: AdmissionState::NotRequested,
            admitted_by: None,
            temporary_keys,
            created_at,
            expires_at: GuestSession::default_expiry(created_at),
        };

        let mut sessions = self.sessions.lock().await;
        let replaced = remove_by_token(&mut sessions, meeting_id, &token);
        sessions.insert(session.session_id, session.clone());

        tracing::info!(
            target: "sc.stores.guest_sessions",
            session_id = %session.session_id,
            meeting_id = %meeting_id,
            replaced_sessions = replaced,
            "Guest session created"
        );

        Ok(session)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<GuestSession, ScError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| ScError::NotFound("Guest session not found".to_string()))
    }

    /// Fetch a session, checking the presented token and expiry.
    ///
    /// Used by the key-material read path: a caller holding a stale or
    /// foreign token learns nothing beyond "forbidden".
    pub async fn authorize_session(
        &self,
        session_id: SessionId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<GuestSession, ScError> {
        let session = self.get_session(session_id).await?;

        if session.token != token {
            return Err(ScError::Forbidden("Invalid session token".to_string()));
        }
        if session.is_expired(now) {
            return Err(ScError::Forbidden("Guest session expired".to_string()));
        }

        Ok(session)
    }

    pub async fn update_display_name(
        &self,
        session_id: SessionId,
        display_name: String,
    ) -> Result<GuestSession, ScError> {
        validate_display_name(&display_name)?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ScError::NotFound("Guest session not found".to_string()))?;

        session.display_name = display_name;
        Ok(session.clone())
    }

    pub async fn is_session_expired(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, ScError> {
        let session = self.get_session(session_id).await?;
        Ok(session.is_expired(now))
    }

    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), ScError> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .remove(&session_id)
            .map(|_| ())
            .ok_or_else(|| ScError::NotFound("Guest session not found".to_string()))
    }

    /// Remove every session registered with `token` for `meeting_id`.
    /// Returns the number of sessions removed.
    pub async fn delete_sessions_by_token(&self, meeting_id: MeetingId, token: &str) -> usize {
        let mut sessions = self.sessions.lock().await;
        remove_by_token(&mut sessions, meeting_id, token)
    }

    /// Move a session into `Requesting`.
    ///
    /// Allowed from `NotRequested`, `Reset`, and `Requesting` (a guest may
    /// re-signal once its cooldown elapses). A session that was already
    /// admitted cannot ask again.
    pub async fn begin_admission_request(
        &self,
        session_id: SessionId,
    ) -> Result<GuestSession, ScError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ScError::NotFound("Guest session not found".to_string()))?;

        if session.is_expired(Utc::now()) {
            return Err(ScError::Forbidden("Guest session expired".to_string()));
        }
        if session.admission == AdmissionState::Admitted {
            return Err(ScError::Conflict("Session already admitted".to_string()));
        }

        session.admission = AdmissionState::Requesting;
        Ok(session.clone())
    }

    /// Resolve a pending admission request.
    ///
    /// Only a session currently in `Requesting` can be decided. The state
    /// check and the write happen under one lock, so of two concurrent
    /// admit/decline calls exactly one succeeds and the loser observes a
    /// conflict. Admission is terminal; decline moves the session to
    /// `Reset` so the guest may ask again.
    pub async fn decide_admission(
        &self,
        session_id: SessionId,
        decided_by: UserId,
        admit: bool,
    ) -> Result<GuestSession, ScError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ScError::NotFound("Guest session not found".to_string()))?;

        if session.admission != AdmissionState::Requesting {
            return Err(ScError::Conflict(
                "Admission already processed".to_string(),
            ));
        }

        if admit {
            session.admission = AdmissionState::Admitted;
            session.admitted_by = Some(decided_by);
        } else {
            session.admission = AdmissionState::Reset;
            session.admitted_by = None;
        }

        tracing::info!(
            target: "sc.stores.guest_sessions",
            session_id = %session_id,
            admitted = admit,
            decided_by = %decided_by,
            "Admission decision recorded"
        );

        Ok(session.clone())
    }
}

impl Default for GuestSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_display_name(display_name: &str) -> Result<(), ScError> {
    let trimmed = display_name.trim();
    if trimmed.len() < MIN_GUEST_DISPLAY_NAME_LENGTH {
        return Err(ScError::Validation(format!(
            "display_name must be at least {MIN_GUEST_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    if trimmed.len() > MAX_GUEST_DISPLAY_NAME_LENGTH {
        return Err(ScError::Validation(format!(
            "display_name must be at most {MAX_GUEST_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn remove_by_token(
    sessions: &mut HashMap<SessionId, GuestSession>,
    meeting_id: MeetingId,
    token: &str,
) -> usize {
    let before = sessions.len();
    sessions.retain(|_, s| !(s.meeting_id == meeting_id && s.token == token));
    before - sessions.len()
}
