//! Admission control.
//!
//! Arbitrates a guest session's request to join a live meeting. The
//! decision itself is a compare-and-set inside [`GuestSessionRegistry`];
//! this controller adds the per-session request cooldown and fans the
//! outcome out to the meeting room and to the guest's isolated channel.

use crate::errors::ScError;
use crate::models::GuestSession;
use crate::notify::{Notifier, NotifyScope};
use crate::protocol::Notification;
use crate::stores::GuestSessionRegistry;
use chrono::{DateTime, Duration, Utc};
use common::types::{ChannelId, SessionId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Arbitrates guest admission and publishes decisions.
pub struct AdmissionController {
    sessions: Arc<GuestSessionRegistry>,
    notifier: Arc<Notifier>,
    cooldown: Duration,
    last_requests: Mutex<HashMap<SessionId, DateTime<Utc>>>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(
        sessions: Arc<GuestSessionRegistry>,
        notifier: Arc<Notifier>,
        cooldown_seconds: i64,
    ) -> Self {
        Self {
            sessions,
            notifier,
            cooldown: Duration::seconds(cooldown_seconds),
            last_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the meeting's hosts to admit this guest.
    ///
    /// Rejected with `rate_limited` if the session's previous request is
    /// still inside the cooldown; the caller retries after the stated
    /// delay, the server never waits inline. On success the session moves
    /// to `Requesting` and the room is notified.
    pub async fn request_admission(&self, session_id: SessionId) -> Result<GuestSession, ScError> {
        self.request_admission_at(session_id, Utc::now()).await
    }

    pub async fn request_admission_at(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<GuestSession, ScError> {
        // The cooldown map lock is held across the state transition so two
        // rapid-fire requests from one session cannot both pass the check.
        let mut last_requests = self.last_requests.lock().await;

        if let Some(last) = last_requests.get(&session_id) {
            let elapsed = now - *last;
            if elapsed < self.cooldown {
                let retry_after_seconds = ceil_seconds(self.cooldown - elapsed);
                tracing::debug!(
                    target: "sc.admission",
                    session_id = %session_id,
                    retry_after_seconds,
                    "Admission request inside cooldown"
                );
                return Err(ScError::RateLimited {
                    retry_after_seconds,
                });
            }
        }

        let session = self.sessions.begin_admission_request(session_id).await?;
        last_requests.insert(session_id, now);
        drop(last_requests);

        self.notifier
            .publish(
                &NotifyScope::Room(ChannelId::from(session.meeting_id)),
                Notification::GuestAdmissionRequest {
                    session_id: session.session_id,
                    meeting_id: session.meeting_id,
                    display_name: session.display_name.clone(),
                },
            )
            .await;

        tracing::info!(
            target: "sc.admission",
            session_id = %session_id,
            meeting_id = %session.meeting_id,
            "Admission requested"
        );

        Ok(session)
    }

    /// Admit a requesting guest. First decision wins; the loser of a race
    /// receives a conflict.
    pub async fn admit(
        &self,
        session_id: SessionId,
        admitted_by: UserId,
    ) -> Result<GuestSession, ScError> {
        let session = self
            .sessions
            .decide_admission(session_id, admitted_by, true)
            .await?;

        let room = NotifyScope::Room(ChannelId::from(session.meeting_id));
        self.notifier
            .publish(
                &room,
                Notification::GuestAdmitted {
                    session_id: session.session_id,
                    meeting_id: session.meeting_id,
                    admitted_by,
                },
            )
            .await;
        self.notifier
            .publish(
                &NotifyScope::Guest(session.session_id),
                Notification::AdmissionGranted {
                    session_id: session.session_id,
                    meeting_id: session.meeting_id,
                },
            )
            .await;

        Ok(session)
    }

    /// Decline a requesting guest. The session returns to a retry-eligible
    /// state; only the guest's isolated channel learns it was denied.
    pub async fn decline(
        &self,
        session_id: SessionId,
        declined_by: UserId,
    ) -> Result<GuestSession, ScError> {
        let session = self
            .sessions
            .decide_admission(session_id, declined_by, false)
            .await?;

        let room = NotifyScope::Room(ChannelId::from(session.meeting_id));
        self.notifier
            .publish(
                &room,
                Notification::GuestDeclined {
                    session_id: session.session_id,
                    meeting_id: session.meeting_id,
                },
            )
            .await;
        self.notifier
            .publish(
                &NotifyScope::Guest(session.session_id),
                Notification::AdmissionDenied {
                    session_id: session.session_id,
                    meeting_id: session.meeting_id,
                },
            )
            .await;

        Ok(session)
    }
}

fn ceil_seconds(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0);
    millis.unsigned_abs().div_ceil(1000).max(1)
}
