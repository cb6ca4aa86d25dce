//! Guest admission handlers.
//!
//! - `POST /v1/meetings/{meetingId}/external/{sessionId}/request-admission`
//! - `POST /v1/meetings/{meetingId}/external/{sessionId}/admit`
//! - `POST /v1/meetings/{meetingId}/external/{sessionId}/decline`
//!
//! The admission decision itself is a compare-and-set in the session
//! registry; these handlers only bind it to HTTP and check that the
//! session actually belongs to the meeting named in the path.

use crate::errors::ScError;
use crate::handlers::guest_sessions::GuestSessionDescriptor;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use common::types::{MeetingId, SessionId, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

async fn session_in_meeting(
    state: &AppState,
    meeting_id: MeetingId,
    session_id: SessionId,
) -> Result<(), ScError> {
    let session = state.sessions.get_session(session_id).await?;
    if session.meeting_id != meeting_id {
        return Err(ScError::NotFound(
            "Guest session not found for this meeting".to_string(),
        ));
    }
    Ok(())
}

/// Handler for POST /v1/meetings/{meetingId}/external/{sessionId}/request-admission
///
/// 429 with `retry_after` when the session re-requests inside the
/// cooldown, 409 when the session is already admitted.
#[instrument(skip(state), fields(meeting_id = %meeting_id, session_id = %session_id))]
pub async fn request_admission(
    State(state): State<Arc<AppState>>,
    Path((meeting_id, session_id)): Path<(MeetingId, SessionId)>,
) -> Result<Json<GuestSessionDescriptor>, ScError> {
    session_in_meeting(&state, meeting_id, session_id).await?;

    let session = state.admission.request_admission(session_id).await?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize)]
pub struct AdmitGuestRequest {
    pub admitted_by: UserId,
}

/// Handler for POST /v1/meetings/{meetingId}/external/{sessionId}/admit
///
/// 409 unless the session is currently `requesting`; of two racing
/// decisions exactly one wins.
#[instrument(skip(state, request), fields(meeting_id = %meeting_id, session_id = %session_id))]
pub async fn admit_guest(
    State(state): State<Arc<AppState>>,
    Path((meeting_id, session_id)): Path<(MeetingId, SessionId)>,
    Json(request): Json<AdmitGuestRequest>,
) -> Result<Json<GuestSessionDescriptor>, ScError> {
    session_in_meeting(&state, meeting_id, session_id).await?;

    let session = state
        .admission
        .admit(session_id, request.admitted_by)
        .await?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize)]
pub struct DeclineGuestRequest {
    pub declined_by: UserId,
}

/// Handler for POST /v1/meetings/{meetingId}/external/{sessionId}/decline
///
/// Moves the session back to a re-request eligible state.
#[instrument(skip(state, request), fields(meeting_id = %meeting_id, session_id = %session_id))]
pub async fn decline_guest(
    State(state): State<Arc<AppState>>,
    Path((meeting_id, session_id)): Path<(MeetingId, SessionId)>,
    Json(request): Json<DeclineGuestRequest>,
) -> Result<Json<GuestSessionDescriptor>, ScError> {
    session_in_meeting(&state, meeting_id, session_id).await?;

    let session = state
        .admission
        .decline(session_id, request.declined_by)
        .await?;
    Ok(Json(session.into()))
}
