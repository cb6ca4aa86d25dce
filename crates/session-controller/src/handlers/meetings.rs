//! Meeting management handlers.
//!
//! - `POST /v1/meetings` - Schedule a meeting
//! - `POST /v1/meetings/{meetingId}/invitations` - Mint an invitation token

use crate::errors::ScError;
use crate::models::{InvitationToken, Meeting};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_by: UserId,
}

/// Handler for POST /v1/meetings
#[instrument(skip(state, request))]
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateMeetingRequest>,
) -> Result<(StatusCode, Json<Meeting>), ScError> {
    if request.title.trim().is_empty() {
        return Err(ScError::Validation("title must not be empty".to_string()));
    }

    let meeting = state
        .meetings
        .create_meeting(
            request.title,
            request.start_time,
            request.end_time,
            request.created_by,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(meeting)))
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub created_by: UserId,
}

/// Handler for POST /v1/meetings/{meetingId}/invitations
#[instrument(skip(state, request), fields(meeting_id = %meeting_id))]
pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<MeetingId>,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationToken>), ScError> {
    let invitation = state
        .meetings
        .create_invitation(meeting_id, request.created_by)
        .await?;

    Ok((StatusCode::CREATED, Json(invitation)))
}
