//! Guest session handlers.
//!
//! Implements the external (unauthenticated) guest flow:
//!
//! - `GET /v1/meetings/external/join/{token}` - Resolve an invitation token
//! - `POST /v1/meetings/external/register` - Register a guest session
//! - `GET /v1/meetings/external/keys/{sessionId}?token=...` - Guest's own key material
//! - `PATCH /v1/meetings/external/session/{sessionId}` - Update display name
//! - `DELETE /v1/meetings/external/session/{sessionId}` - End the session
//!
//! # Security
//!
//! Invitation windows are re-evaluated on every call. Key-material reads
//! require the registering token. Guests that upload no public keys get a
//! server-generated placeholder bundle so key exchange still works, at
//! reduced security; the session is flagged `temporary_keys` so other
//! parties can tell.

use crate::errors::ScError;
use crate::models::{
    AdmissionState, GuestSession, Meeting, OneTimePreKey, PUBLIC_KEY_LENGTH_BYTES,
};
use crate::routes::AppState;
use crate::stores::exchange::GUEST_DEVICE_ID;
use crate::stores::key_bundles::{validate_public_key_payload, KeyMaterialSummary};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use common::types::{DeviceId, MeetingId, SessionId, UserId};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Number of placeholder one-time pre-keys generated for keyless guests.
const PLACEHOLDER_PRE_KEY_COUNT: u32 = 4;

/// Session descriptor returned to clients. The registering token is never
/// echoed back.
#[derive(Debug, Serialize, Deserialize)]
pub struct GuestSessionDescriptor {
    pub session_id: SessionId,
    pub meeting_id: MeetingId,
    pub display_name: String,
    pub admission: AdmissionState,
    pub admitted_by: Option<UserId>,
    pub temporary_keys: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<GuestSession> for GuestSessionDescriptor {
    fn from(session: GuestSession) -> Self {
        Self {
            session_id: session.session_id,
            meeting_id: session.meeting_id,
            display_name: session.display_name,
            admission: session.admission,
            admitted_by: session.admitted_by,
            temporary_keys: session.temporary_keys,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinTokenResponse {
    pub meeting: Meeting,
}

/// Handler for GET /v1/meetings/external/join/{token}
///
/// Resolves an invitation token to its meeting. 404 for unknown tokens,
/// 403 outside the validity window.
#[instrument(skip(state, token))]
pub async fn join_with_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<JoinTokenResponse>, ScError> {
    let meeting = state
        .meetings
        .validate_invitation_token(&token, state.config.invitation_window_seconds)
        .await?;

    Ok(Json(JoinTokenResponse { meeting }))
}

#[derive(Debug, Deserialize)]
pub struct SignedPreKeyUpload {
    pub id: u32,
    pub data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterGuestRequest {
    pub invitation_token: String,
    pub display_name: String,
    pub identity_key_public: Option<String>,
    pub registration_id: Option<u32>,
    pub signed_pre_key: Option<SignedPreKeyUpload>,
    pub pre_keys: Option<Vec<OneTimePreKey>>,
}

/// Handler for POST /v1/meetings/external/register
///
/// Creates a guest session for the token's meeting. A prior session
/// registered with the same token is invalidated: the last registration
/// wins. 403 on an invalid or out-of-window token.
#[instrument(skip(state, request))]
pub async fn register_guest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterGuestRequest>,
) -> Result<(StatusCode, Json<GuestSessionDescriptor>), ScError> {
    let meeting = state
        .meetings
        .validate_invitation_token(
            &request.invitation_token,
            state.config.invitation_window_seconds,
        )
        .await
        .map_err(|e| match e {
            // Registration does not disclose whether a token ever existed
            ScError::NotFound(_) => {
                ScError::Forbidden("Invalid invitation token".to_string())
            }
            other => other,
        })?;

    // A guest either supplies a full bundle or none of it
    let has_keys = request.identity_key_public.is_some();
    if has_keys && request.signed_pre_key.is_none() {
        return Err(ScError::Validation(
            "signed_pre_key is required when identity_key_public is supplied".to_string(),
        ));
    }

    // Validate every payload before any state is touched
    if let Some(identity) = &request.identity_key_public {
        validate_public_key_payload(identity)?;
    }
    if let Some(signed) = &request.signed_pre_key {
        validate_public_key_payload(&signed.data)?;
    }
    if let Some(pre_keys) = &request.pre_keys {
        for pre_key in pre_keys {
            validate_public_key_payload(&pre_key.data)?;
        }
    }

    let session = state
        .sessions
        .create_session(
            meeting.id,
            request.invitation_token.clone(),
            request.display_name.clone(),
            !has_keys,
        )
        .await?;

    let owner = crate::models::KeyOwner::Guest(session.session_id);
    let device = DeviceId::new(GUEST_DEVICE_ID);

    if has_keys {
        let identity = request
            .identity_key_public
            .ok_or_else(|| ScError::Internal("identity key vanished".to_string()))?;
        let signed = request
            .signed_pre_key
            .ok_or_else(|| ScError::Internal("signed pre-key vanished".to_string()))?;

        state
            .key_bundles
            .store_identity(
                owner,
                device.clone(),
                identity,
                request.registration_id.unwrap_or_default(),
            )
            .await?;
        state
            .key_bundles
            .store_signed_pre_key(owner, device.clone(), signed.id, signed.data, signed.signature)
            .await?;
        if let Some(pre_keys) = request.pre_keys {
            if !pre_keys.is_empty() {
                state.key_bundles.store_pre_keys(owner, device, pre_keys).await?;
            }
        }
    } else {
        generate_placeholder_bundle(&state, owner, device).await?;
    }

    info!(
        target: "sc.handlers.guest_sessions",
        session_id = %session.session_id,
        meeting_id = %meeting.id,
        temporary_keys = !has_keys,
        "Guest registered"
    );

    Ok((StatusCode::CREATED, Json(session.into())))
}

#[derive(Debug, Deserialize)]
pub struct GuestKeysQuery {
    pub token: String,
}

/// Handler for GET /v1/meetings/external/keys/{sessionId}?token=...
///
/// Returns the guest's own public key material. 403 when the token does
/// not match the session or the session has expired.
#[instrument(skip(state, query), fields(session_id = %session_id))]
pub async fn get_guest_keys(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<GuestKeysQuery>,
) -> Result<Json<KeyMaterialSummary>, ScError> {
    let session = state
        .sessions
        .authorize_session(session_id, &query.token, Utc::now())
        .await?;

    let summary = state
        .key_bundles
        .get_material_summary(
            crate::models::KeyOwner::Guest(session.session_id),
            &DeviceId::new(GUEST_DEVICE_ID),
        )
        .await?;

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub display_name: String,
}

/// Handler for PATCH /v1/meetings/external/session/{sessionId}
#[instrument(skip(state, request), fields(session_id = %session_id))]
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<UpdateSessionRequest>,
) -> Result<Json<GuestSessionDescriptor>, ScError> {
    let session = state
        .sessions
        .update_display_name(session_id, request.display_name)
        .await?;

    Ok(Json(session.into()))
}

/// Handler for DELETE /v1/meetings/external/session/{sessionId}
///
/// Ends the session and removes its key material.
#[instrument(skip(state), fields(session_id = %session_id))]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, ScError> {
    state.sessions.delete_session(session_id).await?;
    state
        .key_bundles
        .delete_all_keys(
            crate::models::KeyOwner::Guest(session_id),
            &DeviceId::new(GUEST_DEVICE_ID),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Generate and store a placeholder bundle for a guest that uploaded no
/// keys. The material is random, server-minted, and flagged as temporary.
async fn generate_placeholder_bundle(
    state: &AppState,
    owner: crate::models::KeyOwner,
    device: DeviceId,
) -> Result<(), ScError> {
    let rng = SystemRandom::new();

    state
        .key_bundles
        .store_identity(owner, device.clone(), random_key_payload(&rng)?, 0)
        .await?;
    state
        .key_bundles
        .store_signed_pre_key(
            owner,
            device.clone(),
            1,
            random_key_payload(&rng)?,
            String::new(),
        )
        .await?;

    let mut pre_keys = Vec::with_capacity(PLACEHOLDER_PRE_KEY_COUNT as usize);
    for id in 1..=PLACEHOLDER_PRE_KEY_COUNT {
        pre_keys.push(OneTimePreKey {
            id,
            data: random_key_payload(&rng)?,
        });
    }
    state.key_bundles.store_pre_keys(owner, device, pre_keys).await?;

    Ok(())
}

fn random_key_payload(rng: &SystemRandom) -> Result<String, ScError> {
    let mut bytes = [0u8; PUBLIC_KEY_LENGTH_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| ScError::Internal("Failed to generate placeholder key".to_string()))?;
    Ok(BASE64.encode(bytes))
}
