//! Key-bundle and sender-key exchange handlers.
//!
//! Guest-facing bundle fetches (rate limited per fetcher):
//!
//! - `GET /v1/meetings/external/{sessionId}/participant/{userId}/{deviceId}/keys`
//! - `GET /v1/meetings/{meetingId}/external/{sessionId}/keys`
//!
//! Guest pre-key pool management:
//!
//! - `POST /v1/meetings/external/session/{sessionId}/consume-prekey`
//! - `POST /v1/meetings/external/session/{sessionId}/prekeys`
//! - `GET /v1/meetings/external/session/{sessionId}/prekeys`
//!
//! Participant device material and sender keys:
//!
//! - `POST /v1/users/{userId}/devices/{deviceId}/keys`
//! - `DELETE /v1/users/{userId}/devices/{deviceId}/keys`
//! - `PUT /v1/channels/{channelId}/devices/{deviceId}/sender-key`
//! - `POST /v1/channels/{channelId}/devices/{deviceId}/sender-key/rotate`
//! - `POST /v1/sender-keys/distribute`
//! - `POST /v1/sender-keys/drain`

use crate::errors::ScError;
use crate::models::{KeyOwner, OneTimePreKey, PreKeyBundle, SenderKey};
use crate::routes::AppState;
use crate::stores::exchange::{DeliveryOutcome, GUEST_DEVICE_ID};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use common::types::{ChannelId, DeviceId, MeetingId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// A fetching guest session must exist, be unexpired, and belong to the
/// meeting whose keys it is asking for.
async fn authorize_fetcher(
    state: &AppState,
    session_id: SessionId,
    meeting_id: Option<MeetingId>,
) -> Result<MeetingId, ScError> {
    let session = state.sessions.get_session(session_id).await?;
    if session.is_expired(Utc::now()) {
        return Err(ScError::Forbidden("Guest session has expired".to_string()));
    }
    if let Some(meeting_id) = meeting_id {
        if session.meeting_id != meeting_id {
            return Err(ScError::NotFound(
                "Guest session not found for this meeting".to_string(),
            ));
        }
    }
    Ok(session.meeting_id)
}

/// Handler for GET /v1/meetings/external/{sessionId}/participant/{userId}/{deviceId}/keys
///
/// A guest fetches a participant's bundle. One-time pre-key consumption
/// and the rolling fetch limit both happen inside the gateway.
#[instrument(skip(state), fields(session_id = %session_id, user_id = %user_id))]
pub async fn get_participant_keybundle(
    State(state): State<Arc<AppState>>,
    Path((session_id, user_id, device_id)): Path<(SessionId, UserId, DeviceId)>,
) -> Result<Json<PreKeyBundle>, ScError> {
    let meeting_id = authorize_fetcher(&state, session_id, None).await?;

    let bundle = state
        .exchange
        .get_participant_keybundle(meeting_id, user_id, device_id)
        .await?;

    Ok(Json(bundle))
}

/// Handler for GET /v1/meetings/{meetingId}/external/{sessionId}/keys
///
/// A participant fetches a guest's bundle, e.g. before admitting them.
#[instrument(skip(state), fields(meeting_id = %meeting_id, session_id = %session_id))]
pub async fn get_guest_keybundle(
    State(state): State<Arc<AppState>>,
    Path((meeting_id, session_id)): Path<(MeetingId, SessionId)>,
) -> Result<Json<PreKeyBundle>, ScError> {
    authorize_fetcher(&state, session_id, Some(meeting_id)).await?;

    let bundle = state.exchange.get_guest_keybundle(session_id).await?;

    Ok(Json(bundle))
}

#[derive(Debug, Deserialize)]
pub struct ConsumePreKeyRequest {
    pub pre_key_id: u32,
}

/// Handler for POST /v1/meetings/external/session/{sessionId}/consume-prekey
///
/// Explicitly consume one of a guest's one-time pre-keys by id. 404 once
/// the id has already been issued.
#[instrument(skip(state, request), fields(session_id = %session_id))]
pub async fn consume_pre_key(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<ConsumePreKeyRequest>,
) -> Result<Json<OneTimePreKey>, ScError> {
    authorize_fetcher(&state, session_id, None).await?;

    let pre_key = state
        .key_bundles
        .take_pre_key(
            KeyOwner::Guest(session_id),
            &DeviceId::new(GUEST_DEVICE_ID),
            request.pre_key_id,
        )
        .await?;

    Ok(Json(pre_key))
}

#[derive(Debug, Deserialize)]
pub struct ReplenishPreKeysRequest {
    pub pre_keys: Vec<OneTimePreKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreKeyCountResponse {
    pub count: usize,
}

/// Handler for POST /v1/meetings/external/session/{sessionId}/prekeys
///
/// Upload replacement one-time pre-keys. The whole batch is validated
/// before any key is stored.
#[instrument(skip(state, request), fields(session_id = %session_id))]
pub async fn replenish_pre_keys(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<ReplenishPreKeysRequest>,
) -> Result<Json<PreKeyCountResponse>, ScError> {
    authorize_fetcher(&state, session_id, None).await?;

    let count = state
        .key_bundles
        .store_pre_keys(
            KeyOwner::Guest(session_id),
            DeviceId::new(GUEST_DEVICE_ID),
            request.pre_keys,
        )
        .await?;

    Ok(Json(PreKeyCountResponse { count }))
}

/// Handler for GET /v1/meetings/external/session/{sessionId}/prekeys
#[instrument(skip(state), fields(session_id = %session_id))]
pub async fn count_pre_keys(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<PreKeyCountResponse>, ScError> {
    authorize_fetcher(&state, session_id, None).await?;

    let count = state
        .key_bundles
        .count_pre_keys(KeyOwner::Guest(session_id), &DeviceId::new(GUEST_DEVICE_ID))
        .await;

    Ok(Json(PreKeyCountResponse { count }))
}

#[derive(Debug, Deserialize)]
pub struct SignedPreKeyUpload {
    pub id: u32,
    pub data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadDeviceKeysRequest {
    pub identity_key_public: String,
    pub registration_id: u32,
    pub signed_pre_key: SignedPreKeyUpload,
    #[serde(default)]
    pub pre_keys: Vec<OneTimePreKey>,
}

/// Handler for POST /v1/users/{userId}/devices/{deviceId}/keys
///
/// Upload or refresh a participant device's key material. Re-uploading
/// the identity key rotates it in place.
#[instrument(skip(state, request), fields(user_id = %user_id, device_id = %device_id))]
pub async fn upload_device_keys(
    State(state): State<Arc<AppState>>,
    Path((user_id, device_id)): Path<(UserId, DeviceId)>,
    Json(request): Json<UploadDeviceKeysRequest>,
) -> Result<StatusCode, ScError> {
    let owner = KeyOwner::User(user_id);

    crate::stores::key_bundles::validate_public_key_payload(&request.identity_key_public)?;

    state
        .key_bundles
        .store_identity(
            owner,
            device_id.clone(),
            request.identity_key_public,
            request.registration_id,
        )
        .await?;
    state
        .key_bundles
        .store_signed_pre_key(
            owner,
            device_id.clone(),
            request.signed_pre_key.id,
            request.signed_pre_key.data,
            request.signed_pre_key.signature,
        )
        .await?;
    if !request.pre_keys.is_empty() {
        state
            .key_bundles
            .store_pre_keys(owner, device_id, request.pre_keys)
            .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for DELETE /v1/users/{userId}/devices/{deviceId}/keys
#[instrument(skip(state), fields(user_id = %user_id, device_id = %device_id))]
pub async fn delete_device_keys(
    State(state): State<Arc<AppState>>,
    Path((user_id, device_id)): Path<(UserId, DeviceId)>,
) -> Result<StatusCode, ScError> {
    state
        .key_bundles
        .delete_all_keys(KeyOwner::User(user_id), &device_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SenderKeyRequest {
    pub key_material: String,
}

/// Handler for PUT /v1/channels/{channelId}/devices/{deviceId}/sender-key
///
/// Create-if-absent. When a key already exists for (channel, device) the
/// existing one is returned unchanged; use rotate to replace it.
#[instrument(skip(state, request), fields(channel_id = %channel_id, device_id = %device_id))]
pub async fn store_sender_key(
    State(state): State<Arc<AppState>>,
    Path((channel_id, device_id)): Path<(ChannelId, DeviceId)>,
    Json(request): Json<SenderKeyRequest>,
) -> Result<Json<SenderKey>, ScError> {
    let key = state
        .key_bundles
        .store_sender_key(channel_id, device_id, request.key_material)
        .await?;

    Ok(Json(key))
}

/// Handler for POST /v1/channels/{channelId}/devices/{deviceId}/sender-key/rotate
#[instrument(skip(state, request), fields(channel_id = %channel_id, device_id = %device_id))]
pub async fn rotate_sender_key(
    State(state): State<Arc<AppState>>,
    Path((channel_id, device_id)): Path<(ChannelId, DeviceId)>,
    Json(request): Json<SenderKeyRequest>,
) -> Result<Json<SenderKey>, ScError> {
    let key = state
        .key_bundles
        .rotate_sender_key(channel_id, device_id, request.key_material)
        .await?;

    Ok(Json(key))
}

#[derive(Debug, Deserialize)]
pub struct DistributeSenderKeyRequest {
    pub group_id: ChannelId,
    pub sender_id: String,
    pub recipient_id: String,
    pub recipient_device: DeviceId,
    pub encrypted_payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DistributeSenderKeyResponse {
    pub delivered: bool,
}

/// Handler for POST /v1/sender-keys/distribute
///
/// Pushes a sender-key distribution message to the recipient device.
/// Offline recipients get it parked in a per-device FIFO queue instead.
#[instrument(skip(state, request), fields(recipient = %request.recipient_id))]
pub async fn distribute_sender_key(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DistributeSenderKeyRequest>,
) -> Result<Json<DistributeSenderKeyResponse>, ScError> {
    let outcome = state
        .exchange
        .distribute_sender_key(
            request.group_id,
            request.sender_id,
            request.recipient_id,
            request.recipient_device,
            request.encrypted_payload,
        )
        .await?;

    Ok(Json(DistributeSenderKeyResponse {
        delivered: outcome == DeliveryOutcome::Delivered,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DrainQueuedRequest {
    pub recipient_id: String,
    pub recipient_device: DeviceId,
}

/// Handler for POST /v1/sender-keys/drain
///
/// Removes and returns everything queued for (recipient, device), in
/// arrival order. A second drain returns an empty list.
#[instrument(skip(state, request), fields(recipient = %request.recipient_id))]
pub async fn drain_queued_sender_keys(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DrainQueuedRequest>,
) -> Result<Json<Vec<crate::models::QueuedSenderKey>>, ScError> {
    let messages = state
        .exchange
        .drain_queued_sender_keys(&request.recipient_id, &request.recipient_device)
        .await;

    Ok(Json(messages))
}
