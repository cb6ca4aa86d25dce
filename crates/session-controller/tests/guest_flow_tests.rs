//! Guest session integration tests for Session Controller.
//!
//! Tests the invitation and guest lifecycle endpoints:
//!
//! - `GET /v1/meetings/external/join/{token}` - Resolve invitation
//! - `POST /v1/meetings/external/register` - Register guest session
//! - `GET /v1/meetings/external/keys/{sessionId}` - Guest's own key material
//! - `PATCH /v1/meetings/external/session/{sessionId}` - Update display name
//! - `DELETE /v1/meetings/external/session/{sessionId}` - End the session

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use sc_test_utils::TestScServer;
use serde_json::{json, Value};

// ============================================================================
// Test Helpers
// ============================================================================

fn key_payload(fill: u8) -> String {
    STANDARD.encode([fill; 33])
}

/// Create a meeting starting at the given offset from now and mint an
/// invitation token for it. Returns (meeting_id, token).
async fn meeting_with_invitation(
    client: &reqwest::Client,
    base_url: &str,
    start_offset: Duration,
) -> Result<(String, String)> {
    let start = Utc::now() + start_offset;
    let response = client
        .post(format!("{base_url}/v1/meetings"))
        .json(&json!({
            "title": "Quarterly sync",
            "start_time": start,
            "end_time": start + Duration::hours(1),
            "created_by": uuid::Uuid::new_v4(),
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let meeting: Value = response.json().await?;
    let meeting_id = meeting["id"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{base_url}/v1/meetings/{meeting_id}/invitations"))
        .json(&json!({ "created_by": uuid::Uuid::new_v4() }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let invitation: Value = response.json().await?;
    let token = invitation["token"].as_str().unwrap().to_string();

    Ok((meeting_id, token))
}

async fn register(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    display_name: &str,
) -> Result<reqwest::Response> {
    Ok(client
        .post(format!("{base_url}/v1/meetings/external/register"))
        .json(&json!({
            "invitation_token": token,
            "display_name": display_name,
        }))
        .send()
        .await?)
}

// ============================================================================
// Invitation resolution
// ============================================================================

#[tokio::test]
async fn test_join_with_valid_token_returns_meeting() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (meeting_id, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(10)).await?;

    let response = client
        .get(format!("{}/v1/meetings/external/join/{token}", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["meeting"]["id"], meeting_id.as_str());
    assert_eq!(body["meeting"]["title"], "Quarterly sync");

    Ok(())
}

#[tokio::test]
async fn test_join_with_unknown_token_is_not_found() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{}/v1/meetings/external/join/deadbeef",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_join_outside_invitation_window_is_forbidden() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    // Meeting starts in 3 hours; the 1-hour window has not opened yet
    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::hours(3)).await?;

    let response = client
        .get(format!("{}/v1/meetings/external/join/{token}", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    Ok(())
}

#[tokio::test]
async fn test_window_is_evaluated_per_call_not_cached() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    // Meeting started 2 hours ago; the window closed an hour ago. The
    // token resolved fine while open but must fail now.
    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::hours(-2)).await?;

    let response = client
        .get(format!("{}/v1/meetings/external/join/{token}", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    // Registration is rejected for the same reason
    let response = register(&client, &server.url(), &token, "Late Guest").await?;
    assert_eq!(response.status(), 403);

    Ok(())
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_returns_descriptor_without_token() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (meeting_id, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;

    let response = register(&client, &server.url(), &token, "Guest Gina").await?;
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await?;
    assert_eq!(body["meeting_id"], meeting_id.as_str());
    assert_eq!(body["display_name"], "Guest Gina");
    assert_eq!(body["admission"], "not_requested");
    assert_eq!(body["temporary_keys"], true);
    // The bearer credential must never be echoed back
    assert!(body.get("token").is_none());

    Ok(())
}

#[tokio::test]
async fn test_register_with_invalid_token_is_forbidden() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = register(&client, &server.url(), "not-a-token", "Guest").await?;
    assert_eq!(response.status(), 403);

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_bad_display_names() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;

    let response = register(&client, &server.url(), &token, "X").await?;
    assert_eq!(response.status(), 400);

    let response = register(&client, &server.url(), &token, &"n".repeat(101)).await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn test_reregistration_invalidates_previous_session() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;

    let first: Value = register(&client, &server.url(), &token, "First Device")
        .await?
        .json()
        .await?;
    let second: Value = register(&client, &server.url(), &token, "Second Device")
        .await?
        .json()
        .await?;
    assert_ne!(first["session_id"], second["session_id"]);

    // The first session is gone; its key material is unreadable
    let first_id = first["session_id"].as_str().unwrap();
    let response = client
        .get(format!(
            "{}/v1/meetings/external/keys/{first_id}?token={token}",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_register_with_client_keys_stores_them() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;

    let response = client
        .post(format!("{}/v1/meetings/external/register", server.url()))
        .json(&json!({
            "invitation_token": token,
            "display_name": "Keyed Guest",
            "identity_key_public": key_payload(1),
            "registration_id": 42,
            "signed_pre_key": { "id": 7, "data": key_payload(2), "signature": "sig" },
            "pre_keys": [
                { "id": 1, "data": key_payload(3) },
                { "id": 2, "data": key_payload(4) },
            ],
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await?;
    assert_eq!(body["temporary_keys"], false);
    let session_id = body["session_id"].as_str().unwrap();

    let summary: Value = client
        .get(format!(
            "{}/v1/meetings/external/keys/{session_id}?token={token}",
            server.url()
        ))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(summary["identity_key"]["registration_id"], 42);
    assert_eq!(summary["signed_pre_key"]["id"], 7);
    assert_eq!(summary["one_time_pre_key_count"], 2);

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_wrong_length_key_payload() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;

    let response = client
        .post(format!("{}/v1/meetings/external/register", server.url()))
        .json(&json!({
            "invitation_token": token,
            "display_name": "Guest",
            "identity_key_public": key_payload(1),
            "signed_pre_key": { "id": 1, "data": STANDARD.encode([0u8; 32]), "signature": "s" },
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    // Nothing was registered
    let response = register(&client, &server.url(), &token, "Guest").await?;
    assert_eq!(response.status(), 201);

    Ok(())
}

// ============================================================================
// Session maintenance
// ============================================================================

#[tokio::test]
async fn test_guest_keys_require_matching_token() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;
    let body: Value = register(&client, &server.url(), &token, "Guest")
        .await?
        .json()
        .await?;
    let session_id = body["session_id"].as_str().unwrap();

    let response = client
        .get(format!(
            "{}/v1/meetings/external/keys/{session_id}?token=wrong",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    Ok(())
}

#[tokio::test]
async fn test_update_and_delete_session() -> Result<()> {
    let server = TestScServer::spawn().await?;
    let client = reqwest::Client::new();

    let (_, token) =
        meeting_with_invitation(&client, &server.url(), Duration::minutes(5)).await?;
    let body: Value = register(&client, &server.url(), &token, "Old Name")
        .await?
        .json()
        .await?;
    let session_id = body["session_id"].as_str().unwrap();

    let response = client
        .patch(format!(
            "{}/v1/meetings/external/session/{session_id}",
            server.url()
        ))
        .json(&json!({ "display_name": "New Name" }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await?;
    assert_eq!(updated["display_name"], "New Name");

    let response = client
        .delete(format!(
            "{}/v1/meetings/external/session/{session_id}",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    // Session and its keys are gone
    let response = client
        .get(format!(
            "{}/v1/meetings/external/keys/{session_id}?token={token}",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}
