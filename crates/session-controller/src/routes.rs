//! HTTP routes for Session Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::RoomManagerHandle;
use crate::admission::AdmissionController;
use crate::config::Config;
use crate::handlers;
use crate::notify::Notifier;
use crate::relay::{local::LocalRelay, MediaRelay};
use crate::stores::{
    GuestSessionRegistry, KeyBundleStore, KeybundleExchangeGateway, MeetingStore,
};
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Meetings and invitation tokens.
    pub meetings: Arc<MeetingStore>,

    /// Guest session registry.
    pub sessions: Arc<GuestSessionRegistry>,

    /// Per-device key material.
    pub key_bundles: Arc<KeyBundleStore>,

    /// Key-bundle fetch and sender-key delivery gateway.
    pub exchange: Arc<KeybundleExchangeGateway>,

    /// Admission request/decision coordination.
    pub admission: Arc<AdmissionController>,

    /// Broadcast fan-out for signaling notifications.
    pub notifier: Arc<Notifier>,

    /// Media room supervision.
    pub rooms: RoomManagerHandle,
}

impl AppState {
    /// Wire up all stores and actors from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let notifier = Arc::new(Notifier::new());
        let sessions = Arc::new(GuestSessionRegistry::new());
        let key_bundles = Arc::new(KeyBundleStore::new());
        let exchange = Arc::new(KeybundleExchangeGateway::new(
            Arc::clone(&key_bundles),
            Arc::clone(&notifier),
            config.prekey_fetch_limit,
            config.prekey_fetch_window_seconds,
        ));
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&sessions),
            Arc::clone(&notifier),
            config.admission_cooldown_seconds,
        ));
        let relay: Arc<dyn MediaRelay> = Arc::new(LocalRelay::new());
        let rooms = RoomManagerHandle::new(config.sc_id.clone(), relay, Arc::clone(&notifier));

        Self {
            config,
            meetings: Arc::new(MeetingStore::new()),
            sessions,
            key_bundles,
            exchange,
            admission,
            notifier,
            rooms,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Health check endpoint
/// - Meeting, guest session, admission, and key exchange endpoints
/// - TraceLayer for request logging
/// - Configurable request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    // All routes are public; guest endpoints authenticate via invitation
    // token, the rest are expected to sit behind the platform's gateway.
    let routes = Router::new()
        // Health check endpoint
        .route("/v1/health", get(handlers::health_check))
        // Meeting management
        .route("/v1/meetings", post(handlers::create_meeting))
        .route(
            "/v1/meetings/:meeting_id/invitations",
            post(handlers::create_invitation),
        )
        // Guest session lifecycle
        .route(
            "/v1/meetings/external/join/:token",
            get(handlers::join_with_token),
        )
        .route(
            "/v1/meetings/external/register",
            post(handlers::register_guest),
        )
        .route(
            "/v1/meetings/external/keys/:session_id",
            get(handlers::get_guest_keys),
        )
        .route(
            "/v1/meetings/external/session/:session_id",
            patch(handlers::update_session).delete(handlers::delete_session),
        )
        // Admission flow
        .route(
            "/v1/meetings/:meeting_id/external/:session_id/request-admission",
            post(handlers::request_admission),
        )
        .route(
            "/v1/meetings/:meeting_id/external/:session_id/admit",
            post(handlers::admit_guest),
        )
        .route(
            "/v1/meetings/:meeting_id/external/:session_id/decline",
            post(handlers::decline_guest),
        )
        // Key-bundle exchange
        .route(
            "/v1/meetings/external/:session_id/participant/:user_id/:device_id/keys",
            get(handlers::get_participant_keybundle),
        )
        .route(
            "/v1/meetings/:meeting_id/external/:session_id/keys",
            get(handlers::get_guest_keybundle),
        )
        .route(
            "/v1/meetings/external/session/:session_id/consume-prekey",
            post(handlers::consume_pre_key),
        )
        .route(
            "/v1/meetings/external/session/:session_id/prekeys",
            post(handlers::replenish_pre_keys).get(handlers::count_pre_keys),
        )
        // Participant device key material
        .route(
            "/v1/users/:user_id/devices/:device_id/keys",
            post(handlers::upload_device_keys).delete(handlers::delete_device_keys),
        )
        // Sender keys
        .route(
            "/v1/channels/:channel_id/devices/:device_id/sender-key",
            put(handlers::store_sender_key),
        )
        .route(
            "/v1/channels/:channel_id/devices/:device_id/sender-key/rotate",
            post(handlers::rotate_sender_key),
        )
        .route(
            "/v1/sender-keys/distribute",
            post(handlers::distribute_sender_key),
        )
        .route(
            "/v1/sender-keys/drain",
            post(handlers::drain_queued_sender_keys),
        )
        .with_state(state);

    // Apply global middleware layers
    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    routes
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        // Required for Axum's State extractor.
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }
}
