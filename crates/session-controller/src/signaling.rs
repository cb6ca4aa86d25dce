//! Real-time channel dispatcher.
//!
//! One `SignalingConnection` per client connection, independent of the
//! transport carrying it. Each incoming [`ClientRequest`] resolves to
//! exactly one [`Reply`] tagged with the request's correlation id.
//! Disconnection runs the same teardown as an explicit leave, so a
//! connection that vanishes mid-call leaves no peer state behind.

use crate::actors::RoomManagerHandle;
use crate::errors::ScError;
use crate::models::AdmissionState;
use crate::protocol::{ClientRequest, ParticipantRef, Reply, RequestMethod};
use crate::stores::GuestSessionRegistry;
use chrono::Utc;
use common::types::{ChannelId, ConnectionId};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Server-side state for one real-time connection.
pub struct SignalingConnection {
    connection_id: ConnectionId,
    rooms: RoomManagerHandle,
    sessions: Arc<GuestSessionRegistry>,
}

impl SignalingConnection {
    #[must_use]
    pub fn new(rooms: RoomManagerHandle, sessions: Arc<GuestSessionRegistry>) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            rooms,
            sessions,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Resolve one request to its single reply.
    #[instrument(skip_all, fields(connection_id = %self.connection_id, correlation_id = %request.correlation_id))]
    pub async fn handle_request(&self, request: ClientRequest) -> Reply {
        let correlation_id = request.correlation_id;
        match self.dispatch(request.method).await {
            Ok(result) => Reply::ok(correlation_id, result),
            Err(e) => {
                debug!(
                    target: "sc.signaling",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Request failed"
                );
                Reply::err(correlation_id, &e)
            }
        }
    }

    /// Cleanup for an abruptly closed connection.
    ///
    /// Delegates to the same teardown an explicit leave uses; calling it
    /// after a leave (or twice) is a no-op.
    pub async fn handle_disconnect(&self) {
        match self.rooms.teardown_connection(self.connection_id).await {
            Ok(outcome) => {
                debug!(
                    target: "sc.signaling",
                    connection_id = %self.connection_id,
                    removed = outcome.removed,
                    "Disconnect cleanup complete"
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "sc.signaling",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Disconnect cleanup failed"
                );
            }
        }
    }

    async fn dispatch(&self, method: RequestMethod) -> Result<Value, ScError> {
        match method {
            RequestMethod::Join {
                channel_id,
                participant,
            } => {
                let display_name = self.resolve_join_identity(&channel_id, &participant).await?;
                let response = self
                    .rooms
                    .join(channel_id, self.connection_id, participant, display_name)
                    .await?;
                to_value(&response)
            }

            RequestMethod::Leave => {
                let outcome = self.rooms.teardown_connection(self.connection_id).await?;
                Ok(json!({ "left": outcome.removed }))
            }

            RequestMethod::CreateTransport { direction } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                let descriptor = room.create_transport(self.connection_id, direction).await?;
                to_value(&descriptor)
            }

            RequestMethod::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                room.connect_transport(self.connection_id, transport_id, dtls_parameters)
                    .await?;
                Ok(json!({ "connected": true }))
            }

            RequestMethod::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                let producer_id = room
                    .produce(self.connection_id, transport_id, kind, rtp_parameters)
                    .await?;
                Ok(json!({ "producer_id": producer_id }))
            }

            RequestMethod::Consume {
                producer_peer_id,
                producer_id,
                rtp_capabilities,
            } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                let descriptor = room
                    .consume(
                        self.connection_id,
                        producer_peer_id,
                        producer_id,
                        rtp_capabilities,
                    )
                    .await?;
                to_value(&descriptor)
            }

            RequestMethod::ResumeConsumer { consumer_id } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                room.set_consumer_paused(self.connection_id, consumer_id, false)
                    .await?;
                Ok(json!({ "resumed": true }))
            }

            RequestMethod::PauseConsumer { consumer_id } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                room.set_consumer_paused(self.connection_id, consumer_id, true)
                    .await?;
                Ok(json!({ "paused": true }))
            }

            RequestMethod::CloseProducer { producer_id } => {
                let room = self.rooms.room_for_connection(self.connection_id).await?;
                room.close_producer(self.connection_id, producer_id).await?;
                Ok(json!({ "closed": true }))
            }

            RequestMethod::GetRoomStats { channel_id } => {
                let stats = self.rooms.get_room_stats(channel_id).await?;
                to_value(&stats)
            }
        }
    }

    /// Authorize a join and resolve the peer's display name.
    ///
    /// Guests must hold a live session that was admitted to the meeting
    /// backing this channel. Authenticated users pass through; their
    /// identity was established by the connection's auth layer.
    async fn resolve_join_identity(
        &self,
        channel_id: &ChannelId,
        participant: &ParticipantRef,
    ) -> Result<String, ScError> {
        match participant {
            ParticipantRef::User { user_id, .. } => Ok(user_id.to_string()),
            ParticipantRef::Guest { session_id } => {
                let session = self.sessions.get_session(*session_id).await?;
                if session.is_expired(Utc::now()) {
                    return Err(ScError::Forbidden("Guest session expired".to_string()));
                }
                if ChannelId::from(session.meeting_id) != *channel_id {
                    return Err(ScError::Forbidden(
                        "Session belongs to a different meeting".to_string(),
                    ));
                }
                if session.admission != AdmissionState::Admitted {
                    return Err(ScError::Forbidden(
                        "Guest has not been admitted".to_string(),
                    ));
                }
                Ok(session.display_name)
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ScError> {
    serde_json::to_value(value)
        .map_err(|e| ScError::Internal(format!("response serialization failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::relay::local::LocalRelay;
    use common::types::{MeetingId, SessionId, UserId};
    use uuid::Uuid;

    struct Fixture {
        rooms: RoomManagerHandle,
        sessions: Arc<GuestSessionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let sessions = Arc::new(GuestSessionRegistry::new());
            let rooms = RoomManagerHandle::new(
                "sc-test".to_string(),
                Arc::new(LocalRelay::new()),
                Arc::new(Notifier::new()),
            );
            Self { rooms, sessions }
        }

        fn connection(&self) -> SignalingConnection {
            SignalingConnection::new(self.rooms.clone(), Arc::clone(&self.sessions))
        }
    }

    fn request(method: RequestMethod) -> ClientRequest {
        ClientRequest {
            correlation_id: Uuid::new_v4(),
            method,
        }
    }

    fn user_join(channel: &str) -> RequestMethod {
        RequestMethod::Join {
            channel_id: ChannelId::new(channel),
            participant: ParticipantRef::User {
                user_id: UserId::new(),
                device_id: common::types::DeviceId::new("d1"),
            },
        }
    }

    #[tokio::test]
    async fn test_reply_echoes_correlation_id() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        let req = request(user_join("c1"));
        let correlation_id = req.correlation_id;
        let reply = conn.handle_request(req).await;

        assert_eq!(reply.correlation_id, correlation_id);
        assert!(reply.error.is_none());
        let result = reply.result.unwrap();
        assert_eq!(result["e2ee_enabled"], true);
    }

    #[tokio::test]
    async fn test_media_op_before_join_is_error_reply() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        let reply = conn
            .handle_request(request(RequestMethod::Leave))
            .await;
        // Leave before join succeeds as a no-op
        assert!(reply.error.is_none());

        let reply = conn
            .handle_request(request(RequestMethod::CreateTransport {
                direction: crate::relay::TransportDirection::Send,
            }))
            .await;
        let error = reply.error.unwrap();
        assert_eq!(error.code, ScError::Unauthorized(String::new()).error_code());
    }

    #[tokio::test]
    async fn test_unadmitted_guest_cannot_join() {
        let fixture = Fixture::new();
        let meeting_id = MeetingId::new();
        let session = fixture
            .sessions
            .create_session(meeting_id, "tok".to_string(), "Guest".to_string(), false)
            .await
            .unwrap();

        let conn = fixture.connection();
        let reply = conn
            .handle_request(request(RequestMethod::Join {
                channel_id: ChannelId::from(meeting_id),
                participant: ParticipantRef::Guest {
                    session_id: session.session_id,
                },
            }))
            .await;

        let error = reply.error.unwrap();
        assert_eq!(error.code, ScError::Forbidden(String::new()).error_code());
    }

    #[tokio::test]
    async fn test_admitted_guest_joins_with_session_display_name() {
        let fixture = Fixture::new();
        let meeting_id = MeetingId::new();
        let session = fixture
            .sessions
            .create_session(meeting_id, "tok".to_string(), "Guest Gina".to_string(), false)
            .await
            .unwrap();
        fixture
            .sessions
            .begin_admission_request(session.session_id)
            .await
            .unwrap();
        fixture
            .sessions
            .decide_admission(session.session_id, UserId::new(), true)
            .await
            .unwrap();

        let conn = fixture.connection();
        let reply = conn
            .handle_request(request(RequestMethod::Join {
                channel_id: ChannelId::from(meeting_id),
                participant: ParticipantRef::Guest {
                    session_id: session.session_id,
                },
            }))
            .await;
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn test_guest_cannot_join_other_meetings_channel() {
        let fixture = Fixture::new();
        let session = fixture
            .sessions
            .create_session(MeetingId::new(), "tok".to_string(), "Guest".to_string(), false)
            .await
            .unwrap();

        let conn = fixture.connection();
        let reply = conn
            .handle_request(request(RequestMethod::Join {
                channel_id: ChannelId::from(MeetingId::new()),
                participant: ParticipantRef::Guest {
                    session_id: session.session_id,
                },
            }))
            .await;
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_guest_session_is_not_found() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        let reply = conn
            .handle_request(request(RequestMethod::Join {
                channel_id: ChannelId::new("c1"),
                participant: ParticipantRef::Guest {
                    session_id: SessionId::new(),
                },
            }))
            .await;

        let error = reply.error.unwrap();
        assert_eq!(error.code, ScError::NotFound(String::new()).error_code());
    }

    #[tokio::test]
    async fn test_leave_twice_succeeds_both_times() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        conn.handle_request(request(user_join("c1"))).await;

        let first = conn.handle_request(request(RequestMethod::Leave)).await;
        assert!(first.error.is_none());
        assert_eq!(first.result.unwrap()["left"], true);

        let second = conn.handle_request(request(RequestMethod::Leave)).await;
        assert!(second.error.is_none());
        assert_eq!(second.result.unwrap()["left"], false);
    }

    #[tokio::test]
    async fn test_disconnect_after_leave_is_noop() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        conn.handle_request(request(user_join("c1"))).await;
        conn.handle_request(request(RequestMethod::Leave)).await;

        // Must not error or disturb state
        conn.handle_disconnect().await;

        let status = fixture.rooms.get_status().await.unwrap();
        assert_eq!(status.connection_count, 0);
    }
}
