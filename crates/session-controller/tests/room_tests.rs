//! Media room integration tests for Session Controller.
//!
//! Drives the signaling dispatcher end to end: join, transport setup,
//! produce/consume, ownership enforcement, and room teardown, with the
//! in-process relay standing in for the media plane.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{ChannelId, DeviceId, UserId};
use serde_json::{json, Value};
use session_controller::actors::RoomManagerHandle;
use session_controller::notify::{Notifier, NotifyScope};
use session_controller::protocol::{
    ClientRequest, Notification, ParticipantRef, Reply, RequestMethod,
};
use session_controller::relay::{local::LocalRelay, TransportDirection, MediaKind};
use session_controller::signaling::SignalingConnection;
use session_controller::stores::GuestSessionRegistry;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

struct Fixture {
    rooms: RoomManagerHandle,
    sessions: Arc<GuestSessionRegistry>,
    notifier: Arc<Notifier>,
}

impl Fixture {
    fn new() -> Self {
        let notifier = Arc::new(Notifier::new());
        let sessions = Arc::new(GuestSessionRegistry::new());
        let rooms = RoomManagerHandle::new(
            "sc-test".to_string(),
            Arc::new(LocalRelay::new()),
            Arc::clone(&notifier),
        );
        Self {
            rooms,
            sessions,
            notifier,
        }
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
            device_id: DeviceId::new("d1"),
        },
    }
}

fn result_of(reply: Reply) -> Value {
    assert!(reply.error.is_none(), "unexpected error: {:?}", reply.error);
    reply.result.unwrap()
}

/// Join and bring up a connected send transport, returning its id.
async fn connected_send_transport(conn: &SignalingConnection, channel: &str) -> Value {
    result_of(conn.handle_request(request(user_join(channel))).await);

    let transport = result_of(
        conn.handle_request(request(RequestMethod::CreateTransport {
            direction: TransportDirection::Send,
        }))
        .await,
    );
    let transport_id = transport["id"].clone();

    result_of(
        conn.handle_request(request(RequestMethod::ConnectTransport {
            transport_id: serde_json::from_value(transport_id.clone()).unwrap(),
            dtls_parameters: json!({ "role": "client" }),
        }))
        .await,
    );

    transport_id
}

// ============================================================================
// Join and teardown
// ============================================================================

#[tokio::test]
async fn test_join_reports_e2ee_and_existing_producers() {
    let fixture = Fixture::new();

    let first = fixture.connection();
    let transport_id = connected_send_transport(&first, "room-1").await;
    let produced = result_of(
        first
            .handle_request(request(RequestMethod::Produce {
                transport_id: serde_json::from_value(transport_id).unwrap(),
                kind: MediaKind::Video,
                rtp_parameters: json!({}),
            }))
            .await,
    );
    let producer_id = produced["producer_id"].clone();

    let second = fixture.connection();
    let joined = result_of(second.handle_request(request(user_join("room-1"))).await);

    assert_eq!(joined["e2ee_enabled"], true);
    let existing = joined["existing_producers"].as_array().unwrap();
    assert_eq!(existing.len(), 1);
    assert_eq!(existing[0]["producer_id"], producer_id);
    assert_eq!(existing[0]["kind"], "video");
}

#[tokio::test]
async fn test_room_is_torn_down_when_last_peer_leaves() {
    let fixture = Fixture::new();
    let channel = ChannelId::new("room-1");

    let first = fixture.connection();
    let second = fixture.connection();
    result_of(first.handle_request(request(user_join("room-1"))).await);
    result_of(second.handle_request(request(user_join("room-1"))).await);

    result_of(first.handle_request(request(RequestMethod::Leave)).await);

    // One peer remains; the room is still queryable
    let stats = fixture.rooms.get_room_stats(channel.clone()).await.unwrap();
    assert_eq!(stats.peer_count, 1);

    result_of(second.handle_request(request(RequestMethod::Leave)).await);

    // Last peer gone: the room no longer exists
    let result = fixture.rooms.get_room_stats(channel).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_disconnect_tears_down_like_leave() {
    let fixture = Fixture::new();
    let channel = ChannelId::new("room-1");

    let conn = fixture.connection();
    result_of(conn.handle_request(request(user_join("room-1"))).await);

    conn.handle_disconnect().await;

    assert!(fixture.rooms.get_room_stats(channel).await.is_err());
    let status = fixture.rooms.get_status().await.unwrap();
    assert_eq!(status.room_count, 0);
    assert_eq!(status.connection_count, 0);
}

#[tokio::test]
async fn test_peer_lifecycle_is_broadcast_to_room() {
    let fixture = Fixture::new();
    let scope = NotifyScope::Room(ChannelId::new("room-1"));

    let first = fixture.connection();
    result_of(first.handle_request(request(user_join("room-1"))).await);

    let mut room_rx = fixture.notifier.subscribe(scope).await;

    let second = fixture.connection();
    result_of(second.handle_request(request(user_join("room-1"))).await);

    assert!(matches!(
        room_rx.recv().await.unwrap(),
        Notification::PeerJoined { .. }
    ));

    result_of(second.handle_request(request(RequestMethod::Leave)).await);
    assert!(matches!(
        room_rx.recv().await.unwrap(),
        Notification::PeerLeft { .. }
    ));
}

// ============================================================================
// Media operations
// ============================================================================

#[tokio::test]
async fn test_produce_requires_connected_send_transport() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    result_of(conn.handle_request(request(user_join("room-1"))).await);

    let transport = result_of(
        conn.handle_request(request(RequestMethod::CreateTransport {
            direction: TransportDirection::Send,
        }))
        .await,
    );

    // Not yet connected
    let reply = conn
        .handle_request(request(RequestMethod::Produce {
            transport_id: serde_json::from_value(transport["id"].clone()).unwrap(),
            kind: MediaKind::Audio,
            rtp_parameters: json!({}),
        }))
        .await;
    let error = reply.error.unwrap();
    assert_eq!(error.code, 1);
}

#[tokio::test]
async fn test_full_produce_consume_flow() {
    let fixture = Fixture::new();

    let producer_conn = fixture.connection();
    let transport_id = connected_send_transport(&producer_conn, "room-1").await;
    let produced = result_of(
        producer_conn
            .handle_request(request(RequestMethod::Produce {
                transport_id: serde_json::from_value(transport_id).unwrap(),
                kind: MediaKind::Audio,
                rtp_parameters: json!({ "codec": "opus" }),
            }))
            .await,
    );

    let consumer_conn = fixture.connection();
    let joined = result_of(
        consumer_conn
            .handle_request(request(user_join("room-1")))
            .await,
    );
    let producer_peer_id = joined["existing_producers"][0]["peer_id"].clone();

    let recv = result_of(
        consumer_conn
            .handle_request(request(RequestMethod::CreateTransport {
                direction: TransportDirection::Recv,
            }))
            .await,
    );
    result_of(
        consumer_conn
            .handle_request(request(RequestMethod::ConnectTransport {
                transport_id: serde_json::from_value(recv["id"].clone()).unwrap(),
                dtls_parameters: json!({}),
            }))
            .await,
    );

    let consumed = result_of(
        consumer_conn
            .handle_request(request(RequestMethod::Consume {
                producer_peer_id: serde_json::from_value(producer_peer_id).unwrap(),
                producer_id: serde_json::from_value(produced["producer_id"].clone()).unwrap(),
                rtp_capabilities: json!({}),
            }))
            .await,
    );
    assert_eq!(consumed["kind"], "audio");
    assert_eq!(consumed["producer_id"], produced["producer_id"]);

    // Consumers start paused and are resumed explicitly
    let resumed = result_of(
        consumer_conn
            .handle_request(request(RequestMethod::ResumeConsumer {
                consumer_id: serde_json::from_value(consumed["id"].clone()).unwrap(),
            }))
            .await,
    );
    assert_eq!(resumed["resumed"], true);
}

#[tokio::test]
async fn test_closing_another_peers_producer_is_forbidden() {
    let fixture = Fixture::new();

    let owner = fixture.connection();
    let transport_id = connected_send_transport(&owner, "room-1").await;
    let produced = result_of(
        owner
            .handle_request(request(RequestMethod::Produce {
                transport_id: serde_json::from_value(transport_id).unwrap(),
                kind: MediaKind::Audio,
                rtp_parameters: json!({}),
            }))
            .await,
    );

    let intruder = fixture.connection();
    result_of(intruder.handle_request(request(user_join("room-1"))).await);

    let reply = intruder
        .handle_request(request(RequestMethod::CloseProducer {
            producer_id: serde_json::from_value(produced["producer_id"].clone()).unwrap(),
        }))
        .await;
    let error = reply.error.unwrap();
    assert_eq!(error.code, 3);

    // The owner may close it
    let closed = result_of(
        owner
            .handle_request(request(RequestMethod::CloseProducer {
                producer_id: serde_json::from_value(produced["producer_id"].clone()).unwrap(),
            }))
            .await,
    );
    assert_eq!(closed["closed"], true);
}

#[tokio::test]
async fn test_room_stats_track_resources() {
    let fixture = Fixture::new();

    let conn = fixture.connection();
    let transport_id = connected_send_transport(&conn, "room-1").await;
    result_of(
        conn.handle_request(request(RequestMethod::Produce {
            transport_id: serde_json::from_value(transport_id).unwrap(),
            kind: MediaKind::Video,
            rtp_parameters: json!({}),
        }))
        .await,
    );

    let stats = result_of(
        conn.handle_request(request(RequestMethod::GetRoomStats {
            channel_id: ChannelId::new("room-1"),
        }))
        .await,
    );
    assert_eq!(stats["peer_count"], 1);
    assert_eq!(stats["transport_count"], 1);
    assert_eq!(stats["producer_count"], 1);
    assert_eq!(stats["consumer_count"], 0);
}

#[tokio::test]
async fn test_stats_for_unknown_room_is_error() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    result_of(conn.handle_request(request(user_join("room-1"))).await);

    let reply = conn
        .handle_request(request(RequestMethod::GetRoomStats {
            channel_id: ChannelId::new("no-such-room"),
        }))
        .await;
    let error = reply.error.unwrap();
    assert_eq!(error.code, 4);
}

#[tokio::test]
async fn test_rooms_are_isolated_per_channel() {
    let fixture = Fixture::new();

    let a = fixture.connection();
    let b = fixture.connection();
    result_of(a.handle_request(request(user_join("room-a"))).await);
    result_of(b.handle_request(request(user_join("room-b"))).await);

    let stats_a = fixture
        .rooms
        .get_room_stats(ChannelId::new("room-a"))
        .await
        .unwrap();
    assert_eq!(stats_a.peer_count, 1);

    let status = fixture.rooms.get_status().await.unwrap();
    assert_eq!(status.room_count, 2);
    assert_eq!(status.connection_count, 2);
}
