//! `RoomManagerActor` - supervisor for room actors.
//!
//! Top-level actor of the media hierarchy:
//!
//! - Singleton per SC instance
//! - Creates a `RoomActor` on the first join of a channel
//! - Tracks which room each connection joined
//! - Tears a room down when its last peer leaves
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! Explicit leave and abrupt disconnect both land in the same teardown
//! path keyed by connection identity, so the two can never diverge and
//! repeating either is a no-op.

use super::messages::{JoinResponse, LeaveOutcome, ManagerMessage, ManagerStatus, RoomStats};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::RoomActorHandle;
use crate::errors::ScError;
use crate::notify::Notifier;
use crate::protocol::ParticipantRef;
use crate::relay::MediaRelay;
use common::types::{ChannelId, ConnectionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the manager mailbox.
const MANAGER_CHANNEL_BUFFER: usize = 1000;

/// How long a cancelled room actor gets to finish its teardown.
const ROOM_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomManagerActor`.
#[derive(Clone)]
pub struct RoomManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
}

impl RoomManagerHandle {
    /// Spawn the manager actor and return a handle to it.
    #[must_use]
    pub fn new(sc_id: String, relay: Arc<dyn MediaRelay>, notifier: Arc<Notifier>) -> Self {
        let (sender, receiver) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Manager, sc_id.clone()));
        let metrics = ActorMetrics::new();

        let actor = RoomManagerActor {
            sc_id,
            receiver,
            cancel_token: cancel_token.clone(),
            relay,
            notifier,
            mailbox: Arc::clone(&mailbox),
            metrics: Arc::clone(&metrics),
            rooms: HashMap::new(),
            connections: HashMap::new(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
            metrics,
        }
    }

    /// Join a room, creating it if this is the channel's first peer.
    pub async fn join(
        &self,
        channel_id: ChannelId,
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
    ) -> Result<JoinResponse, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(ManagerMessage::Join {
                channel_id,
                connection_id,
                participant,
                display_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Release everything `connection_id` owns. Used by both explicit
    /// leave and the disconnect cleanup path; safe to call repeatedly.
    pub async fn teardown_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<LeaveOutcome, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(ManagerMessage::Teardown {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Handle to the room `connection_id` has joined, for media operations.
    pub async fn room_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<RoomActorHandle, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(ManagerMessage::RoomForConnection {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Occupancy and resource counts for one room.
    pub async fn get_room_stats(&self, channel_id: ChannelId) -> Result<RoomStats, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(ManagerMessage::GetRoomStats {
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<ManagerStatus, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(ManagerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the manager and every room under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Cancel the actor and wait for it to finish tearing down its rooms,
    /// up to `timeout`. The actor drops its receiver when `run` returns,
    /// which closes the channel.
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        self.cancel_token.cancel();
        if tokio::time::timeout(timeout, self.sender.closed())
            .await
            .is_err()
        {
            warn!(
                target: "sc.actor.manager",
                "Timed out waiting for room manager shutdown"
            );
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Aggregate occupancy counters, readable without messaging the actor.
    #[must_use]
    pub fn metrics(&self) -> Arc<ActorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Mailbox monitor for the manager's own queue.
    #[must_use]
    pub fn mailbox(&self) -> Arc<MailboxMonitor> {
        Arc::clone(&self.mailbox)
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomManagerActor` implementation.
struct RoomManagerActor {
    sc_id: String,
    receiver: mpsc::Receiver<ManagerMessage>,
    cancel_token: CancellationToken,
    relay: Arc<dyn MediaRelay>,
    notifier: Arc<Notifier>,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
    rooms: HashMap<ChannelId, ManagedRoom>,
    connections: HashMap<ConnectionId, ChannelId>,
}

impl RoomManagerActor {
    #[instrument(skip_all, name = "sc.actor.manager", fields(sc_id = %self.sc_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.manager",
            sc_id = %self.sc_id,
            "RoomManagerActor started"
        );

        loop {
            self.check_room_health();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.manager",
                        sc_id = %self.sc_id,
                        "RoomManagerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.manager",
                                sc_id = %self.sc_id,
                                "RoomManagerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.manager",
            sc_id = %self.sc_id,
            rooms_remaining = self.rooms.len(),
            "RoomManagerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ManagerMessage) {
        self.mailbox.record_dequeue();
        self.metrics.record_message_processed();

        match message {
            ManagerMessage::Join {
                channel_id,
                connection_id,
                participant,
                display_name,
                respond_to,
            } => {
                let result = self
                    .join(channel_id, connection_id, participant, display_name)
                    .await;
                let _ = respond_to.send(result);
            }

            ManagerMessage::Teardown {
                connection_id,
                respond_to,
            } => {
                let result = self.teardown(connection_id).await;
                let _ = respond_to.send(result);
            }

            ManagerMessage::RoomForConnection {
                connection_id,
                respond_to,
            } => {
                let result = self.room_for_connection(connection_id);
                let _ = respond_to.send(result);
            }

            ManagerMessage::GetRoomStats {
                channel_id,
                respond_to,
            } => {
                let result = self.get_room_stats(&channel_id).await;
                let _ = respond_to.send(result);
            }

            ManagerMessage::GetStatus { respond_to } => {
                let status = ManagerStatus {
                    room_count: self.rooms.len(),
                    connection_count: self.connections.len(),
                };
                let _ = respond_to.send(status);
            }
        }
    }

    async fn join(
        &mut self,
        channel_id: ChannelId,
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
    ) -> Result<JoinResponse, ScError> {
        // One peer context per connection
        if self.connections.contains_key(&connection_id) {
            return Err(ScError::Conflict(
                "Connection already joined a room".to_string(),
            ));
        }

        let created = if self.rooms.contains_key(&channel_id) {
            false
        } else {
            debug!(
                target: "sc.actor.manager",
                sc_id = %self.sc_id,
                channel_id = %channel_id,
                "Creating room actor"
            );
            let (handle, task_handle) = RoomActorHandle::spawn(
                channel_id.clone(),
                self.cancel_token.child_token(),
                Arc::clone(&self.relay),
                Arc::clone(&self.notifier),
            );
            self.rooms
                .insert(channel_id.clone(), ManagedRoom { handle, task_handle });
            self.metrics.room_created();
            true
        };

        let room = self
            .rooms
            .get(&channel_id)
            .ok_or_else(|| ScError::Internal("Room vanished during join".to_string()))?;

        match room.handle.join(connection_id, participant, display_name).await {
            Ok(response) => {
                self.connections.insert(connection_id, channel_id.clone());
                self.metrics.connection_joined();
                info!(
                    target: "sc.actor.manager",
                    sc_id = %self.sc_id,
                    channel_id = %channel_id,
                    room_created = created,
                    total_rooms = self.rooms.len(),
                    "Connection joined room"
                );
                Ok(response)
            }
            Err(e) => {
                // A room created for a failed first join holds no peers
                if created {
                    self.remove_room(&channel_id);
                }
                Err(e)
            }
        }
    }

    /// The single teardown path for leave and disconnect.
    async fn teardown(&mut self, connection_id: ConnectionId) -> Result<LeaveOutcome, ScError> {
        let Some(channel_id) = self.connections.remove(&connection_id) else {
            // Nothing to release: prior leave or disconnect already ran
            return Ok(LeaveOutcome {
                removed: false,
                room_empty: false,
            });
        };
        self.metrics.connection_released();

        let Some(room) = self.rooms.get(&channel_id) else {
            return Ok(LeaveOutcome {
                removed: false,
                room_empty: false,
            });
        };

        let outcome = room.handle.leave(connection_id).await?;

        if outcome.room_empty {
            info!(
                target: "sc.actor.manager",
                sc_id = %self.sc_id,
                channel_id = %channel_id,
                "Last peer left, tearing down room"
            );
            self.remove_room(&channel_id);
        }

        Ok(outcome)
    }

    fn room_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<RoomActorHandle, ScError> {
        let channel_id = self.connections.get(&connection_id).ok_or_else(|| {
            ScError::Unauthorized("Connection has not joined a room".to_string())
        })?;
        self.rooms
            .get(channel_id)
            .map(|room| room.handle.clone())
            .ok_or_else(|| ScError::NotFound("Room not found".to_string()))
    }

    async fn get_room_stats(&self, channel_id: &ChannelId) -> Result<RoomStats, ScError> {
        match self.rooms.get(channel_id) {
            Some(room) => room.handle.get_stats().await,
            None => Err(ScError::NotFound("Room not found".to_string())),
        }
    }

    /// Cancel a room actor and reap its task in the background so the
    /// message loop is not blocked on teardown.
    fn remove_room(&mut self, channel_id: &ChannelId) {
        let Some(managed) = self.rooms.remove(channel_id) else {
            return;
        };
        self.metrics.room_removed();
        managed.handle.cancel();

        let channel_owned = channel_id.clone();
        let sc_id = self.sc_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_TEARDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.manager",
                        sc_id = %sc_id,
                        channel_id = %channel_owned,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.manager",
                        sc_id = %sc_id,
                        channel_id = %channel_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.manager",
                        sc_id = %sc_id,
                        channel_id = %channel_owned,
                        "Room actor teardown timed out"
                    );
                }
            }
        });
    }

    /// Reap room actors whose tasks finished unexpectedly.
    fn check_room_health(&mut self) {
        let dead: Vec<ChannelId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(channel_id, _)| channel_id.clone())
            .collect();

        let mut reaped = false;
        for channel_id in dead {
            warn!(
                target: "sc.actor.manager",
                sc_id = %self.sc_id,
                channel_id = %channel_id,
                "Room actor task finished unexpectedly"
            );
            self.rooms.remove(&channel_id);
            self.connections.retain(|_, c| *c != channel_id);
            reaped = true;
        }

        if reaped {
            self.metrics
                .set_occupancy(self.rooms.len(), self.connections.len());
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sc.actor.manager",
            sc_id = %self.sc_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        for (_, managed) in &self.rooms {
            managed.handle.cancel();
        }

        for (channel_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_TEARDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.manager",
                        sc_id = %self.sc_id,
                        channel_id = %channel_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.manager",
                        sc_id = %self.sc_id,
                        channel_id = %channel_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.manager",
                        sc_id = %self.sc_id,
                        channel_id = %channel_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        self.connections.clear();
        self.metrics.set_occupancy(0, 0);

        info!(
            target: "sc.actor.manager",
            sc_id = %self.sc_id,
            "Graceful shutdown complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::relay::local::LocalRelay;
    use common::types::{DeviceId, UserId};

    fn test_manager(sc_id: &str) -> RoomManagerHandle {
        RoomManagerHandle::new(
            sc_id.to_string(),
            Arc::new(LocalRelay::new()),
            Arc::new(Notifier::new()),
        )
    }

    fn user() -> ParticipantRef {
        ParticipantRef::User {
            user_id: UserId::new(),
            device_id: DeviceId::new("d1"),
        }
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let manager = test_manager("sc-test-001");

        manager
            .join(
                ChannelId::new("c1"),
                ConnectionId::new(),
                user(),
                "Alice".to_string(),
            )
            .await
            .unwrap();

        let stats = manager.get_room_stats(ChannelId::new("c1")).await.unwrap();
        assert_eq!(stats.peer_count, 1);

        manager.cancel();
    }

    #[tokio::test]
    async fn test_connection_cannot_join_two_rooms() {
        let manager = test_manager("sc-test-002");
        let connection_id = ConnectionId::new();

        manager
            .join(ChannelId::new("c1"), connection_id, user(), "A".to_string())
            .await
            .unwrap();
        let second = manager
            .join(ChannelId::new("c2"), connection_id, user(), "A".to_string())
            .await;
        assert!(matches!(second, Err(ScError::Conflict(_))));

        manager.cancel();
    }

    #[tokio::test]
    async fn test_room_torn_down_when_last_peer_leaves() {
        let manager = test_manager("sc-test-003");
        let channel = ChannelId::new("c1");
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();

        manager
            .join(channel.clone(), conn_a, user(), "A".to_string())
            .await
            .unwrap();
        manager
            .join(channel.clone(), conn_b, user(), "B".to_string())
            .await
            .unwrap();

        let outcome = manager.teardown_connection(conn_a).await.unwrap();
        assert!(outcome.removed);
        assert!(!outcome.room_empty);
        assert!(manager.get_room_stats(channel.clone()).await.is_ok());

        let outcome = manager.teardown_connection(conn_b).await.unwrap();
        assert!(outcome.room_empty);

        let stats = manager.get_room_stats(channel).await;
        assert!(matches!(stats, Err(ScError::NotFound(_))));

        manager.cancel();
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_across_paths() {
        let manager = test_manager("sc-test-004");
        let connection_id = ConnectionId::new();

        manager
            .join(
                ChannelId::new("c1"),
                connection_id,
                user(),
                "A".to_string(),
            )
            .await
            .unwrap();

        // Explicit leave, then the disconnect cleanup for the same
        // connection: second call is a successful no-op
        let first = manager.teardown_connection(connection_id).await.unwrap();
        assert!(first.removed);

        let second = manager.teardown_connection(connection_id).await.unwrap();
        assert!(!second.removed);

        // Never-joined connections are also a no-op
        let third = manager
            .teardown_connection(ConnectionId::new())
            .await
            .unwrap();
        assert!(!third.removed);

        manager.cancel();
    }

    #[tokio::test]
    async fn test_rejoin_after_leave_recreates_room() {
        let manager = test_manager("sc-test-005");
        let channel = ChannelId::new("c1");
        let connection_id = ConnectionId::new();

        manager
            .join(channel.clone(), connection_id, user(), "A".to_string())
            .await
            .unwrap();
        manager.teardown_connection(connection_id).await.unwrap();

        // Same connection may join again after teardown
        let rejoin = manager
            .join(channel.clone(), connection_id, user(), "A".to_string())
            .await;
        assert!(rejoin.is_ok());

        manager.cancel();
    }

    #[tokio::test]
    async fn test_status_counts_rooms_and_connections() {
        let manager = test_manager("sc-test-006");

        manager
            .join(
                ChannelId::new("c1"),
                ConnectionId::new(),
                user(),
                "A".to_string(),
            )
            .await
            .unwrap();
        manager
            .join(
                ChannelId::new("c2"),
                ConnectionId::new(),
                user(),
                "B".to_string(),
            )
            .await
            .unwrap();

        let status = manager.get_status().await.unwrap();
        assert_eq!(status.room_count, 2);
        assert_eq!(status.connection_count, 2);

        manager.cancel();
    }

    #[tokio::test]
    async fn test_metrics_track_room_and_connection_occupancy() {
        let manager = test_manager("sc-test-008");
        let metrics = manager.metrics();
        let connection_id = ConnectionId::new();

        manager
            .join(ChannelId::new("c1"), connection_id, user(), "A".to_string())
            .await
            .unwrap();
        assert_eq!(metrics.active_rooms(), 1);
        assert_eq!(metrics.active_connections(), 1);

        manager.teardown_connection(connection_id).await.unwrap();
        assert_eq!(metrics.active_rooms(), 0);
        assert_eq!(metrics.active_connections(), 0);
        assert!(metrics.total_messages_processed() >= 2);

        manager.cancel();
    }

    #[tokio::test]
    async fn test_room_for_connection_requires_join() {
        let manager = test_manager("sc-test-007");

        let result = manager.room_for_connection(ConnectionId::new()).await;
        assert!(matches!(result, Err(ScError::Unauthorized(_))));

        manager.cancel();
    }
}
