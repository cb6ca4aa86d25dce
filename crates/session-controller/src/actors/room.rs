//! `RoomActor` - owns one room's peers and media resources.
//!
//! One actor per active meeting/channel. All peer state lives inside the
//! actor task, so every check-then-write on room state is serialized by
//! the message loop. Relay resources are allocated and released through
//! the injected [`MediaRelay`] collaborator.
//!
//! Ownership rule: a peer and its transports, producers, and consumers
//! belong to the connection that created them. A request arriving on a
//! different connection for the same resource id is rejected, not routed.

use super::messages::{ExistingProducer, JoinResponse, LeaveOutcome, RoomMessage, RoomStats};
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::ScError;
use crate::notify::{Notifier, NotifyScope};
use crate::protocol::{Notification, ParticipantRef};
use crate::relay::{
    ConsumerDescriptor, ConsumerId, MediaKind, MediaRelay, ProducerId, TransportDescriptor,
    TransportDirection, TransportId,
};
use common::types::{ChannelId, ConnectionId, PeerId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for a room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

struct TransportSlot {
    id: TransportId,
    connected: bool,
}

struct Peer {
    peer_id: PeerId,
    participant: ParticipantRef,
    display_name: String,
    send_transport: Option<TransportSlot>,
    recv_transport: Option<TransportSlot>,
    producers: HashMap<ProducerId, MediaKind>,
    consumers: HashSet<ConsumerId>,
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    /// Spawn a room actor and return its handle plus the task handle for
    /// supervision.
    #[must_use]
    pub fn spawn(
        channel_id: ChannelId,
        cancel_token: CancellationToken,
        relay: Arc<dyn MediaRelay>,
        notifier: Arc<Notifier>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Room,
            channel_id.to_string(),
        ));

        let actor = RoomActor {
            channel_id,
            receiver,
            cancel_token: cancel_token.clone(),
            relay,
            notifier,
            mailbox: Arc::clone(&mailbox),
            peers: HashMap::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
                mailbox,
            },
            task_handle,
        )
    }

    pub async fn join(
        &self,
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
    ) -> Result<JoinResponse, ScError> {
        self.request(|respond_to| RoomMessage::Join {
            connection_id,
            participant,
            display_name,
            respond_to,
        })
        .await?
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> Result<LeaveOutcome, ScError> {
        self.request(|respond_to| RoomMessage::Leave {
            connection_id,
            respond_to,
        })
        .await?
    }

    pub async fn create_transport(
        &self,
        connection_id: ConnectionId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, ScError> {
        self.request(|respond_to| RoomMessage::CreateTransport {
            connection_id,
            direction,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            connection_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn produce(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, ScError> {
        self.request(|respond_to| RoomMessage::Produce {
            connection_id,
            transport_id,
            kind,
            rtp_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn consume(
        &self,
        connection_id: ConnectionId,
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerDescriptor, ScError> {
        self.request(|respond_to| RoomMessage::Consume {
            connection_id,
            producer_peer_id,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await?
    }

    pub async fn set_consumer_paused(
        &self,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
        paused: bool,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RoomMessage::SetConsumerPaused {
            connection_id,
            consumer_id,
            paused,
            respond_to,
        })
        .await?
    }

    pub async fn close_producer(
        &self,
        connection_id: ConnectionId,
        producer_id: ProducerId,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RoomMessage::CloseProducer {
            connection_id,
            producer_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_stats(&self) -> Result<RoomStats, ScError> {
        self.request(|respond_to| RoomMessage::GetStats { respond_to })
            .await
    }

    /// Cancel the actor (room teardown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn request<T>(
        &self,
        make_message: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(make_message(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `RoomActor` implementation.
struct RoomActor {
    channel_id: ChannelId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    relay: Arc<dyn MediaRelay>,
    notifier: Arc<Notifier>,
    mailbox: Arc<MailboxMonitor>,
    /// Peers keyed by the connection that created them.
    peers: HashMap<ConnectionId, Peer>,
}

impl RoomActor {
    #[instrument(skip_all, name = "sc.actor.room", fields(channel_id = %self.channel_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.room",
            channel_id = %self.channel_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.room",
                        channel_id = %self.channel_id,
                        "RoomActor received cancellation signal"
                    );
                    self.release_all_peers().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.room",
                                channel_id = %self.channel_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.room",
            channel_id = %self.channel_id,
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        self.mailbox.record_dequeue();

        match message {
            RoomMessage::Join {
                connection_id,
                participant,
                display_name,
                respond_to,
            } => {
                let result = self.join(connection_id, participant, display_name).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let result = self.leave(connection_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateTransport {
                connection_id,
                direction,
                respond_to,
            } => {
                let result = self.create_transport(connection_id, direction).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                connection_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .connect_transport(connection_id, transport_id, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let result = self
                    .produce(connection_id, transport_id, kind, rtp_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Consume {
                connection_id,
                producer_peer_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .consume(connection_id, producer_peer_id, producer_id, rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::SetConsumerPaused {
                connection_id,
                consumer_id,
                paused,
                respond_to,
            } => {
                let result = self
                    .set_consumer_paused(connection_id, consumer_id, paused)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CloseProducer {
                connection_id,
                producer_id,
                respond_to,
            } => {
                let result = self.close_producer(connection_id, producer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    async fn join(
        &mut self,
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
    ) -> Result<JoinResponse, ScError> {
        if self.peers.contains_key(&connection_id) {
            return Err(ScError::Conflict(
                "Connection already joined this room".to_string(),
            ));
        }

        let capabilities = self.relay.router_capabilities(&self.channel_id).await?;

        let existing_producers = self
            .peers
            .values()
            .flat_map(|peer| {
                peer.producers.iter().map(|(producer_id, kind)| ExistingProducer {
                    peer_id: peer.peer_id,
                    producer_id: *producer_id,
                    kind: *kind,
                })
            })
            .collect();

        let peer_id = PeerId::new();
        self.peers.insert(
            connection_id,
            Peer {
                peer_id,
                participant,
                display_name: display_name.clone(),
                send_transport: None,
                recv_transport: None,
                producers: HashMap::new(),
                consumers: HashSet::new(),
            },
        );

        self.notifier
            .publish(
                &NotifyScope::Room(self.channel_id.clone()),
                Notification::PeerJoined {
                    channel_id: self.channel_id.clone(),
                    peer_id,
                    display_name,
                },
            )
            .await;

        info!(
            target: "sc.actor.room",
            channel_id = %self.channel_id,
            peer_id = %peer_id,
            peer_count = self.peers.len(),
            "Peer joined"
        );

        Ok(JoinResponse {
            peer_id,
            capabilities,
            existing_producers,
            // Mandatory for every room; never negotiable
            e2ee_enabled: true,
        })
    }

    /// Remove the peer created by `connection_id` and release its relay
    /// resources. Idempotent: repeating it for a connection with no peer
    /// succeeds and changes nothing.
    async fn leave(&mut self, connection_id: ConnectionId) -> Result<LeaveOutcome, ScError> {
        let Some(peer) = self.peers.remove(&connection_id) else {
            return Ok(LeaveOutcome {
                removed: false,
                room_empty: self.peers.is_empty(),
            });
        };

        // Closing transports releases every producer and consumer they
        // carry. Relay failures here are logged, not propagated: the peer
        // is already gone from room state.
        for slot in [peer.send_transport, peer.recv_transport].into_iter().flatten() {
            if let Err(e) = self.relay.close_transport(slot.id).await {
                warn!(
                    target: "sc.actor.room",
                    channel_id = %self.channel_id,
                    transport_id = %slot.id,
                    error = %e,
                    "Failed to close transport during peer teardown"
                );
            }
        }

        self.notifier
            .publish(
                &NotifyScope::Room(self.channel_id.clone()),
                Notification::PeerLeft {
                    channel_id: self.channel_id.clone(),
                    peer_id: peer.peer_id,
                },
            )
            .await;

        info!(
            target: "sc.actor.room",
            channel_id = %self.channel_id,
            peer_id = %peer.peer_id,
            peer_count = self.peers.len(),
            "Peer left"
        );

        Ok(LeaveOutcome {
            removed: true,
            room_empty: self.peers.is_empty(),
        })
    }

    async fn create_transport(
        &mut self,
        connection_id: ConnectionId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, ScError> {
        let channel_id = self.channel_id.clone();
        let peer = self.peer_mut(connection_id)?;

        let slot = match direction {
            TransportDirection::Send => &peer.send_transport,
            TransportDirection::Recv => &peer.recv_transport,
        };
        if slot.is_some() {
            return Err(ScError::Conflict(format!(
                "Peer already has a {} transport",
                direction_name(direction)
            )));
        }

        let descriptor = self.relay.create_transport(&channel_id, direction).await?;

        let peer = self.peer_mut(connection_id)?;
        let slot = TransportSlot {
            id: descriptor.id,
            connected: false,
        };
        match direction {
            TransportDirection::Send => peer.send_transport = Some(slot),
            TransportDirection::Recv => peer.recv_transport = Some(slot),
        }

        Ok(descriptor)
    }

    async fn connect_transport(
        &mut self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), ScError> {
        self.authorize_transport(connection_id, transport_id)?;

        self.relay
            .connect_transport(transport_id, dtls_parameters)
            .await?;

        let peer = self.peer_mut(connection_id)?;
        for slot in [peer.send_transport.as_mut(), peer.recv_transport.as_mut()]
            .into_iter()
            .flatten()
        {
            if slot.id == transport_id {
                slot.connected = true;
            }
        }

        Ok(())
    }

    async fn produce(
        &mut self,
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, ScError> {
        self.authorize_transport(connection_id, transport_id)?;

        {
            let peer = self.peer(connection_id)?;
            let send = peer
                .send_transport
                .as_ref()
                .filter(|slot| slot.id == transport_id)
                .ok_or_else(|| {
                    ScError::Validation("Producers require the send transport".to_string())
                })?;
            if !send.connected {
                return Err(ScError::Validation(
                    "Transport is not connected".to_string(),
                ));
            }
        }

        let producer_id = self
            .relay
            .create_producer(transport_id, kind, rtp_parameters)
            .await?;

        let peer = self.peer_mut(connection_id)?;
        peer.producers.insert(producer_id, kind);
        let peer_id = peer.peer_id;

        self.notifier
            .publish(
                &NotifyScope::Room(self.channel_id.clone()),
                Notification::NewProducer {
                    channel_id: self.channel_id.clone(),
                    peer_id,
                    producer_id,
                    kind,
                },
            )
            .await;

        debug!(
            target: "sc.actor.room",
            channel_id = %self.channel_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            ?kind,
            "Producer created"
        );

        Ok(producer_id)
    }

    async fn consume(
        &mut self,
        connection_id: ConnectionId,
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerDescriptor, ScError> {
        // The producer must exist on the peer the caller named
        let producer_exists = self
            .peers
            .values()
            .any(|p| p.peer_id == producer_peer_id && p.producers.contains_key(&producer_id));
        if !producer_exists {
            return Err(ScError::NotFound("Producer not found".to_string()));
        }

        let recv_transport_id = {
            let peer = self.peer(connection_id)?;
            let recv = peer.recv_transport.as_ref().ok_or_else(|| {
                ScError::Validation("Consumers require a receive transport".to_string())
            })?;
            if !recv.connected {
                return Err(ScError::Validation(
                    "Transport is not connected".to_string(),
                ));
            }
            recv.id
        };

        let descriptor = self
            .relay
            .create_consumer(recv_transport_id, producer_id, rtp_capabilities)
            .await?;

        let peer = self.peer_mut(connection_id)?;
        peer.consumers.insert(descriptor.id);

        Ok(descriptor)
    }

    async fn set_consumer_paused(
        &mut self,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
        paused: bool,
    ) -> Result<(), ScError> {
        let owned = self.peer(connection_id)?.consumers.contains(&consumer_id);
        if !owned {
            return Err(self.foreign_resource_error(
                self.peers.values().any(|p| p.consumers.contains(&consumer_id)),
                "Consumer",
            ));
        }

        self.relay.set_consumer_paused(consumer_id, paused).await
    }

    async fn close_producer(
        &mut self,
        connection_id: ConnectionId,
        producer_id: ProducerId,
    ) -> Result<(), ScError> {
        let owned = self
            .peer(connection_id)?
            .producers
            .contains_key(&producer_id);
        if !owned {
            return Err(self.foreign_resource_error(
                self.peers
                    .values()
                    .any(|p| p.producers.contains_key(&producer_id)),
                "Producer",
            ));
        }

        self.relay.close_producer(producer_id).await?;

        let peer = self.peer_mut(connection_id)?;
        peer.producers.remove(&producer_id);
        let peer_id = peer.peer_id;

        self.notifier
            .publish(
                &NotifyScope::Room(self.channel_id.clone()),
                Notification::ProducerClosed {
                    channel_id: self.channel_id.clone(),
                    peer_id,
                    producer_id,
                },
            )
            .await;

        Ok(())
    }

    fn stats(&self) -> RoomStats {
        let transport_count = self
            .peers
            .values()
            .map(|p| {
                usize::from(p.send_transport.is_some()) + usize::from(p.recv_transport.is_some())
            })
            .sum();
        RoomStats {
            channel_id: self.channel_id.clone(),
            peer_count: self.peers.len(),
            transport_count,
            producer_count: self.peers.values().map(|p| p.producers.len()).sum(),
            consumer_count: self.peers.values().map(|p| p.consumers.len()).sum(),
        }
    }

    /// Release every peer's relay resources (room teardown path).
    async fn release_all_peers(&mut self) {
        let connections: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for connection_id in connections {
            let _ = self.leave(connection_id).await;
        }
    }

    fn peer(&self, connection_id: ConnectionId) -> Result<&Peer, ScError> {
        self.peers.get(&connection_id).ok_or_else(|| {
            ScError::Unauthorized("Connection has not joined this room".to_string())
        })
    }

    fn peer_mut(&mut self, connection_id: ConnectionId) -> Result<&mut Peer, ScError> {
        self.peers.get_mut(&connection_id).ok_or_else(|| {
            ScError::Unauthorized("Connection has not joined this room".to_string())
        })
    }

    /// A transport op is only valid on a transport the caller created.
    fn authorize_transport(
        &self,
        connection_id: ConnectionId,
        transport_id: TransportId,
    ) -> Result<(), ScError> {
        let peer = self.peer(connection_id)?;
        let owned = [peer.send_transport.as_ref(), peer.recv_transport.as_ref()]
            .into_iter()
            .flatten()
            .any(|slot| slot.id == transport_id);
        if owned {
            return Ok(());
        }

        let exists = self.peers.values().any(|p| {
            [p.send_transport.as_ref(), p.recv_transport.as_ref()]
                .into_iter()
                .flatten()
                .any(|slot| slot.id == transport_id)
        });
        Err(self.foreign_resource_error(exists, "Transport"))
    }

    fn foreign_resource_error(&self, exists_elsewhere: bool, resource: &str) -> ScError {
        if exists_elsewhere {
            ScError::Forbidden(format!("{resource} belongs to another peer"))
        } else {
            ScError::NotFound(format!("{resource} not found"))
        }
    }
}

fn direction_name(direction: TransportDirection) -> &'static str {
    match direction {
        TransportDirection::Send => "send",
        TransportDirection::Recv => "recv",
    }
}
