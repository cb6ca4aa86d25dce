//! Message types exchanged with the room actors.
//!
//! Every request variant carries a `respond_to` oneshot; the actor sends
//! exactly one reply per message.

use crate::errors::ScError;
use crate::protocol::ParticipantRef;
use crate::relay::{
    ConsumerDescriptor, ConsumerId, MediaKind, ProducerId, TransportDescriptor,
    TransportDirection, TransportId,
};
use common::types::{ChannelId, ConnectionId, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A producer already live in the room, advertised to a joining peer so it
/// can start consuming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingProducer {
    pub peer_id: PeerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Result of a successful join.
///
/// `e2ee_enabled` is always true: end-to-end encryption is mandatory for
/// this relay and there is no mode where it is off. The flag is carried
/// explicitly so clients never have to assume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub peer_id: PeerId,
    pub capabilities: Value,
    pub existing_producers: Vec<ExistingProducer>,
    pub e2ee_enabled: bool,
}

/// Result of a leave or disconnect teardown.
#[derive(Debug, Clone, Copy)]
pub struct LeaveOutcome {
    /// False when the connection had no peer (idempotent repeat).
    pub removed: bool,
    /// True when the departing peer was the room's last member.
    pub room_empty: bool,
}

/// Read-only snapshot of room occupancy and resource counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStats {
    pub channel_id: ChannelId,
    pub peer_count: usize,
    pub transport_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}

/// Aggregate status of the room manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub room_count: usize,
    pub connection_count: usize,
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
        respond_to: oneshot::Sender<Result<JoinResponse, ScError>>,
    },
    Leave {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<LeaveOutcome, ScError>>,
    },
    CreateTransport {
        connection_id: ConnectionId,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportDescriptor, ScError>>,
    },
    ConnectTransport {
        connection_id: ConnectionId,
        transport_id: TransportId,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
    Produce {
        connection_id: ConnectionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        respond_to: oneshot::Sender<Result<ProducerId, ScError>>,
    },
    Consume {
        connection_id: ConnectionId,
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
        respond_to: oneshot::Sender<Result<ConsumerDescriptor, ScError>>,
    },
    SetConsumerPaused {
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
        paused: bool,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
    CloseProducer {
        connection_id: ConnectionId,
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
    GetStats {
        respond_to: oneshot::Sender<RoomStats>,
    },
}

/// Messages handled by the `RoomManagerActor`.
#[derive(Debug)]
pub enum ManagerMessage {
    Join {
        channel_id: ChannelId,
        connection_id: ConnectionId,
        participant: ParticipantRef,
        display_name: String,
        respond_to: oneshot::Sender<Result<JoinResponse, ScError>>,
    },
    /// Single teardown path for both explicit leave and abrupt disconnect,
    /// keyed by connection identity. Idempotent.
    Teardown {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<LeaveOutcome, ScError>>,
    },
    RoomForConnection {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<super::room::RoomActorHandle, ScError>>,
    },
    GetRoomStats {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<RoomStats, ScError>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<ManagerStatus>,
    },
}
