//! Real-time channel protocol.
//!
//! Transport-independent request/reply/notification types. Every client
//! request carries a correlation id and resolves to exactly one reply,
//! either a success payload or a typed error. The server additionally
//! pushes unsolicited notifications scoped to a room or to one guest's
//! isolated channel.

use crate::errors::ScError;
use crate::relay::{ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId};
use common::types::{ChannelId, DeviceId, MeetingId, PeerId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity under which a connection joins a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticipantRef {
    User { user_id: UserId, device_id: DeviceId },
    Guest { session_id: SessionId },
}

/// A request received over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub correlation_id: Uuid,
    #[serde(flatten)]
    pub method: RequestMethod,
}

/// Operations a connection may invoke on its room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload")]
pub enum RequestMethod {
    #[serde(rename = "join")]
    Join {
        channel_id: ChannelId,
        participant: ParticipantRef,
    },
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "create-transport")]
    CreateTransport { direction: TransportDirection },
    #[serde(rename = "connect-transport")]
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: Value,
    },
    #[serde(rename = "produce")]
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    },
    #[serde(rename = "consume")]
    Consume {
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    },
    #[serde(rename = "resume-consumer")]
    ResumeConsumer { consumer_id: ConsumerId },
    #[serde(rename = "pause-consumer")]
    PauseConsumer { consumer_id: ConsumerId },
    #[serde(rename = "close-producer")]
    CloseProducer { producer_id: ProducerId },
    #[serde(rename = "get-room-stats")]
    GetRoomStats { channel_id: ChannelId },
}

/// Typed error carried in a failed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: i32,
    pub message: String,
}

impl From<&ScError> for ReplyError {
    fn from(error: &ScError) -> Self {
        Self {
            code: error.error_code(),
            message: error.client_message(),
        }
    }
}

/// The single reply resolving one [`ClientRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub correlation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    #[must_use]
    pub fn ok(correlation_id: Uuid, result: Value) -> Self {
        Self {
            correlation_id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn err(correlation_id: Uuid, error: &ScError) -> Self {
        Self {
            correlation_id,
            result: None,
            error: Some(ReplyError::from(error)),
        }
    }
}

/// Unsolicited server push.
///
/// Room-scoped events use kebab-case names; admission events use
/// snake_case, matching the channel contract clients already speak.
/// Broadcast variants go to every subscriber of a room; the
/// `AdmissionGranted`/`AdmissionDenied` pair is delivered only on the
/// guest's isolated channel so other guests cannot observe the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Notification {
    #[serde(rename = "peer-joined")]
    PeerJoined {
        channel_id: ChannelId,
        peer_id: PeerId,
        display_name: String,
    },
    #[serde(rename = "peer-left")]
    PeerLeft {
        channel_id: ChannelId,
        peer_id: PeerId,
    },
    #[serde(rename = "new-producer")]
    NewProducer {
        channel_id: ChannelId,
        peer_id: PeerId,
        producer_id: ProducerId,
        kind: MediaKind,
    },
    #[serde(rename = "producer-closed")]
    ProducerClosed {
        channel_id: ChannelId,
        peer_id: PeerId,
        producer_id: ProducerId,
    },
    #[serde(rename = "guest_admission_request")]
    GuestAdmissionRequest {
        session_id: SessionId,
        meeting_id: MeetingId,
        display_name: String,
    },
    #[serde(rename = "guest_admitted")]
    GuestAdmitted {
        session_id: SessionId,
        meeting_id: MeetingId,
        admitted_by: UserId,
    },
    #[serde(rename = "guest_declined")]
    GuestDeclined {
        session_id: SessionId,
        meeting_id: MeetingId,
    },
    #[serde(rename = "admission_granted")]
    AdmissionGranted {
        session_id: SessionId,
        meeting_id: MeetingId,
    },
    #[serde(rename = "admission_denied")]
    AdmissionDenied {
        session_id: SessionId,
        meeting_id: MeetingId,
    },
    #[serde(rename = "sender_key_distribution")]
    SenderKeyDistribution {
        message_id: Uuid,
        group_id: ChannelId,
        sender_id: String,
        encrypted_payload: String,
    },
}
