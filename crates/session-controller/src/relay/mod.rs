//! Media relay abstraction.
//!
//! The signaling core manages rooms and peers on top of a pre-existing
//! relay primitive that does the actual RTP routing. The relay is an
//! external collaborator behind the [`MediaRelay`] trait; [`local::LocalRelay`]
//! is the in-process implementation used by the self-hosted deployment.

pub mod local;

use crate::errors::ScError;
use async_trait::async_trait;
use common::types::ChannelId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a relay transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportId(pub Uuid);

impl TransportId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a media producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerId(pub Uuid);

impl ProducerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProducerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a media consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction of a transport relative to the peer that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// Media kind carried by a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Transport-layer parameters returned to the client so it can establish
/// the media path. Contents are relay-specific and passed through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub id: TransportId,
    pub direction: TransportDirection,
    pub ice_parameters: Value,
    pub dtls_parameters: Value,
}

/// A consumer created on the relay, ready for the client to attach to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// External collaborator providing the actual RTP routing.
///
/// The signaling core calls into this to allocate and release media
/// resources; all room/peer bookkeeping and authorization stays on the
/// signaling side.
#[async_trait]
pub trait MediaRelay: Send + Sync {
    /// Media capabilities of the router backing `channel`.
    async fn router_capabilities(&self, channel: &ChannelId) -> Result<Value, ScError>;

    async fn create_transport(
        &self,
        channel: &ChannelId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, ScError>;

    /// Exchange transport-layer security parameters. A transport must be
    /// connected before it may carry a producer or consumer.
    async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), ScError>;

    async fn create_producer(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerId, ScError>;

    async fn create_consumer(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerDescriptor, ScError>;

    async fn set_consumer_paused(
        &self,
        consumer_id: ConsumerId,
        paused: bool,
    ) -> Result<(), ScError>;

    async fn close_producer(&self, producer_id: ProducerId) -> Result<(), ScError>;

    /// Closing a transport releases every producer and consumer it carries.
    async fn close_transport(&self, transport_id: TransportId) -> Result<(), ScError>;
}
