//! In-process media relay.
//!
//! Tracks transports, producers, and consumers in memory and hands out
//! the transport-layer parameters clients need to establish a media path.
//! Every room it serves is E2EE: the relay only ever sees encrypted
//! frames, so no plaintext-capable mode exists.

use super::{
    ConsumerDescriptor, ConsumerId, MediaKind, MediaRelay, ProducerId, TransportDescriptor,
    TransportDirection, TransportId,
};
use crate::errors::ScError;
use async_trait::async_trait;
use common::types::ChannelId;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

struct TransportState {
    channel: ChannelId,
    connected: bool,
}

struct ProducerState {
    transport_id: TransportId,
    kind: MediaKind,
}

struct ConsumerState {
    transport_id: TransportId,
}

struct Inner {
    transports: HashMap<TransportId, TransportState>,
    producers: HashMap<ProducerId, ProducerState>,
    consumers: HashMap<ConsumerId, ConsumerState>,
}

/// Self-hosted relay backing live meetings.
pub struct LocalRelay {
    inner: Mutex<Inner>,
}

impl LocalRelay {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                transports: HashMap::new(),
                producers: HashMap::new(),
                consumers: HashMap::new(),
            }),
        }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaRelay for LocalRelay {
    async fn router_capabilities(&self, _channel: &ChannelId) -> Result<Value, ScError> {
        // Opus and VP8 are the negotiated baseline for all rooms
        Ok(json!({
            "codecs": [
                {
                    "kind": "audio",
                    "mimeType": "audio/opus",
                    "clockRate": 48000,
                    "channels": 2
                },
                {
                    "kind": "video",
                    "mimeType": "video/VP8",
                    "clockRate": 90000
                }
            ],
            "headerExtensions": []
        }))
    }

    async fn create_transport(
        &self,
        channel: &ChannelId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, ScError> {
        let id = TransportId::new();
        let mut inner = self.inner.lock().await;
        inner.transports.insert(
            id,
            TransportState {
                channel: channel.clone(),
                connected: false,
            },
        );

        tracing::debug!(
            target: "sc.relay",
            transport_id = %id,
            channel = %channel,
            ?direction,
            "Transport created"
        );

        Ok(TransportDescriptor {
            id,
            direction,
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().to_string(),
                "password": Uuid::new_v4().to_string(),
                "iceLite": true
            }),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": []
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: TransportId,
        _dtls_parameters: Value,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        let transport = inner
            .transports
            .get_mut(&transport_id)
            .ok_or_else(|| ScError::NotFound("Transport not found".to_string()))?;
        transport.connected = true;
        Ok(())
    }

    async fn create_producer(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        _rtp_parameters: Value,
    ) -> Result<ProducerId, ScError> {
        let mut inner = self.inner.lock().await;
        let transport = inner
            .transports
            .get(&transport_id)
            .ok_or_else(|| ScError::NotFound("Transport not found".to_string()))?;
        if !transport.connected {
            return Err(ScError::Validation(
                "Transport is not connected".to_string(),
            ));
        }

        let id = ProducerId::new();
        inner.producers.insert(id, ProducerState { transport_id, kind });
        Ok(id)
    }

    async fn create_consumer(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        _rtp_capabilities: Value,
    ) -> Result<ConsumerDescriptor, ScError> {
        let mut inner = self.inner.lock().await;
        let transport = inner
            .transports
            .get(&transport_id)
            .ok_or_else(|| ScError::NotFound("Transport not found".to_string()))?;
        if !transport.connected {
            return Err(ScError::Validation(
                "Transport is not connected".to_string(),
            ));
        }

        let kind = inner
            .producers
            .get(&producer_id)
            .map(|p| p.kind)
            .ok_or_else(|| ScError::NotFound("Producer not found".to_string()))?;

        let id = ConsumerId::new();
        inner.consumers.insert(id, ConsumerState { transport_id });

        Ok(ConsumerDescriptor {
            id,
            producer_id,
            kind,
            rtp_parameters: json!({
                "encodings": [],
                "rtcp": { "reducedSize": true }
            }),
        })
    }

    async fn set_consumer_paused(
        &self,
        consumer_id: ConsumerId,
        _paused: bool,
    ) -> Result<(), ScError> {
        let inner = self.inner.lock().await;
        if !inner.consumers.contains_key(&consumer_id) {
            return Err(ScError::NotFound("Consumer not found".to_string()));
        }
        Ok(())
    }

    async fn close_producer(&self, producer_id: ProducerId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        inner
            .producers
            .remove(&producer_id)
            .map(|_| ())
            .ok_or_else(|| ScError::NotFound("Producer not found".to_string()))
    }

    async fn close_transport(&self, transport_id: TransportId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        inner.transports.remove(&transport_id);
        inner.producers.retain(|_, p| p.transport_id != transport_id);
        inner.consumers.retain(|_, c| c.transport_id != transport_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let relay = LocalRelay::new();
        let channel = ChannelId::new("c1");

        let transport = relay
            .create_transport(&channel, TransportDirection::Send)
            .await
            .unwrap();

        let result = relay
            .create_producer(transport.id, MediaKind::Audio, json!({}))
            .await;
        assert!(matches!(result, Err(ScError::Validation(_))));

        relay
            .connect_transport(transport.id, json!({}))
            .await
            .unwrap();
        let result = relay
            .create_producer(transport.id, MediaKind::Audio, json!({}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_consumer_inherits_producer_kind() {
        let relay = LocalRelay::new();
        let channel = ChannelId::new("c1");

        let send = relay
            .create_transport(&channel, TransportDirection::Send)
            .await
            .unwrap();
        relay.connect_transport(send.id, json!({})).await.unwrap();
        let producer_id = relay
            .create_producer(send.id, MediaKind::Video, json!({}))
            .await
            .unwrap();

        let recv = relay
            .create_transport(&channel, TransportDirection::Recv)
            .await
            .unwrap();
        relay.connect_transport(recv.id, json!({})).await.unwrap();
        let consumer = relay
            .create_consumer(recv.id, producer_id, json!({}))
            .await
            .unwrap();

        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.producer_id, producer_id);
    }

    #[tokio::test]
    async fn test_close_transport_releases_attached_resources() {
        let relay = LocalRelay::new();
        let channel = ChannelId::new("c1");

        let send = relay
            .create_transport(&channel, TransportDirection::Send)
            .await
            .unwrap();
        relay.connect_transport(send.id, json!({})).await.unwrap();
        let producer_id = relay
            .create_producer(send.id, MediaKind::Audio, json!({}))
            .await
            .unwrap();

        relay.close_transport(send.id).await.unwrap();

        let result = relay.close_producer(producer_id).await;
        assert!(matches!(result, Err(ScError::NotFound(_))));
    }
}
