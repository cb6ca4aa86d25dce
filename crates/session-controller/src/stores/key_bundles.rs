//! Key material store.
//!
//! Holds identity keys, signed pre-keys, one-time pre-keys, and group
//! sender keys per (owner, device). The store never performs cryptographic
//! operations: payloads are validated for shape and otherwise treated as
//! opaque. One-time pre-key issuance selects and deletes under one lock so
//! no id can ever be served twice.

use crate::errors::ScError;
use crate::models::{
    IdentityKey, KeyOwner, OneTimePreKey, PreKeyBundle, SenderKey, SignedPreKey,
    PUBLIC_KEY_LENGTH_BYTES,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use common::types::{ChannelId, DeviceId};
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct DeviceKeys {
    identity: Option<IdentityKey>,
    signed_pre_keys: Vec<SignedPreKey>,
    one_time_pre_keys: Vec<OneTimePreKey>,
}

struct Inner {
    devices: HashMap<(KeyOwner, DeviceId), DeviceKeys>,
    sender_keys: HashMap<(ChannelId, DeviceId), SenderKey>,
}

/// Non-consuming view of an owner's public key material.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeyMaterialSummary {
    pub identity_key: IdentityKey,
    pub signed_pre_key: Option<SignedPreKey>,
    pub one_time_pre_key_count: usize,
}

/// Persists public E2EE artifacts and issues one-time pre-keys atomically.
pub struct KeyBundleStore {
    inner: Mutex<Inner>,
}

impl KeyBundleStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                devices: HashMap::new(),
                sender_keys: HashMap::new(),
            }),
        }
    }

    /// Upsert the identity key for (owner, device). Rotation overwrites.
    pub async fn store_identity(
        &self,
        owner: KeyOwner,
        device: DeviceId,
        public_key: String,
        registration_id: u32,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        let keys = inner.devices.entry((owner, device)).or_default();
        keys.identity = Some(IdentityKey {
            public_key,
            registration_id,
        });
        Ok(())
    }

    /// Store a signed pre-key. The payload must decode to exactly 33 bytes.
    pub async fn store_signed_pre_key(
        &self,
        owner: KeyOwner,
        device: DeviceId,
        id: u32,
        data: String,
        signature: String,
    ) -> Result<(), ScError> {
        validate_public_key_payload(&data)?;

        let mut inner = self.inner.lock().await;
        let keys = inner.devices.entry((owner, device)).or_default();
        keys.signed_pre_keys.retain(|k| k.id != id);
        keys.signed_pre_keys.push(SignedPreKey {
            id,
            data,
            signature,
            created_at: Utc::now(),
        });
        Ok(())
    }

    /// Store a batch of one-time pre-keys. Each payload must decode to
    /// exactly 33 bytes; the whole batch is rejected before any write if
    /// one entry is malformed. An id already in the pool is overwritten.
    pub async fn store_pre_keys(
        &self,
        owner: KeyOwner,
        device: DeviceId,
        pre_keys: Vec<OneTimePreKey>,
    ) -> Result<usize, ScError> {
        if pre_keys.is_empty() {
            return Err(ScError::Validation("pre_keys must not be empty".to_string()));
        }
        for pre_key in &pre_keys {
            validate_public_key_payload(&pre_key.data)?;
        }

        let stored = pre_keys.len();
        let mut inner = self.inner.lock().await;
        let keys = inner.devices.entry((owner, device)).or_default();
        for pre_key in pre_keys {
            keys.one_time_pre_keys.retain(|k| k.id != pre_key.id);
            keys.one_time_pre_keys.push(pre_key);
        }

        tracing::debug!(
            target: "sc.stores.key_bundles",
            owner = %owner,
            stored,
            pool_size = keys.one_time_pre_keys.len(),
            "One-time pre-keys stored"
        );

        Ok(stored)
    }

    /// Issue a pre-key bundle for (owner, device).
    ///
    /// One unused one-time pre-key is chosen uniformly at random and
    /// deleted before the lock is released, so concurrent requesters can
    /// never receive the same id. An exhausted pool yields a bundle with
    /// no one-time component.
    pub async fn issue_pre_key_bundle(
        &self,
        owner: KeyOwner,
        device: &DeviceId,
    ) -> Result<PreKeyBundle, ScError> {
        let mut inner = self.inner.lock().await;
        let keys = inner
            .devices
            .get_mut(&(owner, device.clone()))
            .ok_or_else(|| ScError::NotFound("No key material for device".to_string()))?;

        let identity = keys
            .identity
            .clone()
            .ok_or_else(|| ScError::NotFound("No identity key for device".to_string()))?;

        // Most recently created signed pre-key is authoritative
        let signed_pre_key = keys
            .signed_pre_keys
            .iter()
            .max_by_key(|k| k.created_at)
            .cloned()
            .ok_or_else(|| ScError::NotFound("No signed pre-key for device".to_string()))?;

        let one_time_pre_key = if keys.one_time_pre_keys.is_empty() {
            tracing::warn!(
                target: "sc.stores.key_bundles",
                owner = %owner,
                "One-time pre-key pool exhausted, issuing bundle without one"
            );
            None
        } else {
            let idx = rand::thread_rng().gen_range(0..keys.one_time_pre_keys.len());
            Some(keys.one_time_pre_keys.swap_remove(idx))
        };

        Ok(PreKeyBundle {
            identity_key: identity,
            signed_pre_key,
            one_time_pre_key,
        })
    }

    /// Consume one specific one-time pre-key by id.
    ///
    /// Fails with `not_found` if the id was never stored or was already
    /// issued, so a consumed id can never be served again.
    pub async fn take_pre_key(
        &self,
        owner: KeyOwner,
        device: &DeviceId,
        pre_key_id: u32,
    ) -> Result<OneTimePreKey, ScError> {
        let mut inner = self.inner.lock().await;
        let keys = inner
            .devices
            .get_mut(&(owner, device.clone()))
            .ok_or_else(|| ScError::NotFound("No key material for device".to_string()))?;

        let idx = keys
            .one_time_pre_keys
            .iter()
            .position(|k| k.id == pre_key_id)
            .ok_or_else(|| ScError::NotFound("Pre-key not available".to_string()))?;

        Ok(keys.one_time_pre_keys.swap_remove(idx))
    }

    /// Non-consuming read of an owner's public material: identity key,
    /// current signed pre-key, and remaining one-time pre-key count.
    pub async fn get_material_summary(
        &self,
        owner: KeyOwner,
        device: &DeviceId,
    ) -> Result<KeyMaterialSummary, ScError> {
        let inner = self.inner.lock().await;
        let keys = inner
            .devices
            .get(&(owner, device.clone()))
            .ok_or_else(|| ScError::NotFound("No key material for device".to_string()))?;

        let identity_key = keys
            .identity
            .clone()
            .ok_or_else(|| ScError::NotFound("No identity key for device".to_string()))?;

        Ok(KeyMaterialSummary {
            identity_key,
            signed_pre_key: keys
                .signed_pre_keys
                .iter()
                .max_by_key(|k| k.created_at)
                .cloned(),
            one_time_pre_key_count: keys.one_time_pre_keys.len(),
        })
    }

    /// Remaining one-time pre-keys for (owner, device).
    pub async fn count_pre_keys(&self, owner: KeyOwner, device: &DeviceId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .devices
            .get(&(owner, device.clone()))
            .map_or(0, |keys| keys.one_time_pre_keys.len())
    }

    /// Remove identity, signed pre-key, and one-time pre-key material for
    /// (owner, device) in one operation. Removing an absent device is a
    /// no-op; the single map removal cannot partially apply.
    pub async fn delete_all_keys(&self, owner: KeyOwner, device: &DeviceId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().await;
        if inner.devices.remove(&(owner, device.clone())).is_some() {
            tracing::info!(
                target: "sc.stores.key_bundles",
                owner = %owner,
                "All key material deleted for device"
            );
        }
        Ok(())
    }

    /// Store a sender key if none exists for (channel, device).
    /// Returns the stored key, existing or new.
    pub async fn store_sender_key(
        &self,
        channel: ChannelId,
        device: DeviceId,
        key_material: String,
    ) -> Result<SenderKey, ScError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .sender_keys
            .entry((channel.clone(), device.clone()))
            .or_insert_with(|| SenderKey {
                channel,
                device,
                key_material,
                updated_at: Utc::now(),
            });
        Ok(entry.clone())
    }

    /// Replace the sender key for (channel, device) unconditionally.
    pub async fn rotate_sender_key(
        &self,
        channel: ChannelId,
        device: DeviceId,
        key_material: String,
    ) -> Result<SenderKey, ScError> {
        let key = SenderKey {
            channel: channel.clone(),
            device: device.clone(),
            key_material,
            updated_at: Utc::now(),
        };
        let mut inner = self.inner.lock().await;
        inner.sender_keys.insert((channel, device), key.clone());
        Ok(key)
    }

    pub async fn get_sender_key(
        &self,
        channel: &ChannelId,
        device: &DeviceId,
    ) -> Result<SenderKey, ScError> {
        let inner = self.inner.lock().await;
        inner
            .sender_keys
            .get(&(channel.clone(), device.clone()))
            .cloned()
            .ok_or_else(|| ScError::NotFound("Sender key not found".to_string()))
    }
}

impl Default for KeyBundleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject any payload that does not decode to exactly 33 bytes. A wrong
/// length indicates a key-format error or accidental leakage of private
/// material.
pub(crate) fn validate_public_key_payload(data: &str) -> Result<(), ScError> {
    let decoded = BASE64
        .decode(data)
        .map_err(|_| ScError::Validation("Key payload is not valid base64".to_string()))?;
    if decoded.len() != PUBLIC_KEY_LENGTH_BYTES {
        return Err(ScError::Validation(format!(
            "Key payload must decode to {PUBLIC_KEY_LENGTH_BYTES} bytes, got {}",
            decoded.len()
        )));
    }
    Ok(())
}
