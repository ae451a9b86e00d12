//! The single source of truth about senders and their paired devices.
//!
//! Shared by the receive loop (create-on-first-sight), the pairing flow and
//! external collaborators. Every mutation is atomic per operation and visible
//! immediately to subsequent reads; no transaction spans operations.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    device::{Device, DeviceId, Enumerator, SenderDevice},
    error::Error,
};

#[derive(Debug, Default)]
struct Inner {
    senders: HashMap<DeviceId, SenderDevice>,
    self_id: Option<DeviceId>,
}

/// A cheaply clonable handle to the device registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create-if-absent; an idempotent lookup otherwise.
    /// Returns a snapshot of the sender.
    pub async fn upsert_sender(&self, id: DeviceId) -> SenderDevice {
        let mut inner = self.inner.write().await;
        inner
            .senders
            .entry(id)
            .or_insert_with(|| {
                debug!(%id, "New sender");
                SenderDevice::new(id)
            })
            .clone()
    }

    /// Look a sender up by id. Returns a snapshot.
    pub async fn sender(&self, id: DeviceId) -> Option<SenderDevice> {
        self.inner.read().await.senders.get(&id).cloned()
    }

    /// Snapshots of all known senders, ordered by id.
    pub async fn senders(&self) -> Vec<SenderDevice> {
        let inner = self.inner.read().await;
        inner
            .senders
            .values()
            .cloned()
            .sorted_by_key(|sender| sender.device_id)
            .collect()
    }

    /// Add a device to a sender's paired set.
    /// A no-op if a device with that enumerator is already paired.
    pub async fn attach_device(&self, sender: DeviceId, device: Device) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let sender = inner
            .senders
            .get_mut(&sender)
            .ok_or(Error::UnknownSender(sender))?;

        sender.devices.entry(device.enumerator).or_insert(device);
        Ok(())
    }

    /// Remove a paired device.
    pub async fn remove_device(
        &self,
        sender: DeviceId,
        enumerator: Enumerator,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .senders
            .get_mut(&sender)
            .ok_or(Error::UnknownSender(sender))?;

        entry
            .devices
            .remove(&enumerator)
            .map(|_| ())
            .ok_or(Error::UnknownDevice { sender, enumerator })
    }

    /// Give a sender a display name. Names are not identity.
    pub async fn rename_sender(&self, sender: DeviceId, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .senders
            .get_mut(&sender)
            .ok_or(Error::UnknownSender(sender))?;

        entry.name = Some(name.to_string());
        Ok(())
    }

    /// Give a paired device a display name.
    pub async fn rename_device(
        &self,
        sender: DeviceId,
        enumerator: Enumerator,
        name: &str,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .senders
            .get_mut(&sender)
            .ok_or(Error::UnknownSender(sender))?;

        let device = entry
            .devices
            .get_mut(&enumerator)
            .ok_or(Error::UnknownDevice { sender, enumerator })?;

        device.name = Some(name.to_string());
        Ok(())
    }

    /// Designate the sender physically attached to this host.
    /// Creates it if unseen. At most one sender is "self" at a time.
    pub async fn mark_self(&self, id: DeviceId) {
        let mut inner = self.inner.write().await;
        inner
            .senders
            .entry(id)
            .or_insert_with(|| SenderDevice::new(id));
        inner.self_id = Some(id);
        info!(%id, "Self sender designated");
    }

    /// The designated self sender, if configured.
    pub async fn self_sender(&self) -> Option<SenderDevice> {
        let inner = self.inner.read().await;
        let id = inner.self_id?;
        inner.senders.get(&id).cloned()
    }

    /// The designated self sender, or a typed failure.
    pub async fn require_self_sender(&self) -> Result<SenderDevice, Error> {
        self.self_sender()
            .await
            .ok_or(Error::SelfSenderNotConfigured)
    }

    /// Pair a device to the self sender, optionally naming it.
    pub async fn pair_to_self(
        &self,
        enumerator: Enumerator,
        name: Option<&str>,
    ) -> Result<Device, Error> {
        let mut inner = self.inner.write().await;
        let id = inner.self_id.ok_or(Error::SelfSenderNotConfigured)?;
        let sender = inner
            .senders
            .get_mut(&id)
            .ok_or(Error::SelfSenderNotConfigured)?;

        let device = sender.devices.entry(enumerator).or_insert(Device {
            enumerator,
            name: name.map(str::to_string),
        });
        if let Some(name) = name {
            device.name = Some(name.to_string());
        }

        info!(%enumerator, "Paired device to self sender");
        Ok(device.clone())
    }

    /// A persistable snapshot of everything known.
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            senders: inner
                .senders
                .values()
                .cloned()
                .sorted_by_key(|sender| sender.device_id)
                .collect(),
            self_sender_id: inner.self_id,
        }
    }

    /// Restore from a snapshot, replacing current contents.
    pub async fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.write().await;
        inner.senders = snapshot
            .senders
            .into_iter()
            .map(|sender| (sender.device_id, sender))
            .collect();
        inner.self_id = snapshot.self_sender_id;
    }
}

/// The structured record exchanged with external persistence at session
/// boundaries: all known senders plus which one is "self".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    /// All known senders, ordered by id.
    pub senders: Vec<SenderDevice>,

    /// Which sender id is the attached transceiver, if known.
    pub self_sender_id: Option<DeviceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let registry = Registry::new();
        let id: DeviceId = "ABCDEF".parse().unwrap();

        registry.upsert_sender(id).await;
        registry.rename_sender(id, "kitchen remote").await.unwrap();
        let again = registry.upsert_sender(id).await;

        assert_eq!(again.name.as_deref(), Some("kitchen remote"));
        assert_eq!(registry.senders().await.len(), 1);
    }

    #[tokio::test]
    async fn attach_by_enumerator_only_once() {
        let registry = Registry::new();
        let id: DeviceId = "000001".parse().unwrap();
        registry.upsert_sender(id).await;

        let e: Enumerator = "A5".parse().unwrap();
        registry
            .attach_device(
                id,
                Device {
                    enumerator: e,
                    name: Some("living room".into()),
                },
            )
            .await
            .unwrap();
        // Same enumerator again: a no-op, the name survives.
        registry
            .attach_device(id, Device::unnamed(e))
            .await
            .unwrap();

        let sender = registry.sender(id).await.unwrap();
        assert_eq!(sender.devices.len(), 1);
        assert_eq!(
            sender.device(e).unwrap().name.as_deref(),
            Some("living room")
        );
    }

    #[tokio::test]
    async fn self_sender_preconditions() {
        let registry = Registry::new();
        assert!(matches!(
            registry.require_self_sender().await,
            Err(Error::SelfSenderNotConfigured)
        ));
        assert!(matches!(
            registry.pair_to_self("01".parse().unwrap(), None).await,
            Err(Error::SelfSenderNotConfigured)
        ));

        let id: DeviceId = "C0FFEE".parse().unwrap();
        registry.mark_self(id).await;
        assert_eq!(
            registry.require_self_sender().await.unwrap().device_id,
            id
        );
    }

    #[tokio::test]
    async fn removing_unknown_device_is_typed() {
        let registry = Registry::new();
        let id: DeviceId = "000002".parse().unwrap();
        registry.upsert_sender(id).await;

        assert!(matches!(
            registry.remove_device(id, "0A".parse().unwrap()).await,
            Err(Error::UnknownDevice { .. })
        ));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_json() {
        let registry = Registry::new();
        let id: DeviceId = "ABC123".parse().unwrap();
        registry.mark_self(id).await;
        registry.rename_sender(id, "self").await.unwrap();
        registry
            .pair_to_self("DE".parse().unwrap(), Some("bedroom"))
            .await
            .unwrap();

        let snapshot = registry.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, restored);

        let other = Registry::new();
        other.restore(restored).await;
        let sender = other.require_self_sender().await.unwrap();
        assert_eq!(sender.devices.len(), 1);
    }
}
