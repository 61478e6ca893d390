//! Host collaborator abstractions.
//!
//! The driver never owns devices or secrets; it talks to the host through
//! these traits. This keeps the core testable and lets the standalone
//! server plug in the in-memory implementations from [`memory`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{CommandValue, Device, DevicePatch, DiscoveredDevice};

pub mod memory;

pub use memory::{InMemoryDeviceRegistry, StaticSecretStore};

/// Errors reported by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device already exists: {0}")]
    DeviceExists(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    /// Backend failure (storage, transport to the host).
    #[error("host store error: {0}")]
    Store(String),

    /// The outbound channel was closed by shutdown.
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenient Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Secret entry as stored by the host (`username`, `password`, `mode`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub username: String,
    pub password: String,
    /// Raw auth mode string; validated by the credential resolver.
    pub mode: String,
}

/// Device registry owned by the host platform.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get_device(&self, name: &str) -> HostResult<Device>;

    async fn list_devices(&self) -> HostResult<Vec<Device>>;

    async fn add_device(&self, device: Device) -> HostResult<()>;

    async fn remove_device(&self, name: &str) -> HostResult<()>;

    /// Applies a partial update and returns the stored result.
    async fn patch_device(&self, name: &str, patch: DevicePatch) -> HostResult<Device>;
}

/// Secret storage owned by the host platform.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> HostResult<Secret>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound channels
// ─────────────────────────────────────────────────────────────────────────────

/// Closable sender towards the host.
///
/// Clones share the same underlying slot, so closing one closes all.
pub struct HostChannel<T> {
    tx: Arc<RwLock<Option<mpsc::Sender<T>>>>,
}

impl<T> Clone for HostChannel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Send + 'static> HostChannel<T> {
    /// Creates a channel pair with the given capacity.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    /// Wraps an existing sender.
    pub fn from_sender(tx: mpsc::Sender<T>) -> Self {
        Self {
            tx: Arc::new(RwLock::new(Some(tx))),
        }
    }

    /// Sends a value, waiting for capacity.
    pub async fn send(&self, value: T) -> HostResult<()> {
        // Clone out of the lock so it is never held across the await
        let tx = self.tx.read().clone();
        match tx {
            Some(tx) => tx.send(value).await.map_err(|_| HostError::ChannelClosed),
            None => Err(HostError::ChannelClosed),
        }
    }

    /// Drops the sender; subsequent sends fail with [`HostError::ChannelClosed`].
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Channel carrying readings (command values and async events).
pub type ReadingsSender = HostChannel<CommandValue>;

/// Channel carrying batches of newly discovered devices.
pub type DiscoveredSender = HostChannel<Vec<DiscoveredDevice>>;

impl ReadingsSender {
    /// Publishes a reading, logging instead of failing when the host is gone.
    pub async fn publish(&self, value: CommandValue) {
        tracing::debug!(
            device = %value.device_name,
            resource = %value.resource_name,
            "reading"
        );
        if let Err(e) = self.send(value).await {
            log::debug!("[Readings] Dropped reading: {}", e);
        }
    }
}
