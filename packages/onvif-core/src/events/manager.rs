//! Subscription bookkeeping shared by PullPoint and BaseNotification.
//!
//! Each resource has at most one live subscription task. Tasks are tracked
//! by a generation id so a replaced loop never removes its successor.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which subscription flavour a manager tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    PullPoint,
    BaseNotification,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullPoint => f.write_str("PullPoint"),
            Self::BaseNotification => f.write_str("BaseNotification"),
        }
    }
}

struct Entry {
    id: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Registration handed to a subscription task.
#[derive(Debug, Clone)]
pub struct Registration {
    pub resource: String,
    pub id: u64,
    pub cancel: CancellationToken,
}

/// Tracks the live subscription task of each resource of one device.
pub struct SubscriptionManager {
    device_name: String,
    kind: SubscriptionKind,
    entries: RwLock<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(device_name: &str, kind: SubscriptionKind) -> Self {
        Self {
            device_name: device_name.to_string(),
            kind,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Reserves the slot for `resource`, cancelling any subscription it held.
    pub fn register(&self, resource: &str) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let previous = self.entries.write().insert(
            resource.to_string(),
            Entry {
                id,
                cancel: cancel.clone(),
                handle: None,
            },
        );
        if let Some(previous) = previous {
            log::info!(
                "[{}] Replacing subscription {}/{}",
                self.kind,
                self.device_name,
                resource
            );
            previous.cancel.cancel();
        }
        Registration {
            resource: resource.to_string(),
            id,
            cancel,
        }
    }

    /// Attaches the task handle to a registration.
    ///
    /// Ignored when the registration was already removed or replaced.
    pub fn attach(&self, registration: &Registration, handle: JoinHandle<()>) {
        let mut entries = self.entries.write();
        match entries.get_mut(&registration.resource) {
            Some(entry) if entry.id == registration.id => entry.handle = Some(handle),
            _ => {}
        }
    }

    /// Removes the entry of `resource` if it still belongs to generation `id`.
    pub fn remove(&self, resource: &str, id: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get(resource) {
            Some(entry) if entry.id == id => {
                entries.remove(resource);
                true
            }
            _ => false,
        }
    }

    /// Cancels the subscription of one resource, returning its task handle.
    pub fn cancel(&self, resource: &str) -> Option<JoinHandle<()>> {
        let entry = self.entries.write().remove(resource)?;
        entry.cancel.cancel();
        entry.handle
    }

    /// Signals every subscription to stop without waiting for it.
    ///
    /// Returns the task handles so callers can join or abort them.
    pub fn unsubscribe_all(&self) -> Vec<JoinHandle<()>> {
        let drained: Vec<Entry> = self.entries.write().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            log::info!(
                "[{}] Stopping {} subscription(s) of {}",
                self.kind,
                drained.len(),
                self.device_name
            );
        }
        drained
            .into_iter()
            .filter_map(|entry| {
                entry.cancel.cancel();
                entry.handle
            })
            .collect()
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.entries.read().contains_key(resource)
    }

    pub fn resources(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
