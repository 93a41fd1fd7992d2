//! Foreground clients of the worker.
//!
//! `Clients` is the registry of pages the worker can post messages to. Each
//! connected page holds a `ClientHandle` with the receiving half of an
//! unbounded channel; the worker broadcasts without ever blocking, and pages
//! that went away are pruned on the next broadcast.
//!
//! `InstallStatus` is the page side: it folds received messages into what an
//! install button would show.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::models::{Progress, WorkerMessage};

/// Identifier of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct ClientSlot {
    id: ClientId,
    controlled: bool,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    slots: Vec<ClientSlot>,
}

/// Registry of connected foreground clients.
///
/// Clone is cheap; clones share the registry.
#[derive(Clone, Default)]
pub struct Clients {
    inner: Arc<Mutex<Registry>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new, uncontrolled client.
    pub fn connect(&self) -> ClientHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = ClientId(registry.next_id);
        registry.slots.push(ClientSlot {
            id,
            controlled: false,
            tx,
        });
        debug!(client = %id, "Client connected");
        ClientHandle { id, rx }
    }

    /// Drop a client's channel. Its handle will see the stream end.
    pub fn disconnect(&self, id: ClientId) -> bool {
        let mut registry = self.inner.lock();
        let before = registry.slots.len();
        registry.slots.retain(|slot| slot.id != id);
        before != registry.slots.len()
    }

    /// Take control of every connected client. Returns how many were claimed.
    pub fn claim(&self) -> usize {
        let mut registry = self.inner.lock();
        for slot in registry.slots.iter_mut() {
            slot.controlled = true;
        }
        registry.slots.len()
    }

    pub fn is_controlled(&self, id: ClientId) -> bool {
        self.inner
            .lock()
            .slots
            .iter()
            .any(|slot| slot.id == id && slot.controlled)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Post a message to every client, or only to controlled ones when
    /// `include_uncontrolled` is false. Never blocks; returns how many
    /// clients received it. Clients whose handle was dropped are removed.
    pub fn broadcast(&self, message: &WorkerMessage, include_uncontrolled: bool) -> usize {
        let mut registry = self.inner.lock();
        let mut delivered = 0;

        registry.slots.retain(|slot| {
            if !include_uncontrolled && !slot.controlled {
                return true;
            }
            match slot.tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(client = %slot.id, "Dropping closed client");
                    false
                }
            }
        });

        trace!(delivered, ?message, "Broadcast");
        delivered
    }
}

/// A page's end of the message channel.
pub struct ClientHandle {
    id: ClientId,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait for the next message. `None` once the client is disconnected.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.rx.recv().await
    }

    /// Collect every message already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// What a page knows about the offline download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallStatus {
    #[default]
    Idle,
    Downloading(Progress),
    Ready { total: usize },
}

impl InstallStatus {
    pub fn apply(&mut self, message: &WorkerMessage) {
        *self = match *message {
            WorkerMessage::CacheProgress { cached, total } => {
                InstallStatus::Downloading(Progress { cached, total })
            }
            WorkerMessage::CacheComplete { total } => InstallStatus::Ready { total },
        };
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, InstallStatus::Ready { .. })
    }

    pub fn percent(&self) -> u8 {
        match self {
            InstallStatus::Idle => 0,
            InstallStatus::Downloading(progress) => progress.percent(),
            InstallStatus::Ready { .. } => 100,
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStatus::Idle => write!(f, "Waiting for service worker..."),
            InstallStatus::Downloading(progress) => write!(
                f,
                "Downloading... {}/{} ({}%)",
                progress.cached,
                progress.total,
                progress.percent()
            ),
            InstallStatus::Ready { total } => write!(f, "Offline ready ({} files)", total),
        }
    }
}
