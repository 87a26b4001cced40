use crate::types::{CurrentItem, EngineLifecycle, ProcessStage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Wire events of the live progress channel. Serialized as
/// `{"type": "...", "data": {...}}` frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// A run has begun.
    Started {},
    /// Counter update, emitted once per processed item (and once at start).
    Progress {
        total: u64,
        completed: u64,
        failed: u64,
        current: Option<CurrentItem>,
        stage: Option<ProcessStage>,
    },
    ItemDone {
        article_id: String,
        title: String,
    },
    ItemFailed {
        article_id: String,
        title: String,
        stage: ProcessStage,
        error: String,
    },
    /// Final tallies; the run is over (queue exhausted or stopped).
    Completed {
        total: u64,
        success: u64,
        failed: u64,
    },
    /// Point-in-time snapshot sent to an observer when it connects. Never
    /// broadcast.
    Connected {
        status: EngineLifecycle,
        total: u64,
        completed: u64,
        failed: u64,
    },
}

/// Fan-out of run-loop events to any number of live observers.
///
/// Each observer gets its own unbounded channel, so a slow or absent
/// consumer can never stall the run-loop; an observer whose receiver is
/// gone is pruned by the broadcast that discovers it.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    observers: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<ProcessEvent>>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer; the returned id is the unsubscribe handle.
    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.observers.lock().await.insert(id, tx);
        debug!("Observer {} subscribed", id);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: &Uuid) {
        if self.observers.lock().await.remove(id).is_some() {
            debug!("Observer {} unsubscribed", id);
        }
    }

    /// Deliver `event` to every current observer. Fire-and-forget: sends
    /// never block, and a dead observer only removes itself.
    pub async fn broadcast(&self, event: ProcessEvent) {
        let mut observers = self.observers.lock().await;
        if observers.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (id, tx) in observers.iter() {
            if tx.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            observers.remove(&id);
            debug!("Observer {} dropped, removed from broadcast set", id);
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }
}
