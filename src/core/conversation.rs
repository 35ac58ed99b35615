//! Conversation state.
//!
//! Single writer (the session controller's event pump), many readers.
//! Readers take lock-free [`ConversationSnapshot`]s via `arc-swap`; phase
//! changes additionally fan out over a `tokio::sync::watch` channel so UIs
//! can await transitions instead of polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::classify::Role;
use crate::core::session::Phase;

/// A single conversation item as exposed to readers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Item {
    /// Vendor-issued item id
    pub id: String,
    /// Speaker role
    pub role: Role,
    /// Accumulated or final text
    pub text: String,
    /// True once final text has arrived; later deltas are ignored
    pub finalized: bool,
    /// When the item was first observed
    pub created_at: DateTime<Utc>,
}

/// Immutable view of the conversation at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSnapshot {
    /// Items in arrival order
    pub items: Vec<Item>,
    /// True while user speech is detected
    pub listening: bool,
    /// True while assistant audio is playing
    pub assistant_speaking: bool,
    /// Current session phase
    pub phase: Phase,
    /// Most recent error, cleared when the session (re-)opens
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    items: Vec<Item>,
    index: HashMap<String, usize>,
    listening: bool,
    assistant_speaking: bool,
    last_error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            items: Vec::new(),
            index: HashMap::new(),
            listening: false,
            assistant_speaking: false,
            last_error: None,
        }
    }
}

/// Shared conversation state handle. Cheap to clone.
#[derive(Clone)]
pub struct ConversationState {
    inner: Arc<RwLock<Inner>>,
    snapshot: Arc<ArcSwap<ConversationSnapshot>>,
    phase_tx: Arc<watch::Sender<Phase>>,
    anomalies: Arc<AtomicU64>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    /// Create empty state in the `Idle` phase.
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let initial = ConversationSnapshot {
            items: Vec::new(),
            listening: false,
            assistant_speaking: false,
            phase: Phase::Idle,
            last_error: None,
        };
        ConversationState {
            inner: Arc::new(RwLock::new(Inner::new())),
            snapshot: Arc::new(ArcSwap::from_pointee(initial)),
            phase_tx: Arc::new(phase_tx),
            anomalies: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current snapshot. Lock-free.
    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.snapshot.load_full()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Subscribe to phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Count of tolerated protocol anomalies (deltas for unknown items,
    /// duplicate creates) since construction.
    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    /// Add an item. Duplicate ids are tolerated and leave the existing
    /// item untouched.
    pub fn upsert_item(&self, id: &str, role: Role, text: String) {
        let mut inner = self.inner.write();
        if inner.index.contains_key(id) {
            debug!(item_id = %id, "duplicate conversation item ignored");
            self.anomalies.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let idx = inner.items.len();
        inner.items.push(Item {
            id: id.to_string(),
            role,
            text,
            finalized: false,
            created_at: Utc::now(),
        });
        inner.index.insert(id.to_string(), idx);
        self.publish(&inner);
    }

    /// Append a text fragment to an item. Fragments for unknown or already
    /// finalized items are counted and dropped, never buffered.
    pub fn append_delta(&self, item_id: &str, delta: &str) {
        let mut inner = self.inner.write();
        match inner.index.get(item_id).copied() {
            Some(idx) if !inner.items[idx].finalized => {
                inner.items[idx].text.push_str(delta);
                self.publish(&inner);
            }
            Some(_) => {
                debug!(item_id = %item_id, "delta after final text ignored");
                self.anomalies.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                warn!(item_id = %item_id, "delta for unknown item");
                self.anomalies.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Set an item's final text, replacing any accumulated fragments. An
    /// unknown id creates the item, since final text is authoritative.
    pub fn finalize_text(&self, item_id: &str, role: Role, text: String) {
        let mut inner = self.inner.write();
        match inner.index.get(item_id).copied() {
            Some(idx) => {
                inner.items[idx].text = text;
                inner.items[idx].finalized = true;
            }
            None => {
                let idx = inner.items.len();
                inner.items.push(Item {
                    id: item_id.to_string(),
                    role,
                    text,
                    finalized: true,
                    created_at: Utc::now(),
                });
                inner.index.insert(item_id.to_string(), idx);
            }
        }
        self.publish(&inner);
    }

    /// Remove an item. Unknown ids are a no-op.
    pub fn remove_item(&self, item_id: &str) {
        let mut inner = self.inner.write();
        if let Some(idx) = inner.index.remove(item_id) {
            inner.items.remove(idx);
            for pos in inner.index.values_mut() {
                if *pos > idx {
                    *pos -= 1;
                }
            }
            self.publish(&inner);
        }
    }

    /// Update the user speech activity flag.
    pub fn set_listening(&self, listening: bool) {
        let mut inner = self.inner.write();
        if inner.listening != listening {
            inner.listening = listening;
            self.publish(&inner);
        }
    }

    /// Update the assistant playback activity flag.
    pub fn set_speaking(&self, speaking: bool) {
        let mut inner = self.inner.write();
        if inner.assistant_speaking != speaking {
            inner.assistant_speaking = speaking;
            self.publish(&inner);
        }
    }

    /// Record an error. Last write wins.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.last_error = Some(message.into());
        self.publish(&inner);
    }

    /// Transition the session phase. Entering `Open` clears any recorded
    /// error from a previous attempt.
    pub fn set_phase(&self, phase: Phase) {
        let mut inner = self.inner.write();
        if phase == Phase::Open {
            inner.last_error = None;
        }
        self.phase_tx.send_replace(phase);
        self.publish_with_phase(&inner, phase);
    }

    /// Clear items and activity flags, returning to `Idle`. Idempotent.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::new();
        self.phase_tx.send_replace(Phase::Idle);
        self.publish_with_phase(&inner, Phase::Idle);
    }

    /// Clear items and activity flags without touching the phase. Used
    /// during teardown, where the phase must keep advancing to `Closed`.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::new();
        self.publish(&inner);
    }

    fn publish(&self, inner: &Inner) {
        self.publish_with_phase(inner, *self.phase_tx.borrow());
    }

    fn publish_with_phase(&self, inner: &Inner, phase: Phase) {
        self.snapshot.store(Arc::new(ConversationSnapshot {
            items: inner.items.clone(),
            listening: inner.listening,
            assistant_speaking: inner.assistant_speaking,
            phase,
            last_error: inner.last_error.clone(),
        }));
    }
}
