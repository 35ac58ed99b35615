//! Minted-session registry.
//!
//! The backend remembers each credential it mints so operators can see what
//! is outstanding and so expired entries age out. Entries expire on their
//! credential's TTL; a background sweeper removes them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A session whose credential this backend minted.
#[derive(Debug, Clone)]
pub struct MintedSession {
    /// Vendor session id
    pub session_id: String,
    /// Model the credential is scoped to
    pub model: String,
    /// When the entry was created
    pub minted_at: Instant,
    /// Credential lifetime
    pub ttl: Duration,
}

impl MintedSession {
    /// Whether the credential has aged out.
    pub fn is_expired(&self) -> bool {
        self.minted_at.elapsed() >= self.ttl
    }
}

/// Concurrent registry of outstanding minted sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, MintedSession>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly minted session.
    pub fn insert(&self, session: MintedSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Look up a session by id, skipping expired entries.
    pub fn get(&self, session_id: &str) -> Option<MintedSession> {
        self.sessions
            .get(session_id)
            .filter(|s| !s.is_expired())
            .map(|s| s.clone())
    }

    /// Remove a session.
    pub fn remove(&self, session_id: &str) -> Option<MintedSession> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    /// Number of live (unexpired) sessions.
    pub fn live_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_expired()).count()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired());
        // Handlers may insert concurrently between the two len reads.
        before.saturating_sub(self.sessions.len())
    }

    /// Spawn the periodic sweeper. Runs until `shutdown` fires.
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired sessions");
                        }
                    }
                }
            }
        });
    }
}
