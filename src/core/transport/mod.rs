//! Session transport.
//!
//! The controller talks to the vendor through the [`Transport`] trait: one
//! `connect` call per attempt, yielding a [`TransportHandle`] with an
//! outbound [`ControlChannel`], an inbound event stream, and a token that
//! fires when the underlying connection dies. The production implementation
//! is [`WsTransport`]; tests substitute in-memory fakes.

mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::SessionError;
use crate::core::events::{ClientEvent, ServerEvent};

pub use ws::WsTransport;

/// Channel capacity for outbound and inbound event queues.
pub const CHANNEL_CAPACITY: usize = 256;

/// Control channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress
    Connecting,
    /// Ready for traffic
    Open,
    /// Close initiated, draining
    Closing,
    /// Terminated
    Closed,
}

/// Shared, lock-free channel state cell. The transport's pump task writes
/// it; senders read it before queueing.
#[derive(Debug, Clone)]
pub struct ChannelStateCell(Arc<AtomicU8>);

impl ChannelStateCell {
    /// New cell in the `Connecting` state.
    pub fn new() -> Self {
        ChannelStateCell(Arc::new(AtomicU8::new(0)))
    }

    /// Update the state.
    pub fn set(&self, state: ChannelState) {
        let v = match state {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        };
        self.0.store(v, Ordering::SeqCst);
    }

    /// Read the state.
    pub fn get(&self) -> ChannelState {
        match self.0.load(Ordering::SeqCst) {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

impl Default for ChannelStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound side of the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<ClientEvent>,
    state: ChannelStateCell,
}

impl ControlChannel {
    /// Build a channel pair: the sender half for callers, the receiver half
    /// for the transport pump. Starts in `Connecting`.
    pub fn channel(capacity: usize) -> (ControlChannel, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ControlChannel {
                tx,
                state: ChannelStateCell::new(),
            },
            rx,
        )
    }

    /// Handle to the shared state cell, for the owning transport.
    pub fn state_cell(&self) -> ChannelStateCell {
        self.state.clone()
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Queue an event for transmission. Fails without side effects unless
    /// the channel is `Open`; a full queue is a transport error, not a
    /// blocking wait.
    pub fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        match self.state.get() {
            ChannelState::Open => {}
            other => {
                return Err(SessionError::NotReady(format!("channel is {other:?}")));
            }
        }
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::Transport("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SessionError::NotReady("channel is Closed".to_string())
            }
        })
    }
}

/// Live connection handed back by [`Transport::connect`].
pub struct TransportHandle {
    /// Outbound control channel
    pub control: ControlChannel,
    /// Inbound server events
    pub inbound: mpsc::Receiver<ServerEvent>,
    /// Cancelled when the connection terminates for any reason
    pub closed: CancellationToken,
}

/// A way to reach the vendor's realtime endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection authenticated by `credential`, consuming
    /// captured audio frames from `frames` for the connection's lifetime.
    async fn connect(
        &self,
        credential: &str,
        frames: mpsc::Receiver<Bytes>,
    ) -> Result<TransportHandle, SessionError>;
}

// =============================================================================
// Reconnect policy
// =============================================================================

/// Bounded exponential backoff for re-establishing a lost connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Whether reconnection is attempted at all
    pub enabled: bool,
    /// Maximum attempts before giving up (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the first attempt, in ms
    pub initial_delay_ms: u64,
    /// Delay ceiling, in ms
    pub max_delay_ms: u64,
    /// Backoff multiplier per attempt
    pub backoff_multiplier: f32,
    /// Whether to add jitter to spread retries
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay for a given attempt number (1-based), in milliseconds.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let base = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;
        let delay = base * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            // Up to 25% jitter
            let range = delay * 0.25;
            (delay + rand_jitter(range)).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Pseudo-random jitter from a simple LCG seeded by the clock.
/// Avoids pulling in the rand crate for a single use.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_open_fails_cleanly() {
        let (control, _rx) = ControlChannel::channel(4);
        let err = control.send(ClientEvent::ResponseCreate).unwrap_err();
        assert!(matches!(err, SessionError::NotReady(_)));
    }

    #[test]
    fn send_after_open_queues() {
        let (control, mut rx) = ControlChannel::channel(4);
        control.state_cell().set(ChannelState::Open);
        control.send(ClientEvent::ResponseCreate).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientEvent::ResponseCreate
        ));
    }

    #[test]
    fn full_queue_is_a_transport_error() {
        let (control, _rx) = ControlChannel::channel(1);
        control.state_cell().set(ChannelState::Open);
        control.send(ClientEvent::ResponseCreate).unwrap();
        let err = control.send(ClientEvent::ResponseCancel).unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), 1000);
        assert_eq!(policy.delay_for(2), 2000);
        assert_eq!(policy.delay_for(3), 4000);
        assert_eq!(policy.delay_for(10), 30000);
    }

    #[test]
    fn retry_budget_is_respected() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!ReconnectPolicy::disabled().should_retry(0));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=5 {
            let delay = policy.delay_for(attempt);
            let base = 1000u64 * 2u64.pow(attempt - 1);
            let base = base.min(30000);
            assert!(delay <= base + base / 4 + 1);
        }
    }
}
