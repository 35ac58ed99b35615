//! Shared test doubles for controller integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicebridge::core::credentials::{CredentialProvider, EphemeralCredential};
use voicebridge::core::error::SessionError;
use voicebridge::core::events::{ClientEvent, ServerEvent};
use voicebridge::core::grounding::ContextRetriever;
use voicebridge::core::transport::{
    CHANNEL_CAPACITY, ChannelState, ControlChannel, Transport, TransportHandle,
};

/// One end of a fake connection, handed to the test when the controller
/// connects.
pub struct FakeLink {
    /// Client events the controller sent
    pub outbound: mpsc::Receiver<ClientEvent>,
    /// Feed server events to the controller
    pub inbound: mpsc::Sender<ServerEvent>,
    /// Cancel to simulate the connection dropping
    pub closed: CancellationToken,
    /// Audio frames the controller captured
    pub frames: mpsc::Receiver<Bytes>,
}

/// In-memory transport. Every `connect` yields a fresh [`FakeLink`] on the
/// receiver returned by [`FakeTransport::new`].
pub struct FakeTransport {
    links: mpsc::UnboundedSender<FakeLink>,
    pub credentials_seen: std::sync::Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeLink>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(FakeTransport {
                links: tx,
                credentials_seen: std::sync::Mutex::new(Vec::new()),
            }),
            rx,
        )
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        credential: &str,
        frames: mpsc::Receiver<Bytes>,
    ) -> Result<TransportHandle, SessionError> {
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.to_string());

        let (control, outbound) = ControlChannel::channel(CHANNEL_CAPACITY);
        control.state_cell().set(ChannelState::Open);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let closed = CancellationToken::new();

        self.links
            .send(FakeLink {
                outbound,
                inbound: inbound_tx,
                closed: closed.clone(),
                frames,
            })
            .map_err(|_| SessionError::Transport("test harness gone".to_string()))?;

        Ok(TransportHandle {
            control,
            inbound: inbound_rx,
            closed,
        })
    }
}

/// Audio source that always succeeds and can be reopened. The test can feed
/// PCM through the latest tap.
pub struct TestAudioSource {
    taps: std::sync::Mutex<Vec<mpsc::Sender<Bytes>>>,
}

impl TestAudioSource {
    pub fn new() -> Arc<Self> {
        Arc::new(TestAudioSource {
            taps: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Sender feeding the most recently opened capture.
    pub fn latest_tap(&self) -> mpsc::Sender<Bytes> {
        self.taps
            .lock()
            .unwrap()
            .last()
            .expect("no capture opened yet")
            .clone()
    }
}

#[async_trait]
impl voicebridge::core::audio::AudioSource for TestAudioSource {
    async fn open(&self) -> Result<voicebridge::core::audio::AudioCapture, SessionError> {
        let (tx, rx) = mpsc::channel(64);
        self.taps.lock().unwrap().push(tx);
        Ok(voicebridge::core::audio::AudioCapture::gate(rx))
    }
}

/// Audio source that refuses to open, as a denied microphone would.
pub struct DeniedAudioSource;

#[async_trait]
impl voicebridge::core::audio::AudioSource for DeniedAudioSource {
    async fn open(&self) -> Result<voicebridge::core::audio::AudioCapture, SessionError> {
        Err(SessionError::Media("microphone permission denied".to_string()))
    }
}

/// Credential provider that always succeeds, counting mints.
pub struct FakeCredentials {
    pub mints: AtomicU32,
    delay: Duration,
}

impl FakeCredentials {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeCredentials {
            mints: AtomicU32::new(0),
            delay: Duration::ZERO,
        })
    }

    /// Provider that takes `delay` per mint, for racing against disconnect.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(FakeCredentials {
            mints: AtomicU32::new(0),
            delay,
        })
    }

    pub fn mint_count(&self) -> u32 {
        self.mints.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn mint(&self) -> Result<EphemeralCredential, SessionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EphemeralCredential {
            value: format!("ek_test_{n}"),
            expires_at: None,
            session_id: Some(format!("sess_{n}")),
            model: None,
        })
    }
}

/// Retriever returning a fixed answer.
pub struct FakeRetriever {
    pub result: Option<String>,
}

#[async_trait]
impl ContextRetriever for FakeRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Option<String>, SessionError> {
        Ok(self.result.clone())
    }
}

/// Receive the next outbound client event or panic after a second.
pub async fn next_event(link: &mut FakeLink) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(1), link.outbound.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("outbound channel closed")
}

/// Assert no outbound event arrives within the window.
pub async fn assert_no_event(link: &mut FakeLink, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, link.outbound.recv()).await {
        panic!("unexpected client event: {event:?}");
    }
}

/// Wait until the phase watch reports `target`.
pub async fn wait_for_phase(
    rx: &mut tokio::sync::watch::Receiver<voicebridge::core::session::Phase>,
    target: voicebridge::core::session::Phase,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == target {
                return;
            }
            rx.changed().await.expect("phase channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for phase {target:?}"));
}
