//! Microphone capture seam.
//!
//! The controller does not talk to audio hardware directly. An
//! [`AudioSource`] opens capture and yields an [`AudioCapture`]: a stream of
//! PCM frames plus a mute gate. Muting suppresses frames at the source while
//! keeping capture open, so unmuting resumes instantly without renegotiation.
//!
//! [`ChannelAudioSource`] is the production integration point: a platform
//! audio stack feeds raw frames into its sender half.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::SessionError;

/// Frame queue depth between capture and transport.
const FRAME_CAPACITY: usize = 64;

/// Something that can open microphone capture.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Open capture. Fails with [`SessionError::Media`] when the device is
    /// unavailable or permission is denied.
    async fn open(&self) -> Result<AudioCapture, SessionError>;
}

/// An open capture: gated frame stream plus controls.
pub struct AudioCapture {
    frames: Option<mpsc::Receiver<Bytes>>,
    enabled: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl AudioCapture {
    /// Wrap a raw frame stream behind the mute gate. Frames arriving while
    /// muted are dropped, not buffered.
    pub fn gate(mut raw: mpsc::Receiver<Bytes>) -> Self {
        let (tx, rx) = mpsc::channel(FRAME_CAPACITY);
        let enabled = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();

        let gate_enabled = enabled.clone();
        let gate_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = gate_stop.cancelled() => break,
                    frame = raw.recv() => {
                        let Some(frame) = frame else { break };
                        if !gate_enabled.load(Ordering::SeqCst) {
                            continue;
                        }
                        // Back-pressure: a full queue drops the oldest
                        // intent by dropping this frame
                        if tx.try_send(frame).is_err() {
                            debug!("audio frame dropped, queue full or closed");
                        }
                    }
                }
            }
        });

        AudioCapture {
            frames: Some(rx),
            enabled,
            stop,
        }
    }

    /// Take the frame stream to hand to the transport. Yields `None` on the
    /// second call.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.frames.take()
    }

    /// Shared mute control, usable after the frame stream has been handed
    /// off.
    pub fn mute_control(&self) -> MuteControl {
        MuteControl {
            enabled: self.enabled.clone(),
        }
    }

    /// Stop capture. Idempotent.
    pub fn close(&self) {
        self.stop.cancel();
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Lock-free mute toggle shared with the capture gate.
#[derive(Clone)]
pub struct MuteControl {
    enabled: Arc<AtomicBool>,
}

impl MuteControl {
    /// Mute or unmute. Idempotent per direction.
    pub fn set_muted(&self, muted: bool) {
        self.enabled.store(!muted, Ordering::SeqCst);
    }

    /// Whether capture is currently muted.
    pub fn is_muted(&self) -> bool {
        !self.enabled.load(Ordering::SeqCst)
    }
}

/// Audio source fed by an external frame channel. A single capture may be
/// open at a time; a second `open` while one is live is a media error, the
/// same surface a denied device permission produces.
pub struct ChannelAudioSource {
    raw: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl ChannelAudioSource {
    /// Create the source and the sender half the platform audio stack
    /// writes PCM frames into.
    pub fn new() -> (Self, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(FRAME_CAPACITY);
        (
            ChannelAudioSource {
                raw: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl AudioSource for ChannelAudioSource {
    async fn open(&self) -> Result<AudioCapture, SessionError> {
        let raw = self
            .raw
            .lock()
            .take()
            .ok_or_else(|| SessionError::Media("capture device unavailable".to_string()))?;
        Ok(AudioCapture::gate(raw))
    }
}

/// Audio source that captures nothing, for text-only sessions. Opens any
/// number of times; the frame stream stays silent until teardown.
pub struct NullAudioSource;

#[async_trait]
impl AudioSource for NullAudioSource {
    async fn open(&self) -> Result<AudioCapture, SessionError> {
        let (tx, rx) = mpsc::channel(1);
        let capture = AudioCapture::gate(rx);
        // Keep the sender alive as long as the capture; the gate task exits
        // when close() fires rather than on channel drop.
        let stop = capture.stop.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            drop(tx);
        });
        Ok(capture)
    }
}
