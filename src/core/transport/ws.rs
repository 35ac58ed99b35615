//! WebSocket transport to the vendor realtime endpoint.
//!
//! # Wire details
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Auth: `Authorization: Bearer <ephemeral credential>` plus the
//!   `OpenAI-Beta: realtime=v1` header
//! - Events: JSON text frames, one event per frame
//! - Audio: PCM 16-bit mono 24kHz, base64 encoded inside
//!   `input_audio_buffer.append` events

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::error::SessionError;
use crate::core::events::{ClientEvent, ServerEvent};
use crate::core::transport::{
    CHANNEL_CAPACITY, ChannelState, ControlChannel, Transport, TransportHandle,
};

/// Default realtime endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// WebSocket transport.
pub struct WsTransport {
    base_url: String,
    model: String,
}

impl WsTransport {
    /// Transport against the default endpoint.
    pub fn new(model: impl Into<String>) -> Self {
        WsTransport {
            base_url: REALTIME_URL.to_string(),
            model: model.into(),
        }
    }

    /// Transport against a non-default endpoint (testing, proxies).
    pub fn with_base_url(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        WsTransport {
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn build_url(&self) -> String {
        format!("{}?model={}", self.base_url, self.model)
    }

    fn host(&self) -> Result<String, SessionError> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| SessionError::Transport(format!("invalid endpoint url: {e}")))?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| SessionError::Transport("endpoint url has no host".to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        credential: &str,
        mut frames: mpsc::Receiver<Bytes>,
    ) -> Result<TransportHandle, SessionError> {
        let url = self.build_url();
        let host = self.host()?;

        let request = http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {credential}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::Transport(format!("websocket handshake failed: {e}")))?;

        info!(model = %self.model, "realtime control channel connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (control, mut outbound_rx) = ControlChannel::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);
        let closed = CancellationToken::new();

        let state = control.state_cell();
        state.set(ChannelState::Open);

        let pump_state = state.clone();
        let pump_closed = closed.clone();
        tokio::spawn(async move {
            let mut frames_open = true;
            loop {
                tokio::select! {
                    // Outgoing control events
                    event = outbound_rx.recv() => {
                        let Some(event) = event else {
                            // All senders dropped: local teardown
                            pump_state.set(ChannelState::Closing);
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("websocket send failed: {e}");
                            break;
                        }
                    }

                    // Captured audio frames
                    frame = frames.recv(), if frames_open => {
                        match frame {
                            Some(data) => {
                                let event = ClientEvent::audio_append(&data);
                                let json = match serde_json::to_string(&event) {
                                    Ok(j) => j,
                                    Err(e) => {
                                        error!("failed to serialize audio frame: {e}");
                                        continue;
                                    }
                                };
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    error!("websocket audio send failed: {e}");
                                    break;
                                }
                            }
                            None => {
                                debug!("audio frame source closed");
                                frames_open = false;
                            }
                        }
                    }

                    // Incoming server events
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if inbound_tx.send(event).await.is_err() {
                                            debug!("inbound consumer gone, closing");
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("failed to parse server event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                if ws_sink.send(Message::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "server closed the control channel");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("websocket error: {e}");
                                break;
                            }
                            None => {
                                info!("control channel stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            pump_state.set(ChannelState::Closed);
            pump_closed.cancel();
        });

        Ok(TransportHandle {
            control,
            inbound: inbound_rx,
            closed,
        })
    }
}
