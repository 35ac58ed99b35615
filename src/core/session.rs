//! Session controller.
//!
//! Owns the lifecycle of one realtime conversation: mint a credential, open
//! microphone capture, establish the transport, configure the remote
//! session, then pump server events into [`ConversationState`] until the
//! caller disconnects, the vendor hangs up, or the idle timer fires.
//!
//! # Concurrency
//!
//! The controller is `Clone` and all operations take `&self`. No lock is
//! held across an await: suspension points are guarded by a per-attempt
//! `CancellationToken` plus a generation counter, so a `disconnect` or a
//! newer `connect` supersedes in-flight work instead of racing it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::audio::{AudioCapture, AudioSource, MuteControl};
use crate::core::classify::{Classification, Role, classify};
use crate::core::conversation::{ConversationSnapshot, ConversationState};
use crate::core::credentials::CredentialProvider;
use crate::core::error::{SessionError, ToolError};
use crate::core::events::{ClientEvent, ServerEvent, SessionConfig};
use crate::core::grounding::{ContextRetriever, grounded_instructions};
use crate::core::settings::{SessionSettings, TurnMode};
use crate::core::tools::ToolRegistry;
use crate::core::transport::{ControlChannel, ReconnectPolicy, Transport};

/// How long a grounding lookup may delay the response.
const GROUNDING_TIMEOUT: Duration = Duration::from_secs(3);

/// Idle timer check interval.
const IDLE_TICK: Duration = Duration::from_secs(5);

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No session
    Idle,
    /// Minting an ephemeral credential
    AcquiringCredential,
    /// Transport handshake in progress
    Negotiating,
    /// Conversation live
    Open,
    /// Teardown in progress
    Closing,
    /// Cleanly closed
    Closed,
    /// Terminated by an error
    Failed,
}

impl Phase {
    /// Terminal phases admit a new `connect`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Closed | Phase::Failed)
    }
}

/// Resources of the currently active (or connecting) session attempt.
struct Active {
    generation: u64,
    cancel: CancellationToken,
    control: Option<ControlChannel>,
    mute: Option<MuteControl>,
    capture: Option<AudioCapture>,
}

/// Realtime session controller. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionController {
    settings: Arc<SessionSettings>,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    audio: Arc<dyn AudioSource>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    tools: Arc<ToolRegistry>,
    reconnect: ReconnectPolicy,
    state: ConversationState,
    active: Arc<Mutex<Option<Active>>>,
    generation: Arc<AtomicU64>,
}

impl SessionController {
    /// Controller with no grounding, no tools, and default reconnection.
    pub fn new(
        settings: SessionSettings,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        audio: Arc<dyn AudioSource>,
    ) -> Self {
        SessionController {
            settings: Arc::new(settings),
            credentials,
            transport,
            audio,
            retriever: None,
            tools: Arc::new(ToolRegistry::new()),
            reconnect: ReconnectPolicy::default(),
            state: ConversationState::new(),
            active: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a context retriever. Grounded sessions take over response
    /// creation after user turns.
    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Attach a tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Override the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Shared conversation state handle.
    pub fn conversation(&self) -> &ConversationState {
        &self.state
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.state.snapshot()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Subscribe to phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.state.subscribe_phase()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a session. Fails with [`SessionError::AlreadyActive`] unless the
    /// current phase is terminal. Returns once the conversation is `Open`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (generation, cancel) = {
            let mut active = self.active.lock();
            let phase = self.state.phase();
            if active.is_some() || !phase.is_terminal() {
                return Err(SessionError::AlreadyActive(format!("{phase:?}")));
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let cancel = CancellationToken::new();
            *active = Some(Active {
                generation,
                cancel: cancel.clone(),
                control: None,
                mute: None,
                capture: None,
            });
            (generation, cancel)
        };

        self.state.reset();
        self.state.set_phase(Phase::AcquiringCredential);

        // Mint a fresh credential. Never cached across attempts.
        let credential = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            r = self.credentials.mint() => r,
        };
        let credential = match credential {
            Ok(c) => c,
            Err(e) => return Err(self.fail(generation, e)),
        };

        // Open capture before dialing; a denied microphone should not cost
        // a connection.
        let capture = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            r = self.audio.open() => r,
        };
        let mut capture = match capture {
            Ok(c) => c,
            Err(e) => return Err(self.fail(generation, e)),
        };
        let frames = match capture.take_frames() {
            Some(f) => f,
            None => {
                return Err(self.fail(
                    generation,
                    SessionError::Media("capture yielded no frame stream".to_string()),
                ));
            }
        };
        let mute = capture.mute_control();

        self.state.set_phase(Phase::Negotiating);

        let handle = tokio::select! {
            _ = cancel.cancelled() => {
                capture.close();
                return Err(SessionError::Cancelled);
            }
            r = self.transport.connect(&credential.value, frames) => r,
        };
        let handle = match handle {
            Ok(h) => h,
            Err(e) => {
                capture.close();
                return Err(self.fail(generation, e));
            }
        };

        let control = handle.control.clone();
        {
            let mut active = self.active.lock();
            match active.as_mut() {
                Some(a) if a.generation == generation && !cancel.is_cancelled() => {
                    a.control = Some(control.clone());
                    a.mute = Some(mute);
                    a.capture = Some(capture);
                }
                _ => {
                    // Superseded while dialing; tear down quietly
                    capture.close();
                    return Err(SessionError::Cancelled);
                }
            }
        }

        // Configure the remote session, then elicit the greeting.
        let configured = control
            .send(ClientEvent::SessionUpdate {
                session: self.wire_config(None),
            })
            .and_then(|()| {
                if self.settings.greeting.is_some() {
                    control.send(ClientEvent::ResponseCreate)
                } else {
                    Ok(())
                }
            });
        if let Err(e) = configured {
            return Err(self.fail(generation, e));
        }

        self.state.set_phase(Phase::Open);
        if let Some(id) = &credential.session_id {
            info!(session_id = %id, "realtime session open");
        } else {
            info!("realtime session open");
        }

        let pump = self.clone();
        tokio::spawn(async move {
            pump.run_pump(generation, cancel, control, handle.inbound, handle.closed)
                .await;
        });

        Ok(())
    }

    /// Close the session. Idempotent; safe to call from any phase, and the
    /// phase always lands on `Closed`. The transcript is cleared on the way
    /// out. In-flight `connect` work is superseded and tears itself down
    /// without touching visible state.
    pub async fn disconnect(&self) {
        let taken = self.active.lock().take();
        if let Some(active) = taken {
            self.state.set_phase(Phase::Closing);
            active.cancel.cancel();
            if let Some(capture) = &active.capture {
                capture.close();
            }
            // Dropping the control channel lets the transport pump drain and
            // send its close frame.
            drop(active.control);
            info!("realtime session closed");
        }

        // Clearing before the phase change keeps `Closed` as the last
        // transition observers see.
        self.state.clear();
        self.state.set_phase(Phase::Closed);
    }

    /// Record a failure, release the attempt, and enter `Failed`. Returns
    /// the error for the caller to propagate.
    fn fail(&self, generation: u64, err: SessionError) -> SessionError {
        let taken = {
            let mut active = self.active.lock();
            let owns_attempt = active.as_ref().is_some_and(|a| a.generation == generation);
            if owns_attempt { active.take() } else { None }
        };
        if let Some(active) = taken {
            active.cancel.cancel();
            if let Some(capture) = &active.capture {
                capture.close();
            }
            self.state.set_error(err.to_string());
            self.state.set_phase(Phase::Failed);
        }
        err
    }

    // =========================================================================
    // In-session operations
    // =========================================================================

    /// Send a raw control event. Fails without side effects when the
    /// channel is not open.
    pub fn send_event(&self, event: ClientEvent) -> Result<(), SessionError> {
        let active = self.active.lock();
        let control = active
            .as_ref()
            .and_then(|a| a.control.as_ref())
            .ok_or_else(|| SessionError::NotReady("no active session".to_string()))?;
        control.send(event)
    }

    /// Send a typed user text message and request a response.
    pub fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.send_event(ClientEvent::user_text(text))?;
        self.send_event(ClientEvent::ResponseCreate)
    }

    /// Mute or unmute microphone capture. Capture stays open while muted.
    pub fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let active = self.active.lock();
        let mute = active
            .as_ref()
            .and_then(|a| a.mute.as_ref())
            .ok_or_else(|| SessionError::NotReady("no active session".to_string()))?;
        mute.set_muted(muted);
        Ok(())
    }

    /// Whether capture is currently muted. `false` when no session is
    /// active.
    pub fn is_muted(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .and_then(|a| a.mute.as_ref())
            .map(MuteControl::is_muted)
            .unwrap_or(false)
    }

    /// Start a push-to-talk turn: discard any buffered audio. Only
    /// meaningful with [`TurnMode::Manual`].
    pub fn begin_turn(&self) -> Result<(), SessionError> {
        self.send_event(ClientEvent::InputAudioBufferClear)
    }

    /// End a push-to-talk turn: commit buffered audio and request a
    /// response. Grounded sessions commit only; the response is requested
    /// once retrieval has run against the committed turn's transcript.
    pub fn end_turn(&self) -> Result<(), SessionError> {
        self.send_event(ClientEvent::InputAudioBufferCommit)?;
        if self.retriever.is_none() {
            self.send_event(ClientEvent::ResponseCreate)?;
        }
        Ok(())
    }

    // =========================================================================
    // Event pump
    // =========================================================================

    fn wire_config(&self, instructions_override: Option<&str>) -> SessionConfig {
        let mut settings = (*self.settings).clone();
        if let Some(greeting) = &settings.greeting
            && instructions_override.is_none()
        {
            settings.instructions =
                format!("{}\n\nStart by greeting the user: {greeting}", settings.instructions);
        }
        // When grounding drives responses, the vendor must not auto-respond
        // at turn end; the controller requests the response itself after
        // retrieval completes or degrades.
        if self.retriever.is_some()
            && let TurnMode::ServerVad {
                create_response, ..
            } = &mut settings.turn_mode
        {
            *create_response = false;
        }
        settings.to_wire(self.tools.definitions(), instructions_override)
    }

    async fn run_pump(
        &self,
        generation: u64,
        cancel: CancellationToken,
        control: ControlChannel,
        mut inbound: mpsc::Receiver<ServerEvent>,
        transport_closed: CancellationToken,
    ) {
        let idle_limit = match self.settings.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut tick = tokio::time::interval(IDLE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_activity = Instant::now();
        let mut pending_calls: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("event pump superseded");
                    return;
                }

                _ = transport_closed.cancelled() => {
                    self.on_transport_loss(generation, &cancel);
                    return;
                }

                _ = tick.tick(), if idle_limit.is_some() => {
                    if let Some(limit) = idle_limit
                        && last_activity.elapsed() >= limit
                    {
                        info!(idle_secs = limit.as_secs(), "closing idle session");
                        self.disconnect().await;
                        return;
                    }
                }

                event = inbound.recv() => {
                    let Some(event) = event else {
                        self.on_transport_loss(generation, &cancel);
                        return;
                    };
                    last_activity = Instant::now();
                    self.apply(classify(&event), &mut pending_calls, &control).await;
                }
            }
        }
    }

    async fn apply(
        &self,
        classification: Classification,
        pending_calls: &mut HashMap<String, String>,
        control: &ControlChannel,
    ) {
        match classification {
            Classification::Error { message } => {
                warn!(%message, "vendor reported an error");
                self.state.set_error(message);
            }
            Classification::SessionReady { session_id } => {
                debug!(%session_id, "remote session ready");
            }
            Classification::ItemCreated { id, role, text } => {
                self.state.upsert_item(&id, role, text);
            }
            Classification::ItemDeleted { item_id } => {
                self.state.remove_item(&item_id);
            }
            Classification::TextDelta { item_id, delta } => {
                self.state.append_delta(&item_id, &delta);
            }
            Classification::TextDone {
                item_id,
                text,
                user_turn,
            } => {
                let role = if user_turn { Role::User } else { Role::Assistant };
                self.state.finalize_text(&item_id, role, text.clone());
                if user_turn {
                    self.on_user_turn(&text, control).await;
                }
            }
            Classification::Listening(listening) => {
                self.state.set_listening(listening);
            }
            Classification::AssistantSpeaking(speaking) => {
                self.state.set_speaking(speaking);
            }
            Classification::ToolCallPending { call_id, name } => {
                debug!(%call_id, %name, "tool call pending");
                pending_calls.insert(call_id, name);
            }
            Classification::ToolCallDone { call_id, arguments } => {
                let Some(name) = pending_calls.remove(&call_id) else {
                    warn!(%call_id, "arguments for unknown tool call");
                    return;
                };
                self.dispatch_tool(&call_id, &name, &arguments, control).await;
            }
            Classification::Ignored => {}
        }
    }

    /// Ground the next response in retrieved knowledge, then request it.
    /// Retrieval failure or timeout degrades to the ungrounded prompt.
    async fn on_user_turn(&self, utterance: &str, control: &ControlChannel) {
        let Some(retriever) = &self.retriever else {
            return;
        };

        let context = match tokio::time::timeout(GROUNDING_TIMEOUT, retriever.retrieve(utterance))
            .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!("grounding degraded: {e}");
                None
            }
            Err(_) => {
                warn!("grounding timed out");
                None
            }
        };

        if let Some(context) = context {
            let instructions = grounded_instructions(&self.settings.instructions, &context);
            let update = ClientEvent::SessionUpdate {
                session: self.wire_config(Some(&instructions)),
            };
            if let Err(e) = control.send(update) {
                warn!("failed to apply grounded instructions: {e}");
            }
        }

        if let Err(e) = control.send(ClientEvent::ResponseCreate) {
            warn!("failed to request response: {e}");
        }
    }

    async fn dispatch_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: &str,
        control: &ControlChannel,
    ) {
        match self.tools.dispatch(name, arguments).await {
            Ok(output) => {
                let sent = control
                    .send(ClientEvent::tool_output(call_id, &output))
                    .and_then(|()| control.send(ClientEvent::ResponseCreate));
                if let Err(e) = sent {
                    warn!(%name, "failed to return tool output: {e}");
                }
            }
            Err(ToolError::Unregistered(name)) => {
                // Conversation stays open; nothing goes back on the wire
                error!(%name, "model requested an unregistered tool");
            }
            Err(e) => {
                warn!(%name, "tool failed: {e}");
                let body = serde_json::json!({ "error": e.to_string() }).to_string();
                let sent = control
                    .send(ClientEvent::tool_output(call_id, &body))
                    .and_then(|()| control.send(ClientEvent::ResponseCreate));
                if let Err(e) = sent {
                    warn!(%name, "failed to report tool error: {e}");
                }
            }
        }
    }

    /// `connect` behind a boxed future. The reconnect task enters through
    /// here so the future it spawns never names `connect`'s own opaque
    /// future type; `connect` spawns the pump that drives reconnection, so
    /// a direct call would make its auto-trait check self-referential.
    fn connect_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send>> {
        let controller = self.clone();
        Box::pin(async move { controller.connect().await })
    }

    fn on_transport_loss(&self, generation: u64, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        warn!("transport lost");
        let _ = self.fail(
            generation,
            SessionError::Transport("connection lost".to_string()),
        );

        if !self.reconnect.enabled {
            return;
        }
        let controller = self.clone();
        let policy = self.reconnect.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if !policy.should_retry(attempt) {
                    warn!(attempts = attempt, "giving up on reconnection");
                    return;
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                info!(attempt, delay_ms = delay, "reconnecting");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                match controller.connect_boxed().await {
                    Ok(()) => {
                        info!(attempt, "reconnected");
                        return;
                    }
                    Err(SessionError::Cancelled | SessionError::AlreadyActive(_)) => return,
                    Err(e) => {
                        warn!(attempt, "reconnection failed: {e}");
                    }
                }
            }
        });
    }
}
