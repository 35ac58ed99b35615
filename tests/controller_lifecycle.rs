//! Controller lifecycle integration tests.
//!
//! These drive a `SessionController` against in-memory fakes for the
//! transport, credential provider, and audio source, and assert the
//! externally visible behavior: phase transitions, conversation snapshots,
//! and the client events that go out on the control channel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use voicebridge::core::classify::Role;
use voicebridge::core::error::SessionError;
use voicebridge::core::events::{ApiError, ClientEvent, ServerEvent, WireItem};
use voicebridge::core::session::{Phase, SessionController};
use voicebridge::core::settings::{SessionSettings, TurnMode};
use voicebridge::core::tools::{ToolRegistry, VisitorProfile, register_builtins};
use voicebridge::core::transport::ReconnectPolicy;

use common::{
    DeniedAudioSource, FakeCredentials, FakeLink, FakeRetriever, FakeTransport, TestAudioSource,
    assert_no_event, next_event, wait_for_phase,
};

fn settings() -> SessionSettings {
    SessionSettings {
        idle_timeout_secs: 0,
        ..Default::default()
    }
}

struct Harness {
    controller: SessionController,
    links: tokio::sync::mpsc::UnboundedReceiver<FakeLink>,
    credentials: Arc<FakeCredentials>,
    audio: Arc<TestAudioSource>,
}

impl Harness {
    fn build(settings: SessionSettings) -> Self {
        Self::build_with(settings, |c| c.with_reconnect(ReconnectPolicy::disabled()))
    }

    fn build_with(
        settings: SessionSettings,
        customize: impl FnOnce(SessionController) -> SessionController,
    ) -> Self {
        let (transport, links) = FakeTransport::new();
        let credentials = FakeCredentials::new();
        let audio = TestAudioSource::new();
        let controller = customize(SessionController::new(
            settings,
            credentials.clone(),
            transport,
            audio.clone(),
        ));
        Harness {
            controller,
            links,
            credentials,
            audio,
        }
    }

    async fn connect(&mut self) -> FakeLink {
        self.controller.connect().await.expect("connect failed");
        let mut link = self.links.recv().await.expect("no link established");
        // First event after a connect is always the session configuration
        match next_event(&mut link).await {
            ClientEvent::SessionUpdate { .. } => {}
            other => panic!("expected session.update first, got {other:?}"),
        }
        link
    }
}

fn message_item(id: &str, role: &str) -> WireItem {
    WireItem {
        id: Some(id.to_string()),
        item_type: "message".to_string(),
        role: Some(role.to_string()),
        ..WireItem::default()
    }
}

#[tokio::test]
async fn connect_reaches_open_and_configures_session() {
    let mut h = Harness::build(settings());
    let _link = h.connect().await;
    assert_eq!(h.controller.phase(), Phase::Open);
    assert_eq!(h.credentials.mint_count(), 1);
}

#[tokio::test]
async fn deltas_accumulate_and_final_text_wins() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    link.inbound
        .send(ServerEvent::ConversationItemCreated {
            item: message_item("item_1", "assistant"),
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::AudioTranscriptDelta {
            item_id: "item_1".to_string(),
            delta: "Hel".to_string(),
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::AudioTranscriptDelta {
            item_id: "item_1".to_string(),
            delta: "lo".to_string(),
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::AudioTranscriptDone {
            item_id: "item_1".to_string(),
            transcript: "Hello there.".to_string(),
        })
        .await
        .unwrap();

    // Let the pump drain
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = h.controller.snapshot();
    assert_eq!(snap.items.len(), 1);
    assert_eq!(snap.items[0].text, "Hello there.");
    assert!(snap.items[0].finalized);
    assert_eq!(snap.items[0].role, Role::Assistant);
}

#[tokio::test]
async fn duplicate_item_create_is_tolerated() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    for _ in 0..2 {
        link.inbound
            .send(ServerEvent::ConversationItemCreated {
                item: message_item("dup", "user"),
            })
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.snapshot().items.len(), 1);
    assert_eq!(h.controller.conversation().anomaly_count(), 1);
    assert_eq!(h.controller.phase(), Phase::Open);
}

#[tokio::test]
async fn speech_and_audio_events_drive_activity_flags() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    link.inbound
        .send(ServerEvent::SpeechStarted {
            audio_start_ms: 0,
            item_id: None,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.controller.snapshot().listening);

    link.inbound
        .send(ServerEvent::SpeechStopped {
            audio_end_ms: 900,
            item_id: None,
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::AudioDelta {
            item_id: "i1".to_string(),
            delta: "AAAA".to_string(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = h.controller.snapshot();
    assert!(!snap.listening);
    assert!(snap.assistant_speaking);
}

#[tokio::test]
async fn vendor_error_is_recorded_without_closing() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    link.inbound
        .send(ServerEvent::Error {
            error: ApiError {
                error_type: "server_error".to_string(),
                code: None,
                message: "brief hiccup".to_string(),
            },
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.phase(), Phase::Open);
    assert_eq!(
        h.controller.snapshot().last_error.as_deref(),
        Some("brief hiccup")
    );
}

#[tokio::test]
async fn grounded_user_turn_updates_instructions_then_requests_response() {
    let mut h = Harness::build_with(settings(), |c| {
        c.with_reconnect(ReconnectPolicy::disabled())
            .with_retriever(Arc::new(FakeRetriever {
                result: Some("we close on sundays".to_string()),
            }))
    });
    let mut link = h.connect().await;

    link.inbound
        .send(ServerEvent::TranscriptionCompleted {
            item_id: "user_1".to_string(),
            transcript: "are you open sunday?".to_string(),
        })
        .await
        .unwrap();

    match next_event(&mut link).await {
        ClientEvent::SessionUpdate { session } => {
            let instructions = session.instructions.unwrap();
            assert!(instructions.contains("we close on sundays"));
        }
        other => panic!("expected grounded session.update, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
}

#[tokio::test]
async fn empty_retrieval_degrades_to_plain_response() {
    let mut h = Harness::build_with(settings(), |c| {
        c.with_reconnect(ReconnectPolicy::disabled())
            .with_retriever(Arc::new(FakeRetriever { result: None }))
    });
    let mut link = h.connect().await;

    link.inbound
        .send(ServerEvent::TranscriptionCompleted {
            item_id: "user_1".to_string(),
            transcript: "anything".to_string(),
        })
        .await
        .unwrap();

    // No instruction update, straight to the response request
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
}

#[tokio::test]
async fn tool_call_round_trip() {
    let mut registry = ToolRegistry::new();
    let profile = VisitorProfile::new();
    register_builtins(&mut registry, profile.clone());

    let mut h = Harness::build_with(settings(), |c| {
        c.with_reconnect(ReconnectPolicy::disabled())
            .with_tools(registry)
    });
    let mut link = h.connect().await;

    link.inbound
        .send(ServerEvent::OutputItemAdded {
            item: WireItem {
                id: Some("fc_1".to_string()),
                item_type: "function_call".to_string(),
                call_id: Some("call_1".to_string()),
                name: Some("save_visitor_name".to_string()),
                ..WireItem::default()
            },
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::FunctionCallArgumentsDone {
            call_id: "call_1".to_string(),
            arguments: r#"{"name": "Ada"}"#.to_string(),
            item_id: None,
        })
        .await
        .unwrap();

    match next_event(&mut link).await {
        ClientEvent::ConversationItemCreate { item } => {
            assert_eq!(item.item_type, "function_call_output");
            assert_eq!(item.call_id.as_deref(), Some("call_1"));
        }
        other => panic!("expected tool output, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
    assert_eq!(profile.get("name").as_deref(), Some("Ada"));
}

#[tokio::test]
async fn unregistered_tool_is_logged_and_session_survives() {
    let mut h = Harness::build(settings());
    let mut link = h.connect().await;

    link.inbound
        .send(ServerEvent::OutputItemAdded {
            item: WireItem {
                id: Some("fc_1".to_string()),
                item_type: "function_call".to_string(),
                call_id: Some("call_9".to_string()),
                name: Some("launch_rockets".to_string()),
                ..WireItem::default()
            },
        })
        .await
        .unwrap();
    link.inbound
        .send(ServerEvent::FunctionCallArgumentsDone {
            call_id: "call_9".to_string(),
            arguments: "{}".to_string(),
            item_id: None,
        })
        .await
        .unwrap();

    assert_no_event(&mut link, Duration::from_millis(200)).await;
    assert_eq!(h.controller.phase(), Phase::Open);
}

#[tokio::test]
async fn disconnect_closes_and_rejects_further_sends() {
    let mut h = Harness::build(settings());
    let _link = h.connect().await;

    h.controller.disconnect().await;
    assert_eq!(h.controller.phase(), Phase::Closed);
    assert!(matches!(
        h.controller.send_event(ClientEvent::ResponseCreate),
        Err(SessionError::NotReady(_))
    ));

    // Idempotent
    h.controller.disconnect().await;
    assert_eq!(h.controller.phase(), Phase::Closed);
}

#[tokio::test]
async fn disconnect_without_a_session_still_lands_in_closed() {
    let h = Harness::build(settings());
    assert_eq!(h.controller.phase(), Phase::Idle);
    h.controller.disconnect().await;
    assert_eq!(h.controller.phase(), Phase::Closed);
}

#[tokio::test]
async fn disconnect_after_failure_lands_in_closed() {
    let (transport, _links) = FakeTransport::new();
    let controller = SessionController::new(
        settings(),
        FakeCredentials::new(),
        transport,
        Arc::new(DeniedAudioSource),
    )
    .with_reconnect(ReconnectPolicy::disabled());

    let _ = controller.connect().await;
    assert_eq!(controller.phase(), Phase::Failed);

    // An observer awaiting closure on the phase watch must see it
    let mut phases = controller.subscribe_phase();
    controller.disconnect().await;
    wait_for_phase(&mut phases, Phase::Closed).await;
    assert_eq!(controller.phase(), Phase::Closed);
}

#[tokio::test]
async fn disconnect_clears_the_transcript() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    link.inbound
        .send(ServerEvent::ConversationItemCreated {
            item: message_item("item_1", "user"),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.snapshot().items.len(), 1);

    h.controller.disconnect().await;
    let snap = h.controller.snapshot();
    assert!(snap.items.is_empty());
    assert_eq!(snap.phase, Phase::Closed);
}

#[tokio::test]
async fn connect_while_open_is_rejected() {
    let mut h = Harness::build(settings());
    let _link = h.connect().await;
    assert!(matches!(
        h.controller.connect().await,
        Err(SessionError::AlreadyActive(_))
    ));
    assert_eq!(h.controller.phase(), Phase::Open);
}

#[tokio::test]
async fn disconnect_during_credential_fetch_discards_the_attempt() {
    let (transport, mut links) = FakeTransport::new();
    let credentials = FakeCredentials::slow(Duration::from_millis(500));
    let controller = SessionController::new(
        settings(),
        credentials.clone(),
        transport,
        TestAudioSource::new(),
    )
    .with_reconnect(ReconnectPolicy::disabled());

    let connecting = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.disconnect().await;

    assert!(matches!(
        connecting.await.unwrap(),
        Err(SessionError::Cancelled)
    ));
    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Closed);
    assert!(snap.items.is_empty());
    assert!(snap.last_error.is_none());
    // The discarded attempt never dialed
    assert!(links.try_recv().is_err());
}

#[tokio::test]
async fn denied_microphone_fails_the_attempt() {
    let (transport, _links) = FakeTransport::new();
    let controller = SessionController::new(
        settings(),
        FakeCredentials::new(),
        transport,
        Arc::new(DeniedAudioSource),
    )
    .with_reconnect(ReconnectPolicy::disabled());

    assert!(matches!(
        controller.connect().await,
        Err(SessionError::Media(_))
    ));
    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Failed);
    assert!(snap.last_error.is_some());
}

#[tokio::test]
async fn transport_loss_without_reconnect_fails_the_session() {
    let mut h = Harness::build(settings());
    let link = h.connect().await;

    link.closed.cancel();
    let mut phases = h.controller.subscribe_phase();
    wait_for_phase(&mut phases, Phase::Failed).await;
    assert!(h.controller.snapshot().last_error.is_some());
}

#[tokio::test]
async fn transport_loss_reconnects_with_a_fresh_credential() {
    let policy = ReconnectPolicy {
        enabled: true,
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let mut h = Harness::build_with(settings(), |c| c.with_reconnect(policy));
    let link = h.connect().await;

    link.closed.cancel();

    // A second connection appears, authenticated by a newly minted credential
    let mut relink = tokio::time::timeout(Duration::from_secs(2), h.links.recv())
        .await
        .expect("no reconnection attempt")
        .unwrap();
    assert!(matches!(
        next_event(&mut relink).await,
        ClientEvent::SessionUpdate { .. }
    ));
    let mut phases = h.controller.subscribe_phase();
    wait_for_phase(&mut phases, Phase::Open).await;
    assert_eq!(h.credentials.mint_count(), 2);
}

#[tokio::test]
async fn captured_audio_flows_and_mute_gates_it() {
    let mut h = Harness::build(settings());
    let mut link = h.connect().await;

    let tap = h.audio.latest_tap();
    tap.send(Bytes::from_static(b"pcm1")).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), link.frames.recv())
        .await
        .expect("no frame arrived")
        .unwrap();
    assert_eq!(&frame[..], b"pcm1");

    h.controller.set_muted(true).unwrap();
    h.controller.set_muted(true).unwrap();
    assert!(h.controller.is_muted());
    tap.send(Bytes::from_static(b"dropped")).await.unwrap();
    tokio::task::yield_now().await;

    h.controller.set_muted(false).unwrap();
    assert!(!h.controller.is_muted());
    tap.send(Bytes::from_static(b"pcm2")).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), link.frames.recv())
        .await
        .expect("no frame after unmute")
        .unwrap();
    assert_eq!(&frame[..], b"pcm2");
}

#[tokio::test]
async fn send_text_emits_item_and_response_request() {
    let mut h = Harness::build(settings());
    let mut link = h.connect().await;

    h.controller.send_text("hello there").unwrap();
    match next_event(&mut link).await {
        ClientEvent::ConversationItemCreate { item } => {
            assert_eq!(item.initial_text(), "hello there");
        }
        other => panic!("expected item create, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
}

#[tokio::test]
async fn push_to_talk_turn_commits_buffered_audio() {
    let mut h = Harness::build(settings());
    let mut link = h.connect().await;

    h.controller.begin_turn().unwrap();
    h.controller.end_turn().unwrap();
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::InputAudioBufferClear
    ));
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::InputAudioBufferCommit
    ));
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
}

#[tokio::test]
async fn grounded_manual_turn_requests_exactly_one_response() {
    let mut h = Harness::build_with(
        SessionSettings {
            idle_timeout_secs: 0,
            turn_mode: TurnMode::Manual,
            ..Default::default()
        },
        |c| {
            c.with_reconnect(ReconnectPolicy::disabled())
                .with_retriever(Arc::new(FakeRetriever {
                    result: Some("hours are nine to five".to_string()),
                }))
        },
    );
    let mut link = h.connect().await;

    // The commit alone goes out; the response waits for grounding
    h.controller.end_turn().unwrap();
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::InputAudioBufferCommit
    ));
    assert_no_event(&mut link, Duration::from_millis(200)).await;

    link.inbound
        .send(ServerEvent::TranscriptionCompleted {
            item_id: "user_1".to_string(),
            transcript: "when are you open?".to_string(),
        })
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::SessionUpdate { .. }
    ));
    assert!(matches!(
        next_event(&mut link).await,
        ClientEvent::ResponseCreate
    ));
    assert_no_event(&mut link, Duration::from_millis(200)).await;
}

#[tokio::test(start_paused = true)]
async fn idle_session_closes_itself() {
    let mut h = Harness::build(SessionSettings {
        idle_timeout_secs: 30,
        ..Default::default()
    });
    let link = h.connect().await;
    assert_eq!(h.controller.phase(), Phase::Open);

    link.inbound
        .send(ServerEvent::ConversationItemCreated {
            item: message_item("item_1", "user"),
        })
        .await
        .unwrap();

    // Well past the idle limit in virtual time
    let mut phases = h.controller.subscribe_phase();
    tokio::time::timeout(Duration::from_secs(120), async {
        while *phases.borrow() != Phase::Closed {
            phases.changed().await.unwrap();
        }
    })
    .await
    .expect("session did not close on idle");
    assert!(h.controller.snapshot().items.is_empty());
}
