//! Control-channel wire message types.
//!
//! The vendor realtime API exchanges JSON events over an ordered, reliable
//! control channel. All events carry a `type` discriminator. Outbound
//! (client) and inbound (server) vocabularies are separate enums; inbound
//! decoding is total — discriminators this crate does not recognize land in
//! [`ServerEvent::Unknown`] instead of failing the decode, since the vendor's
//! event set can grow.
//!
//! # Protocol overview
//!
//! Client events (sent to the vendor):
//! - session.update - Update session configuration
//! - input_audio_buffer.append / commit / clear - Audio buffer control
//! - conversation.item.create - Add item (user message or tool output)
//! - conversation.item.delete - Delete conversation item
//! - response.create / response.cancel - Response lifecycle
//!
//! Server events (received from the vendor): enumerated on [`ServerEvent`].

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration (wire form)
// =============================================================================

/// Session configuration payload for `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<i32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration (wire form).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create a response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt model output on speech
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
        /// Whether to create a response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None {},
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items (wire form)
// =============================================================================

/// Conversation item as carried on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireItem {
    /// Item ID (vendor-issued for inbound items)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type ("message", "function_call", "function_call_output")
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl WireItem {
    /// Best-effort initial text of a message item (first text/transcript part).
    pub fn initial_text(&self) -> String {
        self.content
            .as_deref()
            .and_then(|parts| {
                parts
                    .iter()
                    .find_map(|p| p.text.clone().or_else(|| p.transcript.clone()))
            })
            .unwrap_or_default()
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to the vendor)
// =============================================================================

/// Client events sent over the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer (manual turn end)
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item (user message or tool output)
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: WireItem,
    },

    /// Delete a conversation item
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        /// Item ID
        item_id: String,
    },

    /// Request a model response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the in-flight response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw PCM bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Create a user text message item.
    pub fn user_text(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: WireItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: Some(text.to_string()),
                    transcript: None,
                }]),
                ..Default::default()
            },
        }
    }

    /// Create a tool output item correlated by call id.
    pub fn tool_output(call_id: &str, output: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: WireItem {
                item_type: "function_call_output".to_string(),
                call_id: Some(call_id.to_string()),
                output: Some(output.to_string()),
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Server Events (received from the vendor)
// =============================================================================

/// Server events received over the control channel.
///
/// Decoding is total: an unfamiliar `type` maps to [`ServerEvent::Unknown`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Vendor-reported error
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: SessionInfo,
    },

    /// Session configuration updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: SessionInfo,
    },

    /// VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID the speech will attach to
        #[serde(default)]
        item_id: Option<String>,
    },

    /// VAD detected the end of user speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Created item
        item: WireItem,
    },

    /// Conversation item deleted
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        /// Item ID
        item_id: String,
    },

    /// Input audio transcription completed (final user utterance text)
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Transcript text
        transcript: String,
    },

    /// Text delta for an assistant item
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Item ID
        item_id: String,
        /// Text delta
        delta: String,
    },

    /// Final text for an assistant item
    #[serde(rename = "response.text.done")]
    TextDone {
        /// Item ID
        item_id: String,
        /// Full text
        text: String,
    },

    /// Audio transcript delta for an assistant item
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        item_id: String,
        /// Transcript delta
        delta: String,
    },

    /// Final audio transcript for an assistant item
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Item ID
        item_id: String,
        /// Full transcript
        transcript: String,
    },

    /// Audio playback delta (assistant is speaking)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Item ID
        item_id: String,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio playback complete for an item
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Item ID
        item_id: String,
    },

    /// Output item added to a response (carries function-call names)
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Item
        item: WireItem,
    },

    /// Function call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Call ID
        call_id: String,
        /// Full arguments (JSON string)
        arguments: String,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Response generation complete
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: ResponseInfo,
    },

    /// Any discriminator this crate does not recognize.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta payload.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Vendor-reported error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Session information as reported by the vendor.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: String,
    /// Model in use
    #[serde(default)]
    pub model: Option<String>,
    /// Credential expiry timestamp (unix seconds)
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Response summary carried on `response.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: String,
}

// =============================================================================
// Tests
// =============================================================================
