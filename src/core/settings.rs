//! Session settings.
//!
//! High-level configuration a caller supplies when opening a session,
//! separate from the wire form: [`SessionSettings::to_wire`] builds the
//! `session.update` payload sent once the control channel opens.

use serde::{Deserialize, Serialize};

use crate::core::events::{InputAudioTranscription, SessionConfig, ToolDef, TurnDetection};

/// How turn boundaries are decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Server-side voice activity detection decides turn boundaries.
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        threshold: f32,
        /// Audio included before detected speech, in ms
        prefix_padding_ms: u32,
        /// Trailing silence that ends a turn, in ms
        silence_duration_ms: u32,
        /// Whether the vendor auto-creates a response at turn end
        create_response: bool,
    },
    /// The caller commits turns explicitly (push-to-talk).
    Manual,
}

impl Default for TurnMode {
    fn default() -> Self {
        TurnMode::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

/// Settings applied to a realtime session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// System instructions for the assistant
    pub instructions: String,
    /// Voice for audio output
    pub voice: String,
    /// Turn boundary mode
    #[serde(default)]
    pub turn_mode: TurnMode,
    /// Transcription model for user speech
    pub transcription_model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum response tokens
    pub max_response_tokens: i32,
    /// Greeting the assistant speaks after the session opens, if any
    #[serde(default)]
    pub greeting: Option<String>,
    /// Idle timeout in seconds; the session closes after this long without
    /// user or assistant activity. Zero disables the timer.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout() -> u64 {
    45
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            instructions: "You are a helpful voice assistant.".to_string(),
            voice: "alloy".to_string(),
            turn_mode: TurnMode::default(),
            transcription_model: "whisper-1".to_string(),
            temperature: 0.8,
            max_response_tokens: 4096,
            greeting: None,
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl SessionSettings {
    /// Build the wire configuration for `session.update`.
    ///
    /// `tools` comes from the controller's registry; `instructions_override`
    /// lets grounded instructions replace the base prompt mid-session.
    pub fn to_wire(&self, tools: Vec<ToolDef>, instructions_override: Option<&str>) -> SessionConfig {
        let turn_detection = match &self.turn_mode {
            TurnMode::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                create_response,
            } => TurnDetection::ServerVad {
                threshold: Some(*threshold),
                prefix_padding_ms: Some(*prefix_padding_ms),
                silence_duration_ms: Some(*silence_duration_ms),
                create_response: Some(*create_response),
                interrupt_response: Some(true),
            },
            TurnMode::Manual => TurnDetection::None {},
        };

        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());

        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(
                instructions_override
                    .unwrap_or(&self.instructions)
                    .to_string(),
            ),
            voice: Some(self.voice.clone()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self.transcription_model.clone(),
            }),
            turn_detection: Some(turn_detection),
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice,
            temperature: Some(self.temperature),
            max_response_output_tokens: Some(self.max_response_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_vad_tuning() {
        let settings = SessionSettings::default();
        match settings.turn_mode {
            TurnMode::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                create_response,
            } => {
                assert_eq!(threshold, 0.5);
                assert_eq!(prefix_padding_ms, 300);
                assert_eq!(silence_duration_ms, 500);
                assert!(create_response);
            }
            TurnMode::Manual => panic!("default should be server VAD"),
        }
        assert_eq!(settings.idle_timeout_secs, 45);
    }

    #[test]
    fn manual_mode_disables_turn_detection() {
        let settings = SessionSettings {
            turn_mode: TurnMode::Manual,
            ..Default::default()
        };
        let wire = settings.to_wire(Vec::new(), None);
        let json = serde_json::to_string(&wire.turn_detection).unwrap();
        assert!(json.contains("\"none\""));
    }

    #[test]
    fn override_replaces_instructions() {
        let settings = SessionSettings {
            instructions: "base".to_string(),
            ..Default::default()
        };
        let wire = settings.to_wire(Vec::new(), Some("grounded"));
        assert_eq!(wire.instructions.as_deref(), Some("grounded"));
    }

    #[test]
    fn empty_tools_are_omitted() {
        let wire = SessionSettings::default().to_wire(Vec::new(), None);
        assert!(wire.tools.is_none());
    }
}
