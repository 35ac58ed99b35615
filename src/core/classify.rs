//! Server event classification.
//!
//! A pure, total mapping from raw [`ServerEvent`]s to the small vocabulary of
//! state mutations the session controller applies. Classification never
//! performs IO and never fails: events with no state consequence map to
//! [`Classification::Ignored`].

use crate::core::events::{ServerEvent, WireItem};

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local user
    User,
    /// The remote assistant
    Assistant,
    /// System-injected content
    System,
}

impl Role {
    fn from_wire(role: Option<&str>) -> Role {
        match role {
            Some("user") => Role::User,
            Some("system") => Role::System,
            _ => Role::Assistant,
        }
    }
}

/// Outcome of classifying a single server event.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Vendor reported an error
    Error {
        /// Human-readable message
        message: String,
    },
    /// The remote session is established
    SessionReady {
        /// Vendor session id
        session_id: String,
    },
    /// A conversation item appeared
    ItemCreated {
        /// Item id
        id: String,
        /// Item role
        role: Role,
        /// Initial text, possibly empty
        text: String,
    },
    /// A conversation item was removed
    ItemDeleted {
        /// Item id
        item_id: String,
    },
    /// Incremental text for an item
    TextDelta {
        /// Item id
        item_id: String,
        /// Appended fragment
        delta: String,
    },
    /// Final text for an item, replacing any accumulated deltas
    TextDone {
        /// Item id
        item_id: String,
        /// Full text
        text: String,
        /// True when this is the user's finished utterance
        user_turn: bool,
    },
    /// User speech activity changed
    Listening(bool),
    /// Assistant audio playback activity changed
    AssistantSpeaking(bool),
    /// A function call item appeared; records the call-id to name mapping
    ToolCallPending {
        /// Call id
        call_id: String,
        /// Function name
        name: String,
    },
    /// A function call's arguments are complete and it should be dispatched
    ToolCallDone {
        /// Call id
        call_id: String,
        /// Arguments as a JSON string
        arguments: String,
    },
    /// No state consequence
    Ignored,
}

/// Classify a server event into its state consequence.
pub fn classify(event: &ServerEvent) -> Classification {
    match event {
        ServerEvent::Error { error } => Classification::Error {
            message: error.message.clone(),
        },

        ServerEvent::SessionCreated { session } => Classification::SessionReady {
            session_id: session.id.clone(),
        },

        ServerEvent::SpeechStarted { .. } => Classification::Listening(true),
        ServerEvent::SpeechStopped { .. } => Classification::Listening(false),

        ServerEvent::AudioDelta { .. } => Classification::AssistantSpeaking(true),
        ServerEvent::AudioDone { .. } => Classification::AssistantSpeaking(false),

        ServerEvent::ConversationItemCreated { item } => classify_item(item),
        ServerEvent::OutputItemAdded { item } => classify_item(item),

        ServerEvent::ConversationItemDeleted { item_id } => Classification::ItemDeleted {
            item_id: item_id.clone(),
        },

        ServerEvent::TextDelta { item_id, delta }
        | ServerEvent::AudioTranscriptDelta { item_id, delta } => Classification::TextDelta {
            item_id: item_id.clone(),
            delta: delta.clone(),
        },

        ServerEvent::TextDone { item_id, text } => Classification::TextDone {
            item_id: item_id.clone(),
            text: text.clone(),
            user_turn: false,
        },

        ServerEvent::AudioTranscriptDone { item_id, transcript } => Classification::TextDone {
            item_id: item_id.clone(),
            text: transcript.clone(),
            user_turn: false,
        },

        ServerEvent::TranscriptionCompleted { item_id, transcript } => Classification::TextDone {
            item_id: item_id.clone(),
            text: transcript.clone(),
            user_turn: true,
        },

        ServerEvent::FunctionCallArgumentsDone {
            call_id, arguments, ..
        } => Classification::ToolCallDone {
            call_id: call_id.clone(),
            arguments: arguments.clone(),
        },

        ServerEvent::SessionUpdated { .. }
        | ServerEvent::ResponseDone { .. }
        | ServerEvent::Unknown => Classification::Ignored,
    }
}

/// Classify a newly announced item. Function-call items become pending tool
/// calls; message items surface as created conversation items; anything else
/// (including function_call_output echoes) is ignored.
fn classify_item(item: &WireItem) -> Classification {
    match item.item_type.as_str() {
        "function_call" => match (item.call_id.as_deref(), item.name.as_deref()) {
            (Some(call_id), Some(name)) => Classification::ToolCallPending {
                call_id: call_id.to_string(),
                name: name.to_string(),
            },
            _ => Classification::Ignored,
        },
        "message" => match item.id.as_deref() {
            Some(id) => Classification::ItemCreated {
                id: id.to_string(),
                role: Role::from_wire(item.role.as_deref()),
                text: item.initial_text(),
            },
            None => Classification::Ignored,
        },
        _ => Classification::Ignored,
    }
}
