//! Session controller error types.

use thiserror::Error;

/// Errors surfaced by the session controller and its collaborators.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential minting failed or the backend rejected the request
    #[error("credential error: {0}")]
    Credential(String),

    /// Microphone capture could not be opened
    #[error("media error: {0}")]
    Media(String),

    /// Control channel or transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Send attempted while the channel is not open
    #[error("channel not ready: {0}")]
    NotReady(String),

    /// `connect` called while a session is already active
    #[error("session already active (phase {0})")]
    AlreadyActive(String),

    /// The operation was superseded by a disconnect or a newer connect
    #[error("operation cancelled")]
    Cancelled,

    /// A collaborator did not respond in time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Knowledge retrieval failed
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Tool dispatch failed
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Event serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from tool handlers.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model requested a tool name with no registered handler
    #[error("no handler registered for tool '{0}'")]
    Unregistered(String),

    /// Arguments did not match the tool's schema
    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments {
        /// Tool name
        name: String,
        /// What was wrong
        reason: String,
    },

    /// The handler itself failed
    #[error("tool '{name}' failed: {reason}")]
    Execution {
        /// Tool name
        name: String,
        /// Failure description
        reason: String,
    },
}
