pub mod audio;
pub mod classify;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod events;
pub mod grounding;
pub mod session;
pub mod settings;
pub mod tools;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{AudioCapture, AudioSource, ChannelAudioSource, MuteControl, NullAudioSource};
pub use classify::{Classification, Role, classify};
pub use conversation::{ConversationSnapshot, ConversationState, Item};
pub use credentials::{CredentialProvider, EphemeralCredential, HttpCredentialProvider};
pub use error::{SessionError, ToolError};
pub use events::{ClientEvent, ServerEvent, SessionConfig, ToolDef};
pub use grounding::{ContextRetriever, HttpContextRetriever, grounded_instructions};
pub use session::{Phase, SessionController};
pub use settings::{SessionSettings, TurnMode};
pub use tools::{ToolRegistry, VisitorProfile, register_builtins};
pub use transport::{
    ChannelState, ControlChannel, ReconnectPolicy, Transport, TransportHandle, WsTransport,
};
