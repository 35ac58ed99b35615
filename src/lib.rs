pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod knowledge;
pub mod registry;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::*;
pub use errors::{AppError, AppResult};
pub use registry::{MintedSession, SessionRegistry};
pub use state::AppState;
