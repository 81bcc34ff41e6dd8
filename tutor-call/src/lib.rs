pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod rooms;
pub mod session;
pub mod signaling;
pub mod suggestions;
pub mod transcript;

#[cfg(test)]
mod testing;

pub use coordinator::{CallCoordinator, CallHandle};
pub use error::{CallError, MediaAccessError};
pub use session::{CallSession, ConnectionPhase, SessionConfig, SessionDeps, SessionSnapshot};
