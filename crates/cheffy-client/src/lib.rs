//! Client side of a Cheffy session: the avatar adapter, the HTTP backend and
//! the orchestrator that ties them to the voice-agent relay.

pub mod avatar;
pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod transcript;

pub use error::ClientError;
pub use orchestrator::{Orchestrator, OrchestratorListener, Phase};
