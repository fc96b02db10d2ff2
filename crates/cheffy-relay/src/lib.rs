//! Bridge between local microphone audio and a remote conversational voice
//! agent over a WebSocket.

#[cfg(feature = "microphone")]
pub mod capture;
pub mod connection;
pub mod error;
pub mod event;
pub mod microphone;

pub use connection::{RelayConfig, RelayHandle, connect};
pub use error::RelayError;
pub use event::AgentEvent;
pub use microphone::{ChannelMicrophone, MicrophoneCapture, MicrophoneFeed};
