//! Avatar adapter. The avatar renders a face lip-synced to audio we hand
//! it; its own microphone input stays disabled because the voice agent
//! owns the microphone.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use cheffy_relay::microphone::SAMPLE_RATE;

use crate::error::ClientError;

/// Format of the audio stream fed into the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// What the voice agent emits: 16 kHz mono s16le.
    pub const AGENT_PCM: Self = Self {
        encoding: "pcm_s16le",
        sample_rate: SAMPLE_RATE,
        channels: 1,
    };
}

#[async_trait]
pub trait AvatarClient: Send + Sync {
    /// Open a session authorised by a short-lived session token, with an
    /// agent audio input stream in `format`.
    async fn open(&self, session_token: &str, format: AudioFormat) -> Result<Box<dyn AvatarSession>, ClientError>;
}

#[async_trait]
pub trait AvatarSession: Send {
    /// Queue one base64 PCM chunk for lip-sync.
    fn send_audio_chunk(&mut self, base64_pcm: &str) -> Result<(), ClientError>;

    /// Mark the end of the current utterance.
    fn end_sequence(&mut self);

    async fn stop(&mut self) -> Result<(), ClientError>;
}

/// Avatar that renders nothing. It validates and counts the audio it is
/// given, which is enough for terminal sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessAvatar;

#[async_trait]
impl AvatarClient for HeadlessAvatar {
    async fn open(&self, session_token: &str, format: AudioFormat) -> Result<Box<dyn AvatarSession>, ClientError> {
        if session_token.is_empty() {
            return Err(ClientError::Avatar("empty session token".into()));
        }
        info!(
            "Headless avatar session opened ({} {}Hz x{})",
            format.encoding, format.sample_rate, format.channels
        );
        Ok(Box::new(HeadlessSession::default()))
    }
}

#[derive(Debug, Default)]
pub struct HeadlessSession {
    chunks: u64,
    bytes: u64,
    sequences: u64,
    stopped: bool,
}

impl HeadlessSession {
    pub fn bytes_received(&self) -> u64 {
        self.bytes
    }
}

#[async_trait]
impl AvatarSession for HeadlessSession {
    fn send_audio_chunk(&mut self, base64_pcm: &str) -> Result<(), ClientError> {
        if self.stopped {
            return Err(ClientError::Avatar("session stopped".into()));
        }
        let pcm = STANDARD
            .decode(base64_pcm)
            .map_err(|e| ClientError::Avatar(format!("invalid audio chunk: {}", e)))?;
        self.chunks += 1;
        self.bytes += pcm.len() as u64;
        Ok(())
    }

    fn end_sequence(&mut self) {
        self.sequences += 1;
        debug!("Avatar sequence {} ended after {} chunks", self.sequences, self.chunks);
    }

    async fn stop(&mut self) -> Result<(), ClientError> {
        if !self.stopped {
            self.stopped = true;
            info!(
                "Headless avatar stopped: {} chunks, {} bytes, {} sequences",
                self.chunks, self.bytes, self.sequences
            );
        }
        Ok(())
    }
}
