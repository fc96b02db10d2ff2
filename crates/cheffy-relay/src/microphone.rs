//! Microphone capture seam.
//!
//! The relay only needs a stream of 16 kHz mono signed 16-bit little-endian
//! PCM chunks and a way to stop it. [`ChannelMicrophone`] feeds that stream
//! from code; the `microphone` feature adds a platform capture backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RelayError;

/// Sample rate the voice agent expects.
pub const SAMPLE_RATE: u32 = 16_000;

pub trait MicrophoneCapture: Send {
    /// Begin capturing. Each received chunk is raw s16le PCM at [`SAMPLE_RATE`].
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RelayError>;

    /// Stop capturing. Safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Capture driven by a [`MicrophoneFeed`] instead of hardware.
pub struct ChannelMicrophone {
    source: Option<mpsc::Receiver<Vec<u8>>>,
    running: Arc<AtomicBool>,
}

/// Producer side of a [`ChannelMicrophone`].
#[derive(Clone)]
pub struct MicrophoneFeed {
    tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
}

impl ChannelMicrophone {
    pub fn new(capacity: usize) -> (Self, MicrophoneFeed) {
        let (tx, rx) = mpsc::channel(capacity);
        let running = Arc::new(AtomicBool::new(false));
        (
            Self {
                source: Some(rx),
                running: running.clone(),
            },
            MicrophoneFeed { tx, running },
        )
    }
}

impl MicrophoneCapture for ChannelMicrophone {
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RelayError> {
        let rx = self
            .source
            .take()
            .ok_or_else(|| RelayError::Microphone("capture already started".into()))?;
        self.running.store(true, Ordering::Release);
        Ok(rx)
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("Channel microphone stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl MicrophoneFeed {
    /// Queue one chunk. Returns false once capture is stopped or the
    /// consumer is gone.
    pub async fn push(&self, chunk: Vec<u8>) -> bool {
        if !self.is_running() {
            return false;
        }
        self.tx.send(chunk).await.is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Average interleaved channels down to mono.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler. Speech energy sits below 8 kHz, so no
/// anti-alias filter is applied on the way down to 16 kHz.
pub fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

/// Clamp float samples to [-1, 1] and encode as s16le bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
