//! Platform microphone capture using cpal.
//!
//! Captures at the device's native rate and converts to 16 kHz mono s16le
//! for the voice agent. The cpal stream is not `Send`, so it lives on a
//! dedicated thread for as long as capture runs.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::microphone::{MicrophoneCapture, SAMPLE_RATE, downsample, encode_pcm16, to_mono};

const CHUNK_CAPACITY: usize = 64;

pub struct CpalMicrophone {
    /// `None` selects the host's default input.
    device_name: Option<String>,
    worker: Option<(std_mpsc::Sender<()>, JoinHandle<()>)>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }

    pub fn list_input_devices() -> Result<Vec<String>, RelayError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| RelayError::Microphone(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

fn open_stream(device_name: Option<&str>, tx: mpsc::Sender<Vec<u8>>) -> Result<cpal::Stream, RelayError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| RelayError::Microphone(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| RelayError::Microphone(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| RelayError::Microphone("no default input device".into()))?
    };

    let default_config = device
        .default_input_config()
        .map_err(|e| RelayError::Microphone(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "Microphone native config: {}Hz, {} channels -> {}Hz mono",
        native_rate, native_channels, SAMPLE_RATE
    );

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = downsample(&mono, native_rate, SAMPLE_RATE);

                // Never block the audio thread.
                if tx.try_send(encode_pcm16(&samples)).is_err() {
                    debug!("Microphone channel full, dropping chunk");
                }
            },
            move |err| {
                error!("Microphone stream error: {err}");
            },
            None,
        )
        .map_err(|e| RelayError::Microphone(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| RelayError::Microphone(format!("failed to start input stream: {e}")))?;

    Ok(stream)
}

impl MicrophoneCapture for CpalMicrophone {
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RelayError> {
        if self.worker.is_some() {
            return Err(RelayError::Microphone("capture already started".into()));
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CAPACITY);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), RelayError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let thread = std::thread::Builder::new()
            .name("cheffy-mic".into())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), chunk_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until stop() or the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("Microphone capture stopped");
            })
            .map_err(|e| RelayError::Microphone(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                self.worker = Some((stop_tx, thread));
                Ok(chunk_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(RelayError::Microphone("capture thread exited".into())),
        }
    }

    fn stop(&mut self) {
        if let Some((stop_tx, thread)) = self.worker.take() {
            let _ = stop_tx.send(());
            let _ = thread.join();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
