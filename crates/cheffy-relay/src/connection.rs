use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use cheffy_types::events::{AgentFrame, ClientControl, ClientFrame};

use crate::error::RelayError;
use crate::event::AgentEvent;
use crate::microphone::MicrophoneCapture;

pub const DEFAULT_AGENT_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedMicrophone = Arc<Mutex<Option<Box<dyn MicrophoneCapture>>>>;

/// Where to reach the voice agent.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub agent_id: String,
    pub base_url: String,
}

impl RelayConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            base_url: DEFAULT_AGENT_URL.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| RelayError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.query_pairs_mut().append_pair("agent_id", &self.agent_id);
        Ok(url)
    }
}

/// What to do with one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Emit(AgentEvent),
    Reply(ClientFrame),
    Ignore,
}

/// Decode one inbound frame. The frame `type` alone decides the event;
/// frames with a missing or empty payload are ignored.
pub fn decode_frame(text: &str) -> Result<Inbound, RelayError> {
    let frame: AgentFrame = serde_json::from_str(text).map_err(|e| RelayError::Parse(e.to_string()))?;

    let inbound = match frame {
        AgentFrame::Audio { audio_event } => audio_event
            .and_then(|e| e.audio_base_64)
            .filter(|audio| !audio.is_empty())
            .map(|audio| Inbound::Emit(AgentEvent::Audio(audio))),
        AgentFrame::AgentResponse { agent_response_event } => agent_response_event
            .and_then(|e| e.agent_response)
            .filter(|text| !text.is_empty())
            .map(|text| Inbound::Emit(AgentEvent::AgentResponse(text))),
        AgentFrame::UserTranscript {
            user_transcription_event,
        } => user_transcription_event
            .and_then(|e| e.user_transcript)
            .filter(|text| !text.is_empty())
            .map(|text| Inbound::Emit(AgentEvent::UserTranscript(text))),
        AgentFrame::Interruption { .. } => Some(Inbound::Emit(AgentEvent::Interrupt)),
        AgentFrame::Ping { ping_event } => ping_event
            .and_then(|e| e.event_id)
            .filter(|id| !id.is_null())
            .map(|event_id| Inbound::Reply(ClientFrame::Control(ClientControl::Pong { event_id }))),
        AgentFrame::Other => None,
    };

    Ok(inbound.unwrap_or(Inbound::Ignore))
}

/// Owner's handle on a live relay. Dropping it tears the relay down.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    microphone: SharedMicrophone,
    pump: JoinHandle<()>,
    torn_down: AtomicBool,
}

impl RelayHandle {
    /// Stop the microphone and close the socket. Safe to call repeatedly and
    /// after the agent already hung up.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            trace!("Relay already torn down");
            return;
        }

        release_microphone(&self.microphone);
        self.pump.abort();
        let _ = self.shutdown.send(true);
        info!("Voice agent relay torn down");
    }

    /// True once the socket task has exited.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock_microphone(microphone: &SharedMicrophone) -> MutexGuard<'_, Option<Box<dyn MicrophoneCapture>>> {
    microphone.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn release_microphone(microphone: &SharedMicrophone) {
    if let Some(mut mic) = lock_microphone(microphone).take() {
        mic.stop();
        debug!("Microphone released");
    }
}

fn report(events: &mpsc::UnboundedSender<AgentEvent>, error: RelayError) -> RelayError {
    warn!("Relay error: {}", error);
    let _ = events.send(AgentEvent::Error(error.clone()));
    error
}

/// Open the agent socket, start the microphone and begin relaying.
///
/// `Ready` is the first event sent on success. A failure before that point
/// is both reported on `events` and returned.
pub async fn connect(
    config: &RelayConfig,
    mut microphone: Box<dyn MicrophoneCapture>,
    events: mpsc::UnboundedSender<AgentEvent>,
) -> Result<RelayHandle, RelayError> {
    let url = config.endpoint()?;
    info!("Connecting to voice agent {}", config.agent_id);

    let (mut socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| report(&events, RelayError::Socket(e.to_string())))?;

    let chunks = match microphone.start() {
        Ok(chunks) => chunks,
        Err(e) => {
            let _ = socket.close(None).await;
            return Err(report(&events, e));
        }
    };

    let microphone: SharedMicrophone = Arc::new(Mutex::new(Some(microphone)));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let _ = events.send(AgentEvent::Ready);
    info!("Voice agent connected, microphone streaming");

    tokio::spawn(run_socket(socket, outbound_rx, shutdown_rx, events, microphone.clone()));
    let pump = tokio::spawn(pump_microphone(chunks, outbound_tx));

    Ok(RelayHandle {
        shutdown: shutdown_tx,
        microphone,
        pump,
        torn_down: AtomicBool::new(false),
    })
}

/// Forward captured PCM as `user_audio_chunk` frames. Fire-and-forget.
async fn pump_microphone(mut chunks: mpsc::Receiver<Vec<u8>>, outbound: mpsc::UnboundedSender<String>) {
    let mut sent: u64 = 0;
    while let Some(chunk) = chunks.recv().await {
        let frame = ClientFrame::Audio {
            user_audio_chunk: STANDARD.encode(&chunk),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode audio frame: {}", e);
                continue;
            }
        };
        if outbound.send(text).is_err() {
            break;
        }
        sent += 1;
    }
    debug!("Microphone pump finished after {} chunks", sent);
}

/// Single owner of the socket: reads agent frames, writes outbound frames,
/// and closes on shutdown. Always ends with the microphone released and a
/// `Disconnected` event.
async fn run_socket(
    socket: Socket,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<AgentEvent>,
    microphone: SharedMicrophone,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(Inbound::Emit(event)) => {
                            let _ = events.send(event);
                        }
                        Ok(Inbound::Reply(frame)) => {
                            let Ok(reply) = serde_json::to_string(&frame) else {
                                continue;
                            };
                            if let Err(e) = write.send(Message::Text(reply.into())).await {
                                report(&events, RelayError::Socket(e.to_string()));
                                break;
                            }
                        }
                        Ok(Inbound::Ignore) => {}
                        Err(e) => {
                            let raw: String = text.chars().take(200).collect();
                            warn!("Bad agent frame: {} -- raw: {}", e, raw);
                            let _ = events.send(AgentEvent::Error(e));
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Agent closed the socket: {:?}", frame);
                        break;
                    }
                    None => break,
                    // Binary and protocol-level ping/pong frames are handled by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        report(&events, RelayError::Socket(e.to_string()));
                        break;
                    }
                }
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    report(&events, RelayError::Socket(e.to_string()));
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    release_microphone(&microphone);
    let _ = events.send(AgentEvent::Disconnected);
    info!("Voice agent disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use crate::microphone::{ChannelMicrophone, MicrophoneFeed};

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> AgentEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("event channel closed")
    }

    /// Bind a one-shot agent server and return its URL plus the accepted socket.
    async fn agent_server() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/convai/conversation", listener.local_addr().unwrap());
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (url, accept)
    }

    async fn relay(url: &str) -> (RelayHandle, MicrophoneFeed, mpsc::UnboundedReceiver<AgentEvent>) {
        let (mic, feed) = ChannelMicrophone::new(8);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = connect(&RelayConfig::new("agent-1").with_base_url(url), Box::new(mic), tx)
            .await
            .unwrap();
        (handle, feed, rx)
    }

    async fn next_json(server: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), server.next())
                .await
                .expect("timed out waiting for client frame")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test]
    fn endpoint_carries_agent_id() {
        let url = RelayConfig::new("abc 123").endpoint().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=abc+123"
        );
        assert!(matches!(
            RelayConfig::new("x").with_base_url("not a url").endpoint(),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn decodes_by_frame_type() {
        assert_eq!(
            decode_frame(r#"{"type":"user_transcript","user_transcription_event":{"user_transcript":"hi"}}"#).unwrap(),
            Inbound::Emit(AgentEvent::UserTranscript("hi".into()))
        );
        assert_eq!(
            decode_frame(r#"{"type":"agent_response","agent_response_event":{"agent_response":"hello"}}"#).unwrap(),
            Inbound::Emit(AgentEvent::AgentResponse("hello".into()))
        );
        assert_eq!(
            decode_frame(r#"{"type":"interruption","interruption_event":{"event_id":4}}"#).unwrap(),
            Inbound::Emit(AgentEvent::Interrupt)
        );
        assert_eq!(
            decode_frame(r#"{"type":"vad_score","vad_score_event":{"vad_score":0.9}}"#).unwrap(),
            Inbound::Ignore
        );
    }

    #[test]
    fn empty_payloads_are_ignored() {
        assert_eq!(decode_frame(r#"{"type":"audio","audio_event":{"audio_base_64":""}}"#).unwrap(), Inbound::Ignore);
        assert_eq!(decode_frame(r#"{"type":"user_transcript"}"#).unwrap(), Inbound::Ignore);
        assert_eq!(decode_frame(r#"{"type":"ping","ping_event":{}}"#).unwrap(), Inbound::Ignore);
    }

    #[test]
    fn ping_yields_pong_reply() {
        let inbound = decode_frame(r#"{"type":"ping","ping_event":{"event_id":42,"ping_ms":30}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply(ClientFrame::Control(ClientControl::Pong { event_id: json!(42) }))
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(decode_frame("not json"), Err(RelayError::Parse(_))));
        assert!(matches!(decode_frame(r#"{"no_type":true}"#), Err(RelayError::Parse(_))));
    }

    #[tokio::test]
    async fn relays_audio_out_and_events_in() {
        let (url, accept) = agent_server().await;
        let (handle, feed, mut events) = relay(&url).await;
        let mut server = accept.await.unwrap();

        assert_eq!(next_event(&mut events).await, AgentEvent::Ready);

        assert!(feed.push(vec![1, 2, 3]).await);
        assert_eq!(next_json(&mut server).await, json!({ "user_audio_chunk": "AQID" }));

        for frame in [
            json!({ "type": "conversation_initiation_metadata", "conversation_initiation_metadata_event": {} }),
            json!({ "type": "user_transcript", "user_transcription_event": { "user_transcript": "I have chicken" } }),
            json!({ "type": "agent_response", "agent_response_event": { "agent_response": "Let's cook" } }),
            json!({ "type": "audio", "audio_event": { "audio_base_64": "UklGRg==", "event_id": 1 } }),
            json!({ "type": "interruption", "interruption_event": { "event_id": 2 } }),
            json!({ "type": "ping", "ping_event": { "event_id": 9 } }),
        ] {
            server.send(Message::Text(frame.to_string().into())).await.unwrap();
        }

        assert_eq!(next_event(&mut events).await, AgentEvent::UserTranscript("I have chicken".into()));
        assert_eq!(next_event(&mut events).await, AgentEvent::AgentResponse("Let's cook".into()));
        assert_eq!(next_event(&mut events).await, AgentEvent::Audio("UklGRg==".into()));
        assert_eq!(next_event(&mut events).await, AgentEvent::Interrupt);
        assert_eq!(next_json(&mut server).await, json!({ "type": "pong", "event_id": 9 }));

        handle.teardown();
    }

    #[tokio::test]
    async fn malformed_frame_reports_and_keeps_socket_open() {
        let (url, accept) = agent_server().await;
        let (handle, _feed, mut events) = relay(&url).await;
        let mut server = accept.await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Ready);

        server.send(Message::Text("{oops".to_string().into())).await.unwrap();
        server
            .send(Message::Text(
                json!({ "type": "user_transcript", "user_transcription_event": { "user_transcript": "still here" } })
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();

        assert!(matches!(next_event(&mut events).await, AgentEvent::Error(RelayError::Parse(_))));
        assert_eq!(next_event(&mut events).await, AgentEvent::UserTranscript("still here".into()));
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn teardown_twice_leaves_microphone_stopped() {
        let (url, accept) = agent_server().await;
        let (handle, feed, mut events) = relay(&url).await;
        let mut server = accept.await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Ready);
        assert!(feed.is_running());

        handle.teardown();
        handle.teardown();
        assert!(!feed.is_running());
        assert!(!feed.push(vec![0]).await);

        assert_eq!(next_event(&mut events).await, AgentEvent::Disconnected);
        let closed = tokio::time::timeout(Duration::from_secs(5), server.next()).await.unwrap();
        assert!(matches!(closed, Some(Ok(Message::Close(_))) | None));

        handle.teardown();
    }

    #[tokio::test]
    async fn agent_hangup_stops_microphone() {
        let (url, accept) = agent_server().await;
        let (handle, feed, mut events) = relay(&url).await;
        let mut server = accept.await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Ready);

        server.close(None).await.unwrap();

        assert_eq!(next_event(&mut events).await, AgentEvent::Disconnected);
        assert!(!feed.is_running());
        handle.teardown();
    }

    #[tokio::test]
    async fn dropped_connection_reports_socket_error() {
        let (url, accept) = agent_server().await;
        let (handle, feed, mut events) = relay(&url).await;
        let server = accept.await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Ready);
        assert!(feed.is_running());

        // No close frame, just a dead TCP stream.
        drop(server);

        assert!(matches!(
            next_event(&mut events).await,
            AgentEvent::Error(RelayError::Socket(_))
        ));
        assert_eq!(next_event(&mut events).await, AgentEvent::Disconnected);
        assert!(!feed.is_running());
        handle.teardown();
    }

    #[tokio::test]
    async fn unreachable_agent_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mic, feed) = ChannelMicrophone::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = connect(
            &RelayConfig::new("agent-1").with_base_url(format!("ws://{}", addr)),
            Box::new(mic),
            tx,
        )
        .await;

        assert!(matches!(result, Err(RelayError::Socket(_))));
        assert!(matches!(rx.recv().await, Some(AgentEvent::Error(RelayError::Socket(_)))));
        assert!(!feed.is_running());
    }
}
