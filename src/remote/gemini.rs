//! Gemini Live transport over `tokio-tungstenite`.
//!
//! ```text
//!  connect ── ws open ── setup ──► ◄── setupComplete      (bounded by timeout)
//!                 │
//!                 ├── writer task:  outbound mpsc ─► realtimeInput JSON ─► socket
//!                 └── reader task:  socket ─► ServerMessage ─► InboundEvent mpsc
//! ```
//!
//! The writer stops after sending `audioStreamEnd` and closes the socket.  If
//! the session drops its queue without the marker, the writer sends it
//! itself before closing.  The reader marks the session not-live
//! before it reports `Closed` or `Error`, so frames sent after a drop are
//! rejected instead of queued.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{ClientMessage, ServerMessage};
use super::session::{InboundEvent, OutboundMessage, RemoteError, RemoteSession, Transport};
use crate::config::{AudioConfig, SessionConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// GeminiTransport
// ---------------------------------------------------------------------------

/// Connects to the Live API.
///
/// # Example
///
/// ```rust,no_run
/// use voice_agent::config::AppConfig;
/// use voice_agent::remote::{GeminiTransport, Transport};
///
/// # async fn demo() -> Result<(), voice_agent::remote::RemoteError> {
/// let config = AppConfig::load().unwrap_or_default();
/// let transport = GeminiTransport::new(&config.audio);
/// let mut session = transport.connect(&config.session).await?;
/// while let Some(event) = session.next_event().await {
///     println!("{}", event.kind());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    outbound_queue: usize,
    inbound_queue: usize,
}

impl GeminiTransport {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            outbound_queue: audio.outbound_queue_frames.max(1),
            inbound_queue: audio.inbound_queue_events.max(1),
        }
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<RemoteSession, RemoteError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| RemoteError::Connection("no API key configured".to_string()))?;

        log::info!("remote: connecting to {}", config.model_resource());
        let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        let (sink, source) = tokio::time::timeout(timeout, handshake(config, &api_key))
            .await
            .map_err(|_| {
                RemoteError::Connection(format!("handshake timed out after {}s", timeout.as_secs()))
            })??;
        log::info!("remote: setup complete");

        let live = Arc::new(AtomicBool::new(true));
        let (out_tx, out_rx) = mpsc::channel(self.outbound_queue);
        let (ev_tx, ev_rx) = mpsc::channel(self.inbound_queue);

        tokio::spawn(run_writer(sink, out_rx, Arc::clone(&live)));
        let reader = tokio::spawn(run_reader(source, ev_tx, Arc::clone(&live)));

        Ok(RemoteSession::new(out_tx, ev_rx, live, Some(reader)))
    }
}

async fn handshake(config: &SessionConfig, api_key: &str) -> Result<(WsSink, WsSource), RemoteError> {
    // The URL carries the key; keep it out of error text.
    let (ws, _resp) = connect_async(config.endpoint_url(api_key))
        .await
        .map_err(|e| RemoteError::Connection(format!("websocket open failed: {e}")))?;
    let (mut sink, mut source) = ws.split();

    let setup = ClientMessage::setup(config)
        .to_json()
        .map_err(|e| RemoteError::Connection(format!("cannot encode setup: {e}")))?;
    sink.send(Message::Text(setup))
        .await
        .map_err(|e| RemoteError::Connection(format!("setup send failed: {e}")))?;

    wait_for_setup_complete(&mut source).await?;
    Ok((sink, source))
}

async fn wait_for_setup_complete(source: &mut WsSource) -> Result<(), RemoteError> {
    while let Some(msg) = source.next().await {
        let raw = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(RemoteError::Connection(format!("closed during setup: {reason}")));
            }
            Ok(_) => continue,
            Err(e) => return Err(RemoteError::Connection(e.to_string())),
        };
        match ServerMessage::parse(&raw) {
            Ok(reply) if reply.is_setup_complete() => return Ok(()),
            Ok(_) => log::debug!("remote: ignoring message before setupComplete"),
            Err(e) => log::warn!("remote: unparseable message during setup: {e}"),
        }
    }
    Err(RemoteError::Connection("socket ended during setup".to_string()))
}

// ---------------------------------------------------------------------------
// Writer / reader tasks
// ---------------------------------------------------------------------------

async fn run_writer<S>(mut sink: S, mut outbound: mpsc::Receiver<OutboundMessage>, live: Arc<AtomicBool>)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut frames_sent: u64 = 0;
    let mut end_sent = false;
    let mut failed = false;

    while let Some(msg) = outbound.recv().await {
        let (wire, is_end) = match &msg {
            OutboundMessage::Audio(frame) => (ClientMessage::audio(frame), false),
            OutboundMessage::AudioStreamEnd => (ClientMessage::audio_stream_end(), true),
        };
        if !send_json(&mut sink, &wire).await {
            live.store(false, Ordering::Release);
            failed = true;
            break;
        }
        if is_end {
            end_sent = true;
            break;
        }
        frames_sent += 1;
        if frames_sent % 100 == 0 {
            log::debug!("remote: {frames_sent} frames sent");
        }
    }

    // The queue can close without the marker when it was full at close time.
    if !end_sent && !failed {
        end_sent = send_json(&mut sink, &ClientMessage::audio_stream_end()).await;
    }
    if end_sent {
        log::debug!("remote: end of audio stream sent after {frames_sent} frame(s)");
    }

    if let Err(e) = sink.close().await {
        log::debug!("remote: socket close: {e}");
    }
}

/// Encode and send one message; `false` once the socket is unusable.
async fn send_json<S>(sink: &mut S, wire: &ClientMessage) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let text = match wire.to_json() {
        Ok(text) => text,
        Err(e) => {
            log::warn!("remote: cannot encode outbound message: {e}");
            return true;
        }
    };
    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("remote: send failed, stopping writer: {e}");
            false
        }
    }
}

async fn run_reader(mut source: WsSource, events: mpsc::Sender<InboundEvent>, live: Arc<AtomicBool>) {
    let terminal = loop {
        let raw = match source.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(f) => log::info!("remote: server closed ({} {})", u16::from(f.code), f.reason),
                    None => log::info!("remote: server closed"),
                }
                break InboundEvent::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                log::warn!("remote: socket error: {e}");
                break InboundEvent::Error { message: e.to_string() };
            }
            None => break InboundEvent::Closed,
        };

        let msg = match ServerMessage::parse(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("remote: skipping unparseable message: {e}");
                continue;
            }
        };
        if let Some(go_away) = &msg.go_away {
            log::warn!(
                "remote: server going away in {}",
                go_away.time_left.as_deref().unwrap_or("unknown time")
            );
        }
        for event in msg.into_events() {
            if events.send(event).await.is_err() {
                // Session dropped its receiver.
                return;
            }
        }
    };

    live.store(false, Ordering::Release);
    let _ = events.send(terminal).await;
}
