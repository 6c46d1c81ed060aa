//! Transport-neutral handle to a live remote model session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::AudioFrame;
use crate::config::SessionConfig;

// ---------------------------------------------------------------------------
// Events & messages
// ---------------------------------------------------------------------------

/// Something the remote model told us.  Delivered strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Encoded audio as sent by the model (base64 already removed).
    AudioChunk {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    /// The model finished its turn.
    TurnComplete,
    /// The user barged in; pending model audio is obsolete.
    Interrupted,
    /// The server closed the connection.
    Closed,
    /// The transport failed.
    Error { message: String },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio",
            Self::TurnComplete => "turn-complete",
            Self::Interrupted => "interrupted",
            Self::Closed => "closed",
            Self::Error { .. } => "error",
        }
    }
}

/// Queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Audio(AudioFrame),
    AudioStreamEnd,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connection(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    #[error("remote session is not live")]
    NotLive,

    #[error("outbound queue is full")]
    QueueFull,
}

// ---------------------------------------------------------------------------
// RemoteSession
// ---------------------------------------------------------------------------

/// A connected session.
///
/// Outbound frames go through a bounded queue drained by a writer task, so
/// [`send`](Self::send) never waits on the network.  Inbound events come from
/// a reader task via [`next_event`](Self::next_event).
pub struct RemoteSession {
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    events: mpsc::Receiver<InboundEvent>,
    live: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl RemoteSession {
    pub fn new(
        outbound: mpsc::Sender<OutboundMessage>,
        events: mpsc::Receiver<InboundEvent>,
        live: Arc<AtomicBool>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            events,
            live,
            reader,
        }
    }

    pub fn is_live(&self) -> bool {
        self.outbound.is_some() && self.live.load(Ordering::Acquire)
    }

    /// Queue one frame.  Frames reach the wire in call order.
    pub fn send(&self, frame: AudioFrame) -> Result<(), TransmitError> {
        if !self.live.load(Ordering::Acquire) {
            return Err(TransmitError::NotLive);
        }
        let tx = self.outbound.as_ref().ok_or(TransmitError::NotLive)?;
        tx.try_send(OutboundMessage::Audio(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransmitError::NotLive,
        })
    }

    /// Next inbound event; `None` once the reader has gone away.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    /// Signal end of audio and release the transport.  Idempotent.
    pub fn close(&mut self) {
        let Some(tx) = self.outbound.take() else {
            return;
        };
        self.live.store(false, Ordering::Release);
        if let Err(e) = tx.try_send(OutboundMessage::AudioStreamEnd) {
            log::debug!("remote: end of stream left to the writer: {e}");
        }
        // Dropping `tx` lets the writer drain, send the end marker if it is
        // still missing, and close the socket.
        drop(tx);
        self.events.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        log::info!("remote: session closed");
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Opens remote sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and complete the setup handshake.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Connection`] on network, auth or handshake failure.
    /// No retry.
    async fn connect(&self, config: &SessionConfig) -> Result<RemoteSession, RemoteError>;
}

// ---------------------------------------------------------------------------
// MockTransport (test double)
// ---------------------------------------------------------------------------

/// The far end of a [`MockTransport`] session.
#[cfg(test)]
pub struct MockLink {
    pub events: mpsc::Sender<InboundEvent>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub live: Arc<AtomicBool>,
}

#[cfg(test)]
pub struct MockTransport {
    failure: Option<String>,
    delay: std::time::Duration,
    connects: std::sync::atomic::AtomicUsize,
    links: std::sync::Mutex<Vec<MockLink>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            failure: None,
            delay: std::time::Duration::ZERO,
            connects: Default::default(),
            links: Default::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Take the far end of the oldest link not yet taken.
    pub fn take_link(&self) -> Option<MockLink> {
        let mut links = self.links.lock().unwrap();
        (!links.is_empty()).then(|| links.remove(0))
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _config: &SessionConfig) -> Result<RemoteSession, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(RemoteError::Connection(message.clone()));
        }
        let (out_tx, out_rx) = mpsc::channel(8);
        let (ev_tx, ev_rx) = mpsc::channel(64);
        let live = Arc::new(AtomicBool::new(true));
        self.links.lock().unwrap().push(MockLink {
            events: ev_tx,
            outbound: out_rx,
            live: Arc::clone(&live),
        });
        Ok(RemoteSession::new(out_tx, ev_rx, live, None))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> AudioFrame {
        AudioFrame::new(vec![tag; 4], 16_000)
    }

    async fn connected() -> (RemoteSession, MockLink) {
        let transport = MockTransport::new();
        let session = transport.connect(&SessionConfig::default()).await.unwrap();
        (session, transport.take_link().unwrap())
    }

    #[tokio::test]
    async fn frames_reach_the_wire_in_call_order() {
        let (session, mut link) = connected().await;
        for tag in 0..3 {
            session.send(frame(tag)).unwrap();
        }
        for tag in 0..3 {
            assert_eq!(link.outbound.recv().await, Some(OutboundMessage::Audio(frame(tag))));
        }
    }

    #[tokio::test]
    async fn full_queue_reports_queue_full() {
        let (session, _link) = connected().await;
        for tag in 0..8 {
            session.send(frame(tag)).unwrap();
        }
        assert_eq!(session.send(frame(9)), Err(TransmitError::QueueFull));
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (mut session, link) = connected().await;
        link.events.send(InboundEvent::Interrupted).await.unwrap();
        link.events.send(InboundEvent::TurnComplete).await.unwrap();

        assert_eq!(session.next_event().await, Some(InboundEvent::Interrupted));
        assert_eq!(session.next_event().await, Some(InboundEvent::TurnComplete));
    }

    #[tokio::test]
    async fn close_ends_the_stream_once() {
        let (mut session, mut link) = connected().await;
        session.send(frame(1)).unwrap();

        session.close();
        session.close();

        assert!(!session.is_live());
        assert!(!link.live.load(Ordering::SeqCst));
        assert_eq!(link.outbound.recv().await, Some(OutboundMessage::Audio(frame(1))));
        assert_eq!(link.outbound.recv().await, Some(OutboundMessage::AudioStreamEnd));
        assert_eq!(link.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_not_live() {
        let (mut session, _link) = connected().await;
        session.close();
        assert_eq!(session.send(frame(1)), Err(TransmitError::NotLive));
    }

    #[tokio::test]
    async fn send_after_remote_drop_is_not_live() {
        let (session, link) = connected().await;
        link.live.store(false, Ordering::SeqCst);
        assert_eq!(session.send(frame(1)), Err(TransmitError::NotLive));
    }

    #[tokio::test]
    async fn failing_transport_reports_connection_error() {
        let transport = MockTransport::failing("401 unauthorised");
        let err = transport.connect(&SessionConfig::default()).await.err().unwrap();
        assert_eq!(err, RemoteError::Connection("401 unauthorised".into()));
        assert_eq!(transport.link_count(), 0);
    }
}
