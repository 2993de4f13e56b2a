//! WebSocket link to the Live API
//!
//! A [`LiveLink`] is a pair of channels: outbound [`ClientMessage`]s and
//! inbound [`LinkEvent`]s. The socket itself is driven by a reader and a
//! writer task that are aborted when the link is dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use url::Url;

use super::protocol::{ClientMessage, ServerMessage, SessionSetup};
use crate::{Error, Result};

/// Default Live API endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Outbound queue depth; capture frames are dropped when it is full
const OUTBOUND_CAPACITY: usize = 64;

const INBOUND_CAPACITY: usize = 64;

/// Close code reported when the socket ends without a close frame
const ABNORMAL_CLOSE: u16 = 1006;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something that happened on the link
#[derive(Debug)]
pub enum LinkEvent {
    Message(Box<ServerMessage>),
    Error(Error),
    Closed { code: u16, reason: String },
}

/// An established session link
#[derive(Debug)]
pub struct LiveLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<LinkEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveLink {
    /// Wrap a channel pair; used by connectors that drive the remote end themselves
    #[must_use]
    pub const fn new(
        outbound: mpsc::Sender<ClientMessage>,
        inbound: mpsc::Receiver<LinkEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens session links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, send `setup` and wait for the server's acknowledgement
    ///
    /// # Errors
    ///
    /// Returns error if the connection or handshake fails
    async fn connect(&self, setup: SessionSetup, credential: &SecretString) -> Result<LiveLink>;
}

/// Connects to the Live API over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout: Duration::from_secs(15),
        }
    }

    /// Override how long to wait for `setupComplete`
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn url(&self, credential: &SecretString) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        url.query_pairs_mut()
            .append_pair("key", credential.expose_secret());
        Ok(url)
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, setup: SessionSetup, credential: &SecretString) -> Result<LiveLink> {
        let url = self.url(credential)?;

        tracing::debug!(
            host = url.host_str().unwrap_or_default(),
            model = %setup.model,
            "connecting to live endpoint"
        );

        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(connect_error)?;
        let (mut sink, mut stream) = socket.split();

        let frame = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(Message::text(frame)).await?;

        tokio::time::timeout(self.handshake_timeout, await_setup_complete(&mut stream))
            .await
            .map_err(|_| Error::Network("timed out waiting for setup acknowledgement".to_string()))??;

        tracing::info!("live session established");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);

        let reader = tokio::spawn(read_loop(stream, in_tx.clone()));
        let writer = tokio::spawn(write_loop(sink, out_rx, in_tx));

        Ok(LiveLink {
            outbound: out_tx,
            inbound: in_rx,
            tasks: vec![reader, writer],
        })
    }
}

fn connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::Auth(format!(
                "endpoint rejected the API key ({})",
                response.status()
            ))
        }
        tungstenite::Error::Io(e) => Error::Network(e.to_string()),
        other => Error::WebSocket(other),
    }
}

enum Frame {
    Message(ServerMessage),
    Closed { code: u16, reason: String },
    Skip,
}

/// Decode one socket message; JSON may arrive as text or binary
fn decode(message: Message) -> Result<Frame> {
    match message {
        Message::Text(text) => Ok(Frame::Message(serde_json::from_str(text.as_str())?)),
        Message::Binary(bytes) => Ok(Frame::Message(serde_json::from_slice(&bytes)?)),
        Message::Close(frame) => Ok(frame.map_or(
            Frame::Closed {
                code: u16::from(CloseCode::Status),
                reason: String::new(),
            },
            |f| Frame::Closed {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned(),
            },
        )),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Frame::Skip),
    }
}

fn closed_error(code: u16, reason: &str) -> Error {
    Error::Network(format!("connection closed ({code}): {reason}"))
}

async fn await_setup_complete(stream: &mut SplitStream<Socket>) -> Result<()> {
    while let Some(message) = stream.next().await {
        match decode(message?) {
            Ok(Frame::Message(msg)) if msg.setup_complete.is_some() => return Ok(()),
            Ok(Frame::Message(_) | Frame::Skip) => {
                tracing::debug!("ignoring frame before setup acknowledgement");
            }
            Ok(Frame::Closed { code, reason }) => return Err(closed_error(code, &reason)),
            Err(e) => tracing::warn!(error = %e, "malformed frame during handshake"),
        }
    }
    Err(closed_error(ABNORMAL_CLOSE, "connection dropped during setup"))
}

async fn read_loop(mut stream: SplitStream<Socket>, events: mpsc::Sender<LinkEvent>) {
    let event = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break LinkEvent::Error(connect_error(e)),
            None => {
                break LinkEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: String::new(),
                };
            }
        };

        match decode(message) {
            Ok(Frame::Message(msg)) => {
                if events.send(LinkEvent::Message(Box::new(msg))).await.is_err() {
                    return;
                }
            }
            Ok(Frame::Closed { code, reason }) => break LinkEvent::Closed { code, reason },
            Ok(Frame::Skip) => {}
            Err(e) => tracing::warn!(error = %e, "skipping malformed server frame"),
        }
    };

    tracing::debug!(?event, "live link reader finished");
    let _ = events.send(event).await;
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<LinkEvent>,
) {
    while let Some(message) = outbound.recv().await {
        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(frame)).await {
            let _ = events.send(LinkEvent::Error(connect_error(e))).await;
            return;
        }
    }

    // Session dropped its sender
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "live link close failed");
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    use super::*;

    #[test]
    fn credential_is_a_query_parameter() {
        let connector = WebSocketConnector::new("wss://example.test/ws");
        let url = connector
            .url(&SecretString::from("k&y".to_string()))
            .unwrap();
        assert_eq!(url.as_str(), "wss://example.test/ws?key=k%26y");
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let connector = WebSocketConnector::new("not a url");
        let err = connector
            .url(&SecretString::from("k".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn binary_frames_carry_json() {
        let frame = decode(Message::binary(br#"{"setupComplete":{}}"#.to_vec())).unwrap();
        assert!(matches!(frame, Frame::Message(m) if m.setup_complete.is_some()));
    }

    #[test]
    fn close_frame_keeps_code_and_reason() {
        let frame = decode(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "API key not valid".into(),
        })))
        .unwrap();
        match frame {
            Frame::Closed { code, reason } => {
                assert_eq!(code, 1008);
                assert_eq!(reason, "API key not valid");
            }
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(decode(Message::text("not json")).is_err());
    }
}
