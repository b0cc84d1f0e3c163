//! WebSocket implementation of the server link.
//!
//! Connects to the server's `/ws` endpoint and exchanges postcard-
//! encoded binary frames: [`ClientIntent`] out, [`ServerEvent`] in.
//! A background reader task decodes incoming frames and feeds them to
//! [`ServerLink::recv`] through a channel; malformed frames are logged
//! and skipped rather than tearing the connection down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley_proto::codec;
use parley_proto::event::{ClientIntent, ServerEvent};

use super::{Connector, LinkError, ServerLink};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer size for the incoming event channel.
const INCOMING_BUFFER: usize = 256;

/// WebSocket server link.
///
/// Created via [`WsLink::connect`], which establishes the connection
/// and spawns the background reader task.
pub struct WsLink {
    /// Write half of the WebSocket (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Channel fed by the background reader task.
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Whether the WebSocket connection is still alive.
    connected: Arc<AtomicBool>,
    /// Reader task handle (kept for the link's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsLink {
    /// Connects to the server's WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Timeout`] if the connection attempt times out.
    /// - [`LinkError::Unreachable`] if the address cannot be resolved
    ///   or refuses the connection.
    /// - [`LinkError::Io`] for other transport failures.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, LinkError> {
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "WebSocket connect timed out");
                LinkError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_connected = Arc::clone(&connected);
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, reader_connected));

        Ok(Self {
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            _reader_handle: reader_handle,
        })
    }
}

impl ServerLink for WsLink {
    async fn send(&self, intent: &ClientIntent) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::ConnectionClosed);
        }

        let bytes = codec::encode_intent(intent)?;
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "WebSocket send failed");
                self.connected.store(false, Ordering::Relaxed);
                LinkError::ConnectionClosed
            })?;
        Ok(())
    }

    async fn recv(&self) -> Result<ServerEvent, LinkError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(LinkError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Background task that reads WebSocket frames and decodes events.
///
/// Malformed frames are logged and skipped — the task does not
/// disconnect on bad data. Sets `connected` to `false` when the
/// WebSocket closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode_event(&data) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped — link was dropped, exit.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {
                // Ignore non-binary frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("link reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`LinkError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> LinkError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            // DNS/network failures surface as io errors.
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                LinkError::Unreachable(io_err.to_string())
            } else {
                LinkError::Io(io_err)
            }
        }
        WsError::Http(response) => LinkError::Io(std::io::Error::other(format!(
            "server HTTP error: status {}",
            response.status()
        ))),
        other => LinkError::Io(std::io::Error::other(format!("connection error: {other}"))),
    }
}

/// [`Connector`] that dials a fixed WebSocket URL.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the given `ws://` or `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The URL this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn dial(&self) -> Result<WsLink, LinkError> {
        WsLink::connect(&self.url, self.connect_timeout).await
    }
}
