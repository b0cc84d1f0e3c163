//! Live-connection abstraction for the sync engine.
//!
//! Defines the [`ServerLink`] trait — one bidirectional event stream to
//! the server — and the [`Connector`] trait used to (re)establish it.
//! Concrete implementations:
//! - [`ws::WsLink`] / [`ws::WsConnector`] — WebSocket, postcard frames
//! - [`loopback::LoopbackLink`] / [`loopback::LoopbackConnector`] —
//!   in-process channel pair for testing

pub mod loopback;
pub mod ws;

use parley_proto::event::{ClientIntent, ServerEvent};

/// Errors that can occur on the live connection.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The connection to the server has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("link operation timed out")]
    Timeout,

    /// The server is not reachable.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] parley_proto::codec::CodecError),
}

/// One live, bidirectional connection to the server.
///
/// Implementations carry typed intents out and typed events in; framing
/// and serialization are theirs to handle.
pub trait ServerLink: Send + Sync {
    /// Sends an intent to the server.
    ///
    /// Returns `Ok(())` once the intent has been handed to the
    /// transport. This does NOT guarantee processing — confirmations
    /// arrive as separate [`ServerEvent`]s.
    fn send(
        &self,
        intent: &ClientIntent,
    ) -> impl std::future::Future<Output = Result<(), LinkError>> + Send;

    /// Receives the next pushed event.
    ///
    /// Blocks asynchronously until an event arrives or the connection
    /// is lost.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerEvent, LinkError>> + Send;

    /// Whether the underlying connection is currently alive.
    fn is_connected(&self) -> bool;
}

/// Factory for [`ServerLink`]s, used by the connection manager to dial
/// and re-dial across reconnects.
pub trait Connector: Send + Sync + 'static {
    /// The link type this connector produces.
    type Link: ServerLink + Send + Sync + 'static;

    /// Establishes a fresh connection. Nothing is announced yet — the
    /// connection manager sends the identity as the first intent.
    fn dial(&self) -> impl std::future::Future<Output = Result<Self::Link, LinkError>> + Send;
}
