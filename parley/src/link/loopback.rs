//! Loopback link for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate the
//! server connection. [`LoopbackLink::create_pair`] returns the client
//! half (implementing [`ServerLink`]) and a [`LoopbackServer`] handle
//! the test drives: it reads the intents the engine sent and pushes
//! [`ServerEvent`]s back.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, mpsc};

use parley_proto::event::{ClientIntent, ServerEvent};

use super::{Connector, LinkError, ServerLink};

/// In-process server link backed by channels.
pub struct LoopbackLink {
    /// Sender for outgoing intents (delivers to the server half).
    intent_tx: mpsc::Sender<ClientIntent>,
    /// Receiver for incoming events (fed by the server half).
    event_rx: Mutex<mpsc::Receiver<ServerEvent>>,
}

impl LoopbackLink {
    /// Creates a connected link/server pair with the given channel
    /// capacity in each direction.
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackServer) {
        let (intent_tx, intent_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);

        let link = Self {
            intent_tx,
            event_rx: Mutex::new(event_rx),
        };
        let server = LoopbackServer {
            intent_rx,
            event_tx,
        };
        (link, server)
    }
}

impl ServerLink for LoopbackLink {
    async fn send(&self, intent: &ClientIntent) -> Result<(), LinkError> {
        self.intent_tx
            .send(intent.clone())
            .await
            .map_err(|_| LinkError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<ServerEvent, LinkError> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await.ok_or(LinkError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        !self.intent_tx.is_closed()
    }
}

/// The server half of a loopback pair, driven by tests.
///
/// Dropping it closes the connection from the engine's point of view.
pub struct LoopbackServer {
    intent_rx: mpsc::Receiver<ClientIntent>,
    event_tx: mpsc::Sender<ServerEvent>,
}

impl LoopbackServer {
    /// Waits for the next intent the engine sent.
    pub async fn next_intent(&mut self) -> Option<ClientIntent> {
        self.intent_rx.recv().await
    }

    /// Returns the next intent if one is already queued.
    pub fn try_next_intent(&mut self) -> Option<ClientIntent> {
        self.intent_rx.try_recv().ok()
    }

    /// Pushes an event to the engine. Returns `false` if the link side
    /// has been dropped.
    pub async fn push(&self, event: ServerEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

/// [`Connector`] producing loopback links.
///
/// Every successful [`dial`](Connector::dial) creates a fresh pair and
/// hands the server half to the receiver returned by
/// [`LoopbackConnector::new`], so tests can drive each (re)connection
/// in turn. [`fail_next`](Self::fail_next) injects dial failures to
/// exercise retry and backoff.
pub struct LoopbackConnector {
    remotes: mpsc::UnboundedSender<LoopbackServer>,
    fail_next: AtomicU32,
    buffer: usize,
}

impl LoopbackConnector {
    /// Creates a connector and the stream of server halves it produces.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<LoopbackServer>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes,
                fail_next: AtomicU32::new(0),
                buffer,
            },
            remote_rx,
        )
    }

    /// Makes the next `n` dial attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn dial(&self) -> Result<LoopbackLink, LinkError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(LinkError::Unreachable("injected dial failure".into()));
        }

        let (link, server) = LoopbackLink::create_pair(self.buffer);
        self.remotes
            .send(server)
            .map_err(|_| LinkError::Unreachable("remote receiver dropped".into()))?;
        Ok(link)
    }
}
