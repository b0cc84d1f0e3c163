//! Connection lifecycle: dialing, identity announcement, bounded
//! reconnection with backoff, and event fan-in.
//!
//! The [`ConnectionManager`] owns the single live connection for the
//! authenticated identity. A supervisor task dials through the
//! [`Connector`], announces the identity as the first intent on every
//! (re)connection, then pumps incoming [`ServerEvent`]s into one
//! [`SyncEvent`] channel. When the stream ends it retries with
//! exponential backoff up to a bounded number of attempts.
//!
//! Intents sent while disconnected are queued (FIFO, capped) and
//! flushed in order on the next successful connection, so a send made
//! while offline still reaches the server after reconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use parley_proto::event::{ClientIntent, ServerEvent};
use parley_proto::message::UserId;

use crate::link::{Connector, ServerLink};

/// Maximum number of intents queued while disconnected before FIFO
/// eviction.
const MAX_QUEUED_INTENTS: usize = 256;

/// Notifications emitted by the [`ConnectionManager`].
///
/// All inbound traffic is delivered as discrete, independently-
/// dispatchable notifications; the manager itself holds no message
/// data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A connection was established (or re-established) and the
    /// identity announced. Missed events are not replayed — consumers
    /// should resynchronize aggregate state now.
    Connected,
    /// The connection was lost; the supervisor will retry.
    Disconnected,
    /// A reconnection attempt is about to be made after a backoff delay.
    Reconnecting {
        /// The attempt number, starting at 1.
        attempt: u32,
        /// The configured attempt bound.
        max_attempts: u32,
    },
    /// All reconnection attempts failed; the supervisor gave up.
    /// A later `connect()` call starts a fresh attempt cycle.
    ReconnectFailed,
    /// An event pushed by the server.
    Server(ServerEvent),
}

/// Bounded-retry policy for reconnection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of consecutive failed cycles tolerated before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

/// Where an intent ended up when handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live connection.
    Sent,
    /// No live connection; queued for flush on the next connection.
    Queued,
}

/// State shared between the manager handle and its supervisor task.
struct Shared<C: Connector> {
    user_id: UserId,
    connector: C,
    retry: RetryPolicy,
    link: parking_lot::RwLock<Option<Arc<C::Link>>>,
    connected: AtomicBool,
    queued: parking_lot::Mutex<VecDeque<ClientIntent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

/// Owns the live connection for one authenticated identity.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager for the given identity and connector.
    ///
    /// Returns the manager and the receiver for its [`SyncEvent`]s.
    /// Nothing is dialed until [`connect`](Self::connect) is called.
    pub fn new(
        user_id: UserId,
        connector: C,
        retry: RetryPolicy,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let manager = Self {
            shared: Arc::new(Shared {
                user_id,
                connector,
                retry,
                link: parking_lot::RwLock::new(None),
                connected: AtomicBool::new(false),
                queued: parking_lot::Mutex::new(VecDeque::new()),
                event_tx,
            }),
            supervisor: parking_lot::Mutex::new(None),
        };
        (manager, event_rx)
    }

    /// Starts (or resumes) the connection supervisor. Idempotent: if a
    /// supervisor is already running — connected or mid-retry — this is
    /// a no-op. If a previous supervisor gave up, a fresh attempt cycle
    /// begins.
    pub fn connect(&self) {
        let mut guard = self.supervisor.lock();
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            tracing::debug!("connect: supervisor already running");
            return;
        }
        let shared = Arc::clone(&self.shared);
        *guard = Some(tokio::spawn(supervise(shared)));
    }

    /// Tears the connection down and stops reconnection. Queued intents
    /// are kept: they flush if `connect` is called again.
    pub fn disconnect(&self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        self.shared.connected.store(false, Ordering::Relaxed);
        *self.shared.link.write() = None;
        tracing::info!(user = %self.shared.user_id, "connection torn down");
    }

    /// Whether a live connection currently exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Sends an intent over the live connection, or queues it for the
    /// next connection if none exists (or the send fails).
    pub async fn send(&self, intent: &ClientIntent) -> Delivery {
        let link = self.shared.link.read().clone();
        if let Some(link) = link {
            match link.send(intent).await {
                Ok(()) => return Delivery::Sent,
                Err(e) => {
                    tracing::warn!(err = %e, "send failed, queuing intent");
                }
            }
        }
        enqueue(&self.shared, intent.clone());
        Delivery::Queued
    }

    /// Number of intents waiting for the next connection.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.queued.lock().len()
    }
}

/// Queues an intent for flush on the next connection, evicting the
/// oldest entry past the cap.
fn enqueue<C: Connector>(shared: &Shared<C>, intent: ClientIntent) {
    let mut queued = shared.queued.lock();
    queued.push_back(intent);
    if queued.len() > MAX_QUEUED_INTENTS {
        queued.pop_front();
    }
}

/// Supervisor: dial, announce, flush, pump, retry.
async fn supervise<C: Connector>(shared: Arc<Shared<C>>) {
    let max_attempts = shared.retry.max_attempts;
    let mut attempt: u32 = 0;

    loop {
        match shared.connector.dial().await {
            Ok(link) => {
                let link = Arc::new(link);

                // The identity announcement must be the first frame on
                // every connection (presence opt-in + routing identity).
                let announce = ClientIntent::Announce {
                    user_id: shared.user_id.clone(),
                };
                if let Err(e) = link.send(&announce).await {
                    tracing::warn!(err = %e, "announce failed");
                } else {
                    attempt = 0;
                    *shared.link.write() = Some(Arc::clone(&link));
                    shared.connected.store(true, Ordering::Relaxed);

                    flush_queue(&shared, &link).await;

                    tracing::info!(user = %shared.user_id, "connected");
                    if shared.event_tx.send(SyncEvent::Connected).await.is_err() {
                        return;
                    }

                    // Pump events until the stream ends.
                    loop {
                        match link.recv().await {
                            Ok(event) => {
                                if shared
                                    .event_tx
                                    .send(SyncEvent::Server(event))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(err = %e, "event stream ended");
                                break;
                            }
                        }
                    }

                    shared.connected.store(false, Ordering::Relaxed);
                    *shared.link.write() = None;
                    if shared
                        .event_tx
                        .send(SyncEvent::Disconnected)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "dial failed");
            }
        }

        attempt += 1;
        if attempt > max_attempts {
            tracing::warn!(max_attempts, "reconnection attempts exhausted");
            let _ = shared.event_tx.send(SyncEvent::ReconnectFailed).await;
            return;
        }

        let delay = shared.retry.delay_for(attempt);
        if shared
            .event_tx
            .send(SyncEvent::Reconnecting {
                attempt,
                max_attempts,
            })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

/// Flushes intents queued while disconnected, in order. A failing send
/// puts the intent back and stops — the pump loop will notice the dead
/// link shortly.
async fn flush_queue<C: Connector>(shared: &Shared<C>, link: &C::Link) {
    loop {
        let next = shared.queued.lock().pop_front();
        let Some(intent) = next else {
            return;
        };
        if let Err(e) = link.send(&intent).await {
            tracing::warn!(err = %e, "flush failed, re-queuing intent");
            shared.queued.lock().push_front(intent);
            return;
        }
    }
}
