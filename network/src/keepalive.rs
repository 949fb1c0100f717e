//! Liveness checks with Ping/Pong.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use harbor_messages::{Message, Ping, Pong};
use harbor_types::ConnectionId;
use tokio::sync::oneshot;

use crate::listeners::{ConnectionListener, ConnectionMessageListener, MessageListener};
use crate::node::{Node, WeakNode};
use crate::{Connection, KeepAliveError};

/// How long a ping waits for its pong.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(90);

/// Sends pings on one connection and waits for the matching pongs.
///
/// Every [`send_ping`] draws a fresh nonce, so a late or duplicated pong
/// from an earlier ping never completes a later one. Listeners are
/// registered for the duration of each call and removed when it resolves,
/// on drop, or on [`dispose`]. A ping also ends as soon as the connection
/// closes, including when the node itself shuts down.
///
/// [`send_ping`]: KeepAliveHandler::send_ping
/// [`dispose`]: KeepAliveHandler::dispose
pub struct KeepAliveHandler {
    node: Node,
    connection: Arc<Connection>,
    tracker: Arc<Tracker>,
    timeout: Duration,
}

type Completion = oneshot::Sender<Result<(), KeepAliveError>>;

/// The outstanding ping, if any.
struct Pending {
    nonce: u32,
    completion: Completion,
}

struct Tracker {
    connection_id: ConnectionId,
    pending: Mutex<Option<Pending>>,
}

impl Tracker {
    fn pending(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, result: Result<(), KeepAliveError>) {
        if let Some(pending) = self.pending().take() {
            let _ = pending.completion.send(result);
        }
    }
}

impl ConnectionMessageListener for Tracker {
    fn on_message(&self, message: &Message) {
        let Message::Pong(pong) = message else {
            return;
        };
        let mut pending = self.pending();
        match pending.as_ref().map(|p| p.nonce) {
            Some(nonce) if nonce == pong.request_nonce => {
                if let Some(pending) = pending.take() {
                    let _ = pending.completion.send(Ok(()));
                }
            }
            Some(nonce) => tracing::warn!(
                expected = nonce,
                received = pong.request_nonce,
                "pong nonce does not match our ping"
            ),
            None => tracing::debug!(received = pong.request_nonce, "pong with no ping outstanding"),
        }
    }
}

impl ConnectionListener for Tracker {
    fn on_connection(&self, _connection: &Arc<Connection>) {}

    fn on_disconnect(&self, connection: &Arc<Connection>) {
        if connection.id() == self.connection_id {
            self.complete(Err(KeepAliveError::Cancelled));
        }
    }
}

impl KeepAliveHandler {
    pub fn new(node: &Node, connection: Arc<Connection>) -> Self {
        Self::with_timeout(node, connection, KEEP_ALIVE_TIMEOUT)
    }

    pub fn with_timeout(node: &Node, connection: Arc<Connection>, timeout: Duration) -> Self {
        let tracker = Arc::new(Tracker {
            connection_id: connection.id(),
            pending: Mutex::new(None),
        });
        Self {
            node: node.clone(),
            connection,
            tracker,
            timeout,
        }
    }

    /// Nonce of the ping currently awaiting its pong.
    pub fn pending_nonce(&self) -> Option<u32> {
        self.tracker.pending().as_ref().map(|p| p.nonce)
    }

    /// Ping the peer and return the round-trip time once the matching pong
    /// arrives.
    pub async fn send_ping(&self) -> Result<Duration, KeepAliveError> {
        let nonce: u32 = rand::random();
        let (completion, receiver) = oneshot::channel();
        *self.tracker.pending() = Some(Pending { nonce, completion });
        self.connection.add_message_listener(self.tracker.clone());
        self.node.add_connection_listener(self.tracker.clone());

        let ping = Message::from(Ping { nonce });
        if let Err(e) = self.node.send(&self.connection, ping).await {
            self.dispose();
            return Err(KeepAliveError::Send(Box::new(e)));
        }
        let sent_at = Instant::now();

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(self.timeout, receiver) => outcome,
            _ = self.connection.closed() => Ok(Ok(Err(KeepAliveError::Cancelled))),
        };
        self.dispose();
        match outcome {
            Ok(Ok(Ok(()))) => {
                let rtt = sent_at.elapsed();
                self.node
                    .metrics()
                    .keep_alive_rtt_ms
                    .observe(rtt.as_secs_f64() * 1000.0);
                tracing::debug!(connection = %self.connection, rtt_ms = rtt.as_millis() as u64, "pong received");
                Ok(rtt)
            }
            Ok(Ok(Err(e))) => Err(e),
            // Sender dropped by a concurrent dispose.
            Ok(Err(_)) => Err(KeepAliveError::Cancelled),
            Err(_) => {
                tracing::info!(connection = %self.connection, timeout = ?self.timeout, "no pong in time");
                Err(KeepAliveError::Timeout(self.timeout))
            }
        }
    }

    /// Unregister the tracker and drop any pending completion. Idempotent.
    pub fn dispose(&self) {
        let as_message_listener: Arc<dyn ConnectionMessageListener> = self.tracker.clone();
        let as_connection_listener: Arc<dyn ConnectionListener> = self.tracker.clone();
        self.connection
            .remove_message_listener(&as_message_listener);
        self.node
            .remove_connection_listener(&as_connection_listener);
        self.tracker.pending().take();
    }
}

impl Drop for KeepAliveHandler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Answers every ping with a pong carrying the same nonce.
pub struct PingResponder {
    node: WeakNode,
}

impl PingResponder {
    pub fn new(node: &Node) -> Self {
        Self {
            node: node.downgrade(),
        }
    }
}

impl MessageListener for PingResponder {
    fn on_message(&self, message: &Message, connection: &Arc<Connection>, _node_id: &str) {
        let Message::Ping(ping) = message else {
            return;
        };
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let pong = Message::from(Pong {
            request_nonce: ping.nonce,
        });
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            if let Err(e) = node.send(&connection, pong).await {
                tracing::debug!(connection = %connection, error = %e, "pong not sent");
            }
        });
    }
}
