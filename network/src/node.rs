//! The node: one transport, at most one server, and every connection made
//! through them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use harbor_messages::Message;
use harbor_types::{Address, Capability};
use harbor_work::AuthorizationService;
use tokio::net::TcpStream;

use crate::config::NodeConfig;
use crate::connection::{ConnectionHandler, ConnectionKind};
use crate::handshake::{authorize, ConnectionHandshake};
use crate::listeners::{ConnectionListener, ListenerRegistry, MessageListener};
use crate::metrics::NetworkMetrics;
use crate::server::Server;
use crate::transport::{SocksProxy, Transport, TransportRegistry};
use crate::{Connection, ConnectionError, NodeError, Severity};

/// How long a peer gets to act on our CloseConnection before we cut it off.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for sockets and the transport during shutdown.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

/// Cheap handle to a node. Clones share state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Non-owning handle used by background tasks so they never keep a node
/// alive on their own.
#[derive(Clone)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

struct NodeInner {
    node_id: Arc<str>,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    authorization: Arc<dyn AuthorizationService>,
    binding: RwLock<Option<Arc<Binding>>>,
    outbound: Mutex<HashMap<Address, Arc<OutboundSlot>>>,
    inbound: RwLock<Arc<Vec<Arc<Connection>>>>,
    message_listeners: ListenerRegistry<dyn MessageListener>,
    connection_listeners: ListenerRegistry<dyn ConnectionListener>,
    stopped: AtomicBool,
    /// Serializes ephemeral server provisioning for concurrent first dials.
    provision_lock: tokio::sync::Mutex<()>,
    metrics: Arc<NetworkMetrics>,
}

/// A bound server and the identity derived from it.
struct Binding {
    server: Server,
    capability: Capability,
    handshake: Arc<ConnectionHandshake>,
}

/// Per-address outbound entry. `dial` is held while dialing so concurrent
/// callers wait for the result instead of opening a second connection.
#[derive(Default)]
struct OutboundSlot {
    dial: tokio::sync::Mutex<()>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl OutboundSlot {
    fn live(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn holds(&self, connection: &Connection) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| c.id() == connection.id())
    }

    fn is_empty(&self) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Removes a slot that is still empty when the dial holding it ends,
/// whether it failed or its future was dropped.
struct SlotGuard<'a> {
    node: &'a Node,
    address: &'a Address,
    slot: &'a Arc<OutboundSlot>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.node.remove_slot_if_empty(self.address, self.slot);
    }
}

impl Node {
    /// Create a node whose transport is shared through `transports`.
    pub fn new(
        node_id: impl Into<String>,
        config: NodeConfig,
        authorization: Arc<dyn AuthorizationService>,
        transports: &TransportRegistry,
    ) -> Self {
        let transport = transports.get_or_create(config.transport_type, &config.transport);
        Self::with_transport(node_id, config, authorization, transport)
    }

    pub fn with_transport(
        node_id: impl Into<String>,
        config: NodeConfig,
        authorization: Arc<dyn AuthorizationService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let node_id: String = node_id.into();
        Self {
            inner: Arc::new(NodeInner {
                node_id: Arc::from(node_id),
                config,
                transport,
                authorization,
                binding: RwLock::new(None),
                outbound: Mutex::new(HashMap::new()),
                inbound: RwLock::new(Arc::new(Vec::new())),
                message_listeners: ListenerRegistry::new(),
                connection_listeners: ListenerRegistry::new(),
                stopped: AtomicBool::new(false),
                provision_lock: tokio::sync::Mutex::new(()),
                metrics: Arc::new(NetworkMetrics::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &Arc<NetworkMetrics> {
        &self.inner.metrics
    }

    /// Our capability; `None` until a server is bound.
    pub fn my_capability(&self) -> Option<Capability> {
        self.binding().map(|b| b.capability.clone())
    }

    /// Public address of our server, if one is bound.
    pub fn find_my_address(&self) -> Option<Address> {
        self.binding().map(|b| b.server.address().clone())
    }

    pub fn socks_proxy(&self) -> Option<SocksProxy> {
        self.inner.transport.socks_proxy()
    }

    pub fn outbound_connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|slot| slot.live())
            .collect()
    }

    pub fn inbound_connections(&self) -> Vec<Arc<Connection>> {
        self.inbound_snapshot()
            .iter()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect()
    }

    // ── Listeners ──────────────────────────────────────────────────────

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        self.inner.message_listeners.add(listener)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.inner.message_listeners.remove(listener)
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.inner.connection_listeners.add(listener)
    }

    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.inner.connection_listeners.remove(listener)
    }

    // ── Server ─────────────────────────────────────────────────────────

    /// Initialize the transport, bind a server on `port` and derive our
    /// capability from its public address. A previous server is shut down.
    pub async fn initialize_server(&self, port: u16) -> Result<Address, NodeError> {
        self.ensure_running()?;
        let inner = &self.inner;
        inner.transport.initialize().await?;
        let server_socket = inner.transport.server_socket(port, &inner.node_id).await?;
        let address = server_socket.address.clone();

        let capability = Capability::new(
            address.clone(),
            inner.config.supported_transport_types.iter().copied(),
        );
        let handshake = Arc::new(ConnectionHandshake::new(
            capability.clone(),
            Arc::clone(&inner.authorization),
            inner.config.socket_timeout(),
            inner.config.max_message_size,
        ));

        let on_socket = {
            let weak = self.downgrade();
            let handshake = Arc::clone(&handshake);
            let local_address = address.clone();
            move |stream: TcpStream| {
                let weak = weak.clone();
                let handshake = Arc::clone(&handshake);
                let local_address = local_address.clone();
                async move {
                    if let Some(node) = weak.upgrade() {
                        node.accept(stream, &handshake, local_address).await;
                    }
                }
            }
        };
        let on_error = {
            let weak = self.downgrade();
            move |e: std::io::Error| {
                if let Some(node) = weak.upgrade() {
                    node.log_error(&NodeError::Io(e), None);
                }
            }
        };
        let server = Server::start(server_socket, on_socket, on_error);

        let binding = Arc::new(Binding {
            server,
            capability,
            handshake,
        });
        let previous = inner
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&binding));
        if let Some(previous) = previous {
            tracing::warn!(
                node_id = %inner.node_id,
                previous = %previous.server.address().print(),
                "server re-initialized, shutting down previous server"
            );
            previous.server.shutdown().await;
        }

        if self.is_stopped() {
            binding.server.shutdown().await;
            return Err(NodeError::Stopped);
        }
        tracing::info!(node_id = %inner.node_id, address = %address.print(), "server initialized");
        Ok(address)
    }

    fn binding(&self) -> Option<Arc<Binding>> {
        self.inner
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current binding, provisioning a server on a free port if none
    /// exists yet.
    async fn binding_or_provision(&self) -> Result<Arc<Binding>, NodeError> {
        if let Some(binding) = self.binding() {
            return Ok(binding);
        }
        let _provisioning = self.inner.provision_lock.lock().await;
        if let Some(binding) = self.binding() {
            return Ok(binding);
        }
        let port = harbor_utils::find_free_port()?;
        tracing::info!(node_id = %self.inner.node_id, port, "no server bound, provisioning one");
        self.initialize_server(port).await?;
        self.binding().ok_or(NodeError::NoCapability)
    }

    async fn accept(
        &self,
        mut stream: TcpStream,
        handshake: &ConnectionHandshake,
        local_address: Address,
    ) {
        if self.is_stopped() {
            return;
        }
        let peer_capability = match handshake.on_socket(&mut stream).await {
            Ok(capability) => capability,
            Err(e) => {
                self.inner.metrics.handshake_failures.inc();
                self.log_error(&NodeError::Handshake(e), None);
                return;
            }
        };
        let connection = Connection::new(
            stream,
            ConnectionKind::Inbound { local_address },
            peer_capability,
            self.inner.config.socket_timeout(),
            self.inner.config.max_message_size,
        );

        {
            let mut inbound = self
                .inner
                .inbound
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut next = Vec::with_capacity(inbound.len() + 1);
            next.extend(inbound.iter().cloned());
            next.push(Arc::clone(&connection));
            *inbound = Arc::new(next);
        }
        self.inner.metrics.inbound_connections.inc();
        // Shutdown may have snapshotted the inbound set before we joined it.
        if self.is_stopped() {
            self.deregister(&connection);
            connection.shutdown().await;
            return;
        }
        tracing::info!(node_id = %self.inner.node_id, connection = %connection, "inbound connection established");
        self.notify_connection(&connection);
        connection.start_reading(self.handler());
    }

    // ── Outbound ───────────────────────────────────────────────────────

    /// Return the live outbound connection to `address`, dialing and
    /// handshaking if there is none. Concurrent callers for one address
    /// share a single dial.
    pub async fn connection(&self, address: &Address) -> Result<Arc<Connection>, NodeError> {
        loop {
            self.ensure_running()?;
            let slot = self.outbound_slot(address);
            if let Some(connection) = slot.live() {
                return Ok(connection);
            }

            let _dialing = slot.dial.lock().await;
            if !self.is_current_slot(address, &slot) {
                // Removed while we waited; start over with the new entry.
                continue;
            }
            if let Some(connection) = slot.live() {
                return Ok(connection);
            }

            // Declared after `_dialing` so it runs while the lock is held.
            let _unfilled = SlotGuard {
                node: self,
                address,
                slot: &slot,
            };
            let connection = self.create_outbound(address).await?;
            *slot
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&connection));
            self.inner.metrics.outbound_connections.inc();

            if self.is_stopped() {
                self.deregister(&connection);
                connection.shutdown().await;
                return Err(NodeError::Stopped);
            }
            tracing::info!(node_id = %self.inner.node_id, connection = %connection, "outbound connection established");
            self.notify_connection(&connection);
            connection.start_reading(self.handler());
            return Ok(connection);
        }
    }

    async fn create_outbound(&self, address: &Address) -> Result<Arc<Connection>, NodeError> {
        let binding = self.binding_or_provision().await?;
        let mut stream = self.inner.transport.socket(address).await?;
        let peer_capability = match binding.handshake.start(&mut stream, address).await {
            Ok(capability) => capability,
            Err(e) => {
                self.inner.metrics.handshake_failures.inc();
                return Err(e.into());
            }
        };
        Ok(Connection::new(
            stream,
            ConnectionKind::Outbound {
                address: address.clone(),
            },
            peer_capability,
            self.inner.config.socket_timeout(),
            self.inner.config.max_message_size,
        ))
    }

    fn outbound_slot(&self, address: &Address) -> Arc<OutboundSlot> {
        let mut outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(outbound.entry(address.clone()).or_default())
    }

    fn is_current_slot(&self, address: &Address, slot: &Arc<OutboundSlot>) -> bool {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_slot_if_empty(&self, address: &Address, slot: &Arc<OutboundSlot>) {
        let mut outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if outbound
            .get(address)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && slot.is_empty())
        {
            outbound.remove(address);
        }
    }

    // ── Sending ────────────────────────────────────────────────────────

    /// Send `message` to `address`, connecting first if needed.
    pub async fn send_to(
        &self,
        address: &Address,
        message: Message,
    ) -> Result<Arc<Connection>, NodeError> {
        let connection = self.connection(address).await?;
        self.send(&connection, message).await?;
        Ok(connection)
    }

    /// Authorize and write `message` on `connection`. Sending a
    /// CloseConnection force-closes the connection after [`CLOSE_GRACE`].
    pub async fn send(&self, connection: &Arc<Connection>, message: Message) -> Result<(), NodeError> {
        self.ensure_running()?;
        if connection.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        let kind = message.kind();
        let is_close = message.is_close_connection();
        let envelope = authorize(self.inner.authorization.as_ref(), message).await?;
        if is_close {
            self.schedule_forced_close(connection);
        }
        match connection.send(&envelope).await {
            Ok(()) => {
                self.inner.metrics.messages_sent.inc();
                tracing::trace!(connection = %connection, %kind, "message sent");
                Ok(())
            }
            Err(e) => {
                let error = NodeError::from(e);
                self.log_error(&error, Some(connection));
                // The read loop observes the close and deregisters.
                connection.mark_closed();
                Err(error)
            }
        }
    }

    fn schedule_forced_close(&self, connection: &Arc<Connection>) {
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            if !connection.is_closed() {
                tracing::debug!(connection = %connection, "close grace elapsed, closing");
            }
            connection.shutdown().await;
        });
    }

    // ── Inbound traffic ────────────────────────────────────────────────

    fn on_message(&self, message: Message, connection: &Arc<Connection>) {
        if self.is_stopped() {
            return;
        }
        let kind = message.kind();
        let Message::Authorized(authorized) = message else {
            tracing::warn!(connection = %connection, %kind, "dropping message without authorization");
            self.inner.metrics.messages_rejected.inc();
            return;
        };
        if !self.inner.authorization.is_authorized(&authorized) {
            tracing::warn!(
                connection = %connection,
                kind = %authorized.message().kind(),
                "dropping message with invalid authorization token"
            );
            self.inner.metrics.messages_rejected.inc();
            return;
        }
        let message = authorized.into_message();
        self.inner.metrics.messages_received.inc();

        if let Message::CloseConnection(close) = &message {
            tracing::debug!(connection = %connection, reason = ?close.reason, "peer closed connection");
            connection.mark_closed();
            return;
        }

        let message = Arc::new(message);
        {
            let message = Arc::clone(&message);
            let connection = Arc::clone(connection);
            let node_id = Arc::clone(&self.inner.node_id);
            self.inner
                .message_listeners
                .dispatch(move |listener| listener.on_message(&message, &connection, &node_id));
        }
        connection.dispatch(message);
    }

    fn on_closed(&self, connection: &Arc<Connection>, error: Option<ConnectionError>) {
        if let Some(error) = error {
            self.log_error(&NodeError::from(error), Some(connection));
        }
        if self.deregister(connection) && !self.is_stopped() {
            tracing::debug!(node_id = %self.inner.node_id, connection = %connection, "connection removed");
            self.notify_disconnect(connection);
        }
    }

    /// Remove `connection` from the tables. Returns whether it was present.
    fn deregister(&self, connection: &Arc<Connection>) -> bool {
        match connection.kind() {
            ConnectionKind::Outbound { address } => {
                let mut outbound = self
                    .inner
                    .outbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let Some(slot) = outbound.get(address).cloned() else {
                    return false;
                };
                if !slot.holds(connection) {
                    return false;
                }
                slot.connection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                // A dialer holding the slot keeps it; it will refill it.
                if slot.dial.try_lock().is_ok() {
                    outbound.remove(address);
                }
                self.inner.metrics.outbound_connections.dec();
                true
            }
            ConnectionKind::Inbound { .. } => {
                let mut inbound = self
                    .inner
                    .inbound
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if !inbound.iter().any(|c| c.id() == connection.id()) {
                    return false;
                }
                let next: Vec<_> = inbound
                    .iter()
                    .filter(|c| c.id() != connection.id())
                    .cloned()
                    .collect();
                *inbound = Arc::new(next);
                self.inner.metrics.inbound_connections.dec();
                true
            }
        }
    }

    fn notify_connection(&self, connection: &Arc<Connection>) {
        let connection = Arc::clone(connection);
        self.inner
            .connection_listeners
            .dispatch(move |listener| listener.on_connection(&connection));
    }

    fn notify_disconnect(&self, connection: &Arc<Connection>) {
        let connection = Arc::clone(connection);
        self.inner
            .connection_listeners
            .dispatch(move |listener| listener.on_disconnect(&connection));
    }

    /// Log an error at a level matching how surprising it is. Silent once
    /// the node is stopped.
    fn log_error(&self, error: &NodeError, connection: Option<&Arc<Connection>>) {
        if self.is_stopped() {
            return;
        }
        let node_id = &*self.inner.node_id;
        let peer = connection.map(|c| c.to_string()).unwrap_or_default();
        match error.severity() {
            Severity::Expected => {
                tracing::debug!(node_id, peer = %peer, error = %error, "connection closed by peer")
            }
            Severity::Timeout => {
                tracing::info!(node_id, peer = %peer, error = %error, "connection timed out")
            }
            Severity::Unexpected => {
                tracing::error!(node_id, peer = %peer, error = %error, "network error")
            }
        }
    }

    fn handler(&self) -> Arc<dyn ConnectionHandler> {
        Arc::new(self.downgrade())
    }

    fn inbound_snapshot(&self) -> Arc<Vec<Arc<Connection>>> {
        Arc::clone(
            &self
                .inner
                .inbound
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.is_stopped() {
            Err(NodeError::Stopped)
        } else {
            Ok(())
        }
    }

    // ── Shutdown ───────────────────────────────────────────────────────

    /// Close every connection, the server and the transport, waiting at
    /// most [`SHUTDOWN_WAIT`]. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = &self.inner;
        tracing::info!(node_id = %inner.node_id, "shutting down node");

        let connections: Vec<Arc<Connection>> = inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|slot| {
                slot.connection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .chain(self.inbound_snapshot().iter().cloned())
            .collect();
        let binding = inner
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut tasks = Vec::with_capacity(connections.len() + 2);
        for connection in connections {
            tasks.push(tokio::spawn(async move { connection.shutdown().await }));
        }
        if let Some(binding) = binding {
            tasks.push(tokio::spawn(async move { binding.server.shutdown().await }));
        }
        let transport = Arc::clone(&inner.transport);
        tasks.push(tokio::spawn(async move { transport.shutdown().await }));

        let wait_all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_WAIT, wait_all).await.is_err() {
            tracing::warn!(node_id = %inner.node_id, "shutdown did not complete in time");
        }

        inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *inner
            .inbound
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
        inner.message_listeners.clear();
        inner.connection_listeners.clear();
        inner.metrics.outbound_connections.set(0);
        inner.metrics.inbound_connections.set(0);
        tracing::info!(node_id = %inner.node_id, "node stopped");
    }

    fn print(&self) -> String {
        match self.find_my_address() {
            Some(address) => format!("{} @ {}", self.inner.node_id, address.print()),
            None => format!("{} (unbound)", self.inner.node_id),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.inner.node_id)
            .field("address", &self.find_my_address())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

impl ConnectionHandler for WeakNode {
    fn on_message(&self, message: Message, connection: &Arc<Connection>) {
        if let Some(node) = self.upgrade() {
            node.on_message(message, connection);
        }
    }

    fn on_closed(&self, connection: &Arc<Connection>, error: Option<ConnectionError>) {
        if let Some(node) = self.upgrade() {
            node.on_closed(connection, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_messages::Ping;
    use harbor_nullables::NullAuthorization;
    use harbor_types::TransportType;

    fn node(id: &str) -> Node {
        Node::new(
            id,
            NodeConfig::default(),
            Arc::new(NullAuthorization::new()),
            &TransportRegistry::new(),
        )
    }

    #[tokio::test]
    async fn capability_appears_with_server() {
        let node = node("alice");
        assert!(node.my_capability().is_none());
        assert_eq!(node.to_string(), "alice (unbound)");

        let address = node.initialize_server(0).await.unwrap();
        let capability = node.my_capability().unwrap();
        assert_eq!(capability.address(), &address);
        assert!(capability.supports(TransportType::ClearNet));
        assert_eq!(node.find_my_address(), Some(address));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn reinitializing_replaces_server() {
        let node = node("alice");
        let first = node.initialize_server(0).await.unwrap();
        let second = node.initialize_server(0).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(node.my_capability().unwrap().address(), &second);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_node_refuses_work() {
        let node = node("alice");
        node.shutdown().await;
        node.shutdown().await;
        assert!(node.is_stopped());
        assert!(matches!(
            node.initialize_server(0).await,
            Err(NodeError::Stopped)
        ));
        assert!(matches!(
            node.send_to(&Address::localhost(1), Message::from(Ping { nonce: 1 }))
                .await,
            Err(NodeError::Stopped)
        ));
    }

    #[tokio::test]
    async fn failed_dial_leaves_no_entry() {
        let node = node("alice");
        node.initialize_server(0).await.unwrap();
        let port = harbor_utils::find_free_port().unwrap();
        let err = node.connection(&Address::localhost(port)).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
        assert!(node.inner.outbound.lock().unwrap().is_empty());
        assert!(node.outbound_connections().is_empty());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn abandoned_dial_leaves_no_entry() {
        let node = node("alice");
        node.initialize_server(0).await.unwrap();
        // Accepts but never answers the handshake.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { silent.accept().await });

        let address = Address::localhost(port);
        let dial = tokio::time::timeout(Duration::from_millis(200), node.connection(&address));
        assert!(dial.await.is_err());
        assert!(node.inner.outbound.lock().unwrap().is_empty());

        let _stream = accept.await.unwrap().unwrap();
        node.shutdown().await;
    }
}
