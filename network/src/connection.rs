//! An established, handshaken link to one peer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harbor_messages::Message;
use harbor_types::{Address, Capability, ConnectionId};
use tokio::io::{self, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::codec::{read_frame, write_frame};
use crate::listeners::{ConnectionMessageListener, ListenerRegistry};
use crate::{CodecError, ConnectionError};

/// Which side opened the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Accepted by our server listening on `local_address`.
    Inbound { local_address: Address },
    /// Dialed by us to `address`.
    Outbound { address: Address },
}

/// Owner of a connection's read loop. Implemented by the node.
pub(crate) trait ConnectionHandler: Send + Sync {
    fn on_message(&self, message: Message, connection: &Arc<Connection>);

    /// Called exactly once when the read loop ends. `error` is `None` when
    /// the connection was closed locally.
    fn on_closed(&self, connection: &Arc<Connection>, error: Option<ConnectionError>);
}

pub struct Connection {
    id: ConnectionId,
    kind: ConnectionKind,
    peer_capability: Capability,
    remote_addr: Option<SocketAddr>,
    socket_timeout: Duration,
    max_message_size: usize,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Taken by the read loop when it starts.
    reader: Mutex<Option<OwnedReadHalf>>,
    closed: watch::Sender<bool>,
    listeners: ListenerRegistry<dyn ConnectionMessageListener>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        kind: ConnectionKind,
        peer_capability: Capability,
        socket_timeout: Duration,
        max_message_size: usize,
    ) -> Arc<Self> {
        let remote_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: ConnectionId::random(),
            kind,
            peer_capability,
            remote_addr,
            socket_timeout,
            max_message_size,
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            closed,
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> &ConnectionKind {
        &self.kind
    }

    pub fn is_outbound(&self) -> bool {
        matches!(self.kind, ConnectionKind::Outbound { .. })
    }

    pub fn peer_capability(&self) -> &Capability {
        &self.peer_capability
    }

    /// The address the peer advertised during the handshake.
    pub fn peer_address(&self) -> &Address {
        self.peer_capability.address()
    }

    /// Socket-level remote endpoint. For Tor and I2P this is the local daemon.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Completes when the connection is closed, locally or by the peer.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        wait_closed(&mut closed).await;
    }

    pub fn add_message_listener(&self, listener: Arc<dyn ConnectionMessageListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn ConnectionMessageListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub(crate) fn dispatch(&self, message: Arc<Message>) {
        self.listeners.dispatch(move |listener| listener.on_message(&message));
    }

    /// Write one frame. Writes are serialized; a close aborts a pending write.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(ConnectionError::Closed);
        }
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;
            write_frame(writer, message).await?;
            Ok(())
        };
        tokio::select! {
            result = write => result,
            _ = wait_closed(&mut closed) => Err(ConnectionError::Closed),
        }
    }

    /// Flag the connection closed and wake the read loop. Returns `true` for
    /// the call that actually closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Close the socket. Idempotent.
    pub async fn shutdown(&self) {
        if self.mark_closed() {
            tracing::debug!(connection = %self, "shutting down connection");
        }
        self.release().await;
    }

    async fn release(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Spawn the read loop. Only the first call starts it; later calls (or
    /// calls after shutdown) return `false`.
    pub(crate) fn start_reading(self: &Arc<Self>, handler: Arc<dyn ConnectionHandler>) -> bool {
        let Some(mut reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        let connection = Arc::clone(self);
        let mut closed = self.closed.subscribe();
        tokio::spawn(async move {
            let error = loop {
                tokio::select! {
                    _ = wait_closed(&mut closed) => break None,
                    result = connection.read_next(&mut reader) => match result {
                        Ok(message) => handler.on_message(message, &connection),
                        Err(e) => break Some(ConnectionError::Codec(e)),
                    },
                }
            };
            // A read error racing a local close is not the peer's fault.
            let error = if connection.mark_closed() { error } else { None };
            drop(reader);
            connection.release().await;
            handler.on_closed(&connection, error);
        });
        true
    }

    async fn read_next(&self, reader: &mut OwnedReadHalf) -> Result<Message, CodecError> {
        match tokio::time::timeout(self.socket_timeout, read_frame(reader, self.max_message_size))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "no message within socket timeout",
            ))),
        }
    }
}

/// Resolve once `closed` turns true or its sender is gone. The
/// `watch::Ref` is dropped here and never held across an await.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.is_outbound() { "outbound" } else { "inbound" };
        write!(f, "{} {direction} {}", self.id, self.peer_address().print())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("peer", self.peer_address())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAX_FRAME_SIZE;
    use harbor_messages::Ping;
    use harbor_types::TransportType;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    enum Event {
        Message(Message),
        Closed(Option<ConnectionError>),
    }

    struct Recorder(mpsc::UnboundedSender<Event>);

    impl ConnectionHandler for Recorder {
        fn on_message(&self, message: Message, _connection: &Arc<Connection>) {
            let _ = self.0.send(Event::Message(message));
        }

        fn on_closed(&self, _connection: &Arc<Connection>, error: Option<ConnectionError>) {
            let _ = self.0.send(Event::Closed(error));
        }
    }

    async fn pair() -> (Arc<Connection>, Arc<Connection>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(listener.local_addr().unwrap());
        let (client, server) = tokio::join!(TcpStream::connect(listener.local_addr().unwrap()), async {
            listener.accept().await.unwrap().0
        });
        let capability = |port| Capability::new(Address::localhost(port), [TransportType::ClearNet]);
        let outbound = Connection::new(
            client.unwrap(),
            ConnectionKind::Outbound {
                address: address.clone(),
            },
            capability(address.port()),
            Duration::from_secs(5),
            MAX_FRAME_SIZE,
        );
        let inbound = Connection::new(
            server,
            ConnectionKind::Inbound {
                local_address: address,
            },
            capability(1),
            Duration::from_secs(5),
            MAX_FRAME_SIZE,
        );
        (outbound, inbound)
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timed out")
            .expect("handler dropped")
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (outbound, inbound) = pair().await;
        let (handler, mut events) = recorder();
        assert!(inbound.start_reading(handler.clone()));
        assert!(!inbound.start_reading(handler));

        for nonce in 0..10 {
            outbound.send(&Message::from(Ping { nonce })).await.unwrap();
        }
        for nonce in 0..10 {
            match next(&mut events).await {
                Event::Message(Message::Ping(ping)) => assert_eq!(ping.nonce, nonce),
                _ => panic!("expected ping {nonce}"),
            }
        }
    }

    #[tokio::test]
    async fn local_shutdown_is_idempotent_and_quiet() {
        let (outbound, _inbound) = pair().await;
        let (handler, mut events) = recorder();
        outbound.start_reading(handler);

        outbound.shutdown().await;
        outbound.shutdown().await;
        assert!(outbound.is_closed());
        assert!(matches!(next(&mut events).await, Event::Closed(None)));
        assert!(matches!(
            outbound.send(&Message::from(Ping { nonce: 1 })).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn peer_close_reports_expected_error() {
        let (outbound, inbound) = pair().await;
        let (handler, mut events) = recorder();
        inbound.start_reading(handler);

        outbound.shutdown().await;
        match next(&mut events).await {
            Event::Closed(Some(error)) => {
                assert_eq!(error.severity(), crate::Severity::Expected)
            }
            _ => panic!("expected close with EOF"),
        }
        assert!(inbound.is_closed());
    }

    #[tokio::test]
    async fn per_connection_listeners_receive_dispatch() {
        struct Forward(mpsc::UnboundedSender<Message>);
        impl ConnectionMessageListener for Forward {
            fn on_message(&self, message: &Message) {
                let _ = self.0.send(message.clone());
            }
        }

        let (outbound, _inbound) = pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn ConnectionMessageListener> = Arc::new(Forward(tx));
        assert!(outbound.add_message_listener(listener.clone()));
        outbound.dispatch(Arc::new(Message::from(Ping { nonce: 3 })));
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Message::from(Ping { nonce: 3 }));
        assert!(outbound.remove_message_listener(&listener));
    }
}
