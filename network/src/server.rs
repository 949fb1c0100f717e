//! Accept loop for inbound sockets.

use std::future::Future;
use std::io;

use harbor_types::Address;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::ServerSocket;

/// Listens on a bound [`ServerSocket`] and hands every accepted socket to
/// `on_socket` on its own task, so a slow handshake never stalls accepting.
pub struct Server {
    address: Address,
    closed: watch::Sender<bool>,
    accept_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn start<F, Fut, E>(server_socket: ServerSocket, on_socket: F, on_error: E) -> Self
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        E: Fn(io::Error) + Send + Sync + 'static,
    {
        let ServerSocket { listener, address } = server_socket;
        let (closed, mut closed_rx) = watch::channel(false);
        let log_address = address.print();
        let accept_loop = tokio::spawn(async move {
            tracing::info!(address = %log_address, "server accepting connections");
            loop {
                tokio::select! {
                    _ = stopped(&mut closed_rx) => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(remote = %remote, "accepted socket");
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(error = %e, "set_nodelay failed");
                            }
                            tokio::spawn(on_socket(stream));
                        }
                        Err(e) => {
                            on_error(e);
                            // Back off on fd exhaustion and similar.
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    },
                }
            }
            tracing::debug!(address = %log_address, "server accept loop stopped");
        });
        Self {
            address,
            closed,
            accept_loop: tokio::sync::Mutex::new(Some(accept_loop)),
        }
    }

    /// Public address peers dial to reach this server.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Stop accepting and release the listening socket. Idempotent.
    pub async fn shutdown(&self) {
        self.closed.send_replace(true);
        let handle = self.accept_loop.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn stopped(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn bound() -> ServerSocket {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(listener.local_addr().unwrap());
        ServerSocket { listener, address }
    }

    #[tokio::test]
    async fn accepted_sockets_reach_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Server::start(
            bound().await,
            move |stream: TcpStream| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(stream.peer_addr().ok());
                }
            },
            |_| {},
        );
        let client = TcpStream::connect((server.address().host(), server.address().port()))
            .await
            .unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, client.local_addr().ok());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let server = Server::start(bound().await, |_stream: TcpStream| async {}, |_| {});
        let address = server.address().clone();
        server.shutdown().await;
        server.shutdown().await;
        assert!(server.is_closed());
        // The listener is dropped with the accept loop, so the port binds again.
        TcpListener::bind((address.host(), address.port()))
            .await
            .unwrap();
    }
}
