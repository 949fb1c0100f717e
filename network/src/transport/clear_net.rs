use async_trait::async_trait;
use harbor_types::{Address, TransportType};
use tokio::net::{TcpListener, TcpStream};

use super::{ServerSocket, Transport};
use crate::config::ClearNetConfig;
use crate::TransportError;

/// Plain TCP. No daemon, no anonymity.
#[derive(Debug)]
pub struct ClearNetTransport {
    config: ClearNetConfig,
}

impl ClearNetTransport {
    pub fn new(config: ClearNetConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for ClearNetTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::ClearNet
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn server_socket(
        &self,
        port: u16,
        node_id: &str,
    ) -> Result<ServerSocket, TransportError> {
        let bind_address = format!("{}:{port}", self.config.bind_host);
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|source| TransportError::Bind {
                address: bind_address.clone(),
                source,
            })?;
        // Port 0 asks the OS for one; advertise what we actually got.
        let bound_port = listener.local_addr()?.port();
        let address = Address::new(self.config.advertised_host(), bound_port);
        tracing::info!(node_id, address = %address, "clear net server socket bound");
        Ok(ServerSocket { listener, address })
    }

    async fn socket(&self, address: &Address) -> Result<TcpStream, TransportError> {
        let timeout = self.config.connect_timeout();
        let target = (address.host(), address.port());
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(source)) => Err(TransportError::Unreachable {
                address: address.to_string(),
                source,
            }),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn ephemeral_port_is_advertised() {
        let transport = ClearNetTransport::new(ClearNetConfig::default());
        let server = transport.server_socket(0, "node").await.unwrap();
        assert_ne!(server.address.port(), 0);
        assert_eq!(server.address.host(), "127.0.0.1");
    }

    #[tokio::test]
    async fn dials_bound_socket() {
        let transport = ClearNetTransport::new(ClearNetConfig::default());
        let server = transport.server_socket(0, "node").await.unwrap();
        let address = server.address.clone();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = server.listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });
        let mut client = transport.socket(&address).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn refused_dial_is_unreachable() {
        let port = harbor_utils::find_free_port().unwrap();
        let transport = ClearNetTransport::new(ClearNetConfig::default());
        let err = transport.socket(&Address::localhost(port)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }
}
