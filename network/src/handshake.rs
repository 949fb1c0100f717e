//! Capability exchange performed once on every fresh socket.
//!
//! The dialing side sends an authorized `HandshakeRequest` carrying its
//! capability and waits for the `HandshakeResponse`. The accepting side
//! does the reverse. Both directions run under the socket timeout.

use std::sync::Arc;
use std::time::Duration;

use harbor_messages::{AuthorizedMessage, HandshakeRequest, HandshakeResponse, Message};
use harbor_types::{Address, Capability};
use harbor_work::{AuthorizationError, AuthorizationService};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{read_frame, write_frame};
use crate::HandshakeError;

/// Wrap `message` in an authorized envelope minted for its kind.
pub(crate) async fn authorize(
    authorization: &dyn AuthorizationService,
    message: Message,
) -> Result<Message, AuthorizationError> {
    let token = authorization.create_token(message.kind()).await?;
    Ok(Message::Authorized(AuthorizedMessage::new(message, token)))
}

pub struct ConnectionHandshake {
    my_capability: Capability,
    authorization: Arc<dyn AuthorizationService>,
    socket_timeout: Duration,
    max_message_size: usize,
}

impl ConnectionHandshake {
    pub fn new(
        my_capability: Capability,
        authorization: Arc<dyn AuthorizationService>,
        socket_timeout: Duration,
        max_message_size: usize,
    ) -> Self {
        Self {
            my_capability,
            authorization,
            socket_timeout,
            max_message_size,
        }
    }

    pub fn my_capability(&self) -> &Capability {
        &self.my_capability
    }

    /// Outbound side. Returns the peer's capability once its response
    /// arrives; the reported address must be the one we dialed.
    pub async fn start<S>(
        &self,
        stream: &mut S,
        dialed: &Address,
    ) -> Result<Capability, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let capability = self.bounded(self.request(stream, dialed)).await?;
        tracing::debug!(peer = %capability.address().print(), "outbound handshake complete");
        Ok(capability)
    }

    /// Inbound side. Validates the request and answers with our capability.
    pub async fn on_socket<S>(&self, stream: &mut S) -> Result<Capability, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let capability = self.bounded(self.respond(stream)).await?;
        tracing::debug!(peer = %capability.address().print(), "inbound handshake complete");
        Ok(capability)
    }

    async fn request<S>(
        &self,
        stream: &mut S,
        dialed: &Address,
    ) -> Result<Capability, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = Message::HandshakeRequest(HandshakeRequest {
            capability: self.my_capability.clone(),
        });
        let request = authorize(self.authorization.as_ref(), request).await?;
        write_frame(stream, &request).await?;

        let capability = match self.read_authorized(stream).await? {
            Message::HandshakeResponse(response) => response.capability,
            other => return Err(HandshakeError::UnexpectedMessage(other.kind())),
        };
        if capability.address() != dialed {
            return Err(HandshakeError::AddressMismatch {
                expected: dialed.clone(),
                reported: capability.address().clone(),
            });
        }
        Ok(capability)
    }

    async fn respond<S>(&self, stream: &mut S) -> Result<Capability, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let capability = match self.read_authorized(stream).await? {
            Message::HandshakeRequest(request) => request.capability,
            other => return Err(HandshakeError::UnexpectedMessage(other.kind())),
        };
        let response = Message::HandshakeResponse(HandshakeResponse {
            capability: self.my_capability.clone(),
        });
        let response = authorize(self.authorization.as_ref(), response).await?;
        write_frame(stream, &response).await?;
        Ok(capability)
    }

    async fn bounded<F>(&self, exchange: F) -> Result<Capability, HandshakeError>
    where
        F: std::future::Future<Output = Result<Capability, HandshakeError>>,
    {
        tokio::time::timeout(self.socket_timeout, exchange)
            .await
            .map_err(|_| HandshakeError::Timeout(self.socket_timeout))?
    }

    /// Read one frame that must be a valid authorized envelope.
    async fn read_authorized<S>(&self, stream: &mut S) -> Result<Message, HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        match read_frame(stream, self.max_message_size).await? {
            Message::Authorized(authorized) => {
                if !self.authorization.is_authorized(&authorized) {
                    return Err(HandshakeError::Unauthorized);
                }
                Ok(authorized.into_message())
            }
            other => Err(HandshakeError::UnexpectedMessage(other.kind())),
        }
    }
}
