//! Minimal SOCKS5 client (RFC 1928): no authentication, CONNECT by domain
//! name so hostnames are resolved by the proxy.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Negotiate a CONNECT to `host:port` on an already open proxy stream.
/// On success the stream carries the tunnelled connection.
pub async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if host.is_empty() || host.len() > 255 {
        return Err(TransportError::Proxy(format!(
            "host name length {} not encodable",
            host.len()
        )));
    }

    stream.write_all(&[VERSION, 1, NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(TransportError::Proxy(format!(
            "unexpected proxy version {}",
            choice[0]
        )));
    }
    if choice[1] != NO_AUTH {
        return Err(TransportError::Proxy(
            "proxy requires authentication".to_string(),
        ));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(TransportError::Proxy(format!(
            "unexpected proxy version {}",
            head[0]
        )));
    }
    if head[1] != 0x00 {
        return Err(TransportError::Proxy(reply_message(head[1]).to_string()));
    }

    // Drain the bound address; we have no use for it.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(TransportError::Proxy(format!(
                "unknown address type {other}"
            )))
        }
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONION: &str = "abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwx.onion";

    /// Play the proxy side of one CONNECT and return the request it saw.
    async fn fake_proxy<S>(mut stream: S, reply_code: u8) -> (String, u16)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [VERSION, 1, NO_AUTH]);
        stream.write_all(&[VERSION, NO_AUTH]).await.unwrap();

        let mut head = [0u8; 5];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(&head[..4], &[VERSION, CMD_CONNECT, 0, ATYP_DOMAIN]);
        let mut host = vec![0u8; head[4] as usize];
        stream.read_exact(&mut host).await.unwrap();
        let mut port = [0u8; 2];
        stream.read_exact(&mut port).await.unwrap();

        stream
            .write_all(&[VERSION, reply_code, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        (String::from_utf8(host).unwrap(), u16::from_be_bytes(port))
    }

    #[tokio::test]
    async fn connect_sends_domain_request() {
        let (mut client, proxy) = tokio::io::duplex(1024);
        let proxy = tokio::spawn(fake_proxy(proxy, 0x00));
        socks5_connect(&mut client, ONION, 9999).await.unwrap();
        let (host, port) = proxy.await.unwrap();
        assert_eq!(host, ONION);
        assert_eq!(port, 9999);
    }

    #[tokio::test]
    async fn refusal_is_reported() {
        let (mut client, proxy) = tokio::io::duplex(1024);
        tokio::spawn(fake_proxy(proxy, 0x05));
        let err = socks5_connect(&mut client, ONION, 80).await.unwrap_err();
        match err {
            TransportError::Proxy(msg) => assert_eq!(msg, "connection refused"),
            other => panic!("expected proxy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_required_is_rejected() {
        let (mut client, mut proxy) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[VERSION, 0xFF]).await.unwrap();
        });
        let err = socks5_connect(&mut client, ONION, 80).await.unwrap_err();
        assert!(matches!(err, TransportError::Proxy(_)));
    }

    #[tokio::test]
    async fn overlong_host_is_rejected_locally() {
        let (mut client, _proxy) = tokio::io::duplex(16);
        let host = "a".repeat(256);
        let err = socks5_connect(&mut client, &host, 80).await.unwrap_err();
        assert!(matches!(err, TransportError::Proxy(_)));
    }
}
