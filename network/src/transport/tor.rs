//! Tor transport driving a running tor daemon through its control port.
//!
//! Inbound: an ephemeral v3 onion service (`ADD_ONION`) forwards to a
//! loopback listener. Outbound: SOCKS5 CONNECT through tor's SOCKS port.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use harbor_types::{Address, TransportType};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{bind_loopback, connect_daemon, parse_endpoint, socks5_connect};
use super::{ServerSocket, SocksProxy, Transport};
use crate::config::TorConfig;
use crate::TransportError;

/// Circuits to onion services routinely take tens of seconds.
const TOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const NEW_ONION_KEY: &str = "NEW:ED25519-V3";

pub struct TorTransport {
    config: TorConfig,
    state: Mutex<TorState>,
}

#[derive(Default)]
struct TorState {
    control: Option<TorControl<TcpStream>>,
    /// Keyed by node id so a rebind publishes the same onion name.
    services: HashMap<String, OnionService>,
}

struct OnionService {
    service_id: String,
    private_key: String,
    active: bool,
}

impl TorTransport {
    pub fn new(config: TorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TorState::default()),
        }
    }

    async fn wait_for_bootstrap(
        &self,
        control: &mut TorControl<TcpStream>,
    ) -> Result<(), TransportError> {
        let timeout = self.config.bootstrap_timeout();
        let poll = async {
            loop {
                let progress = control.bootstrap_progress().await?;
                tracing::debug!(progress, "tor bootstrap progress");
                if progress >= 100 {
                    return Ok::<(), TransportError>(());
                }
                tokio::time::sleep(BOOTSTRAP_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

impl fmt::Debug for TorTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorTransport")
            .field("socks_addr", &self.config.socks_addr)
            .field("control_addr", &self.config.control_addr)
            .finish()
    }
}

#[async_trait]
impl Transport for TorTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Tor
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.control.is_some() {
            return Ok(());
        }
        let stream = connect_daemon(&self.config.control_addr).await?;
        let mut control = TorControl::new(stream);
        control
            .authenticate(self.config.control_password.as_deref())
            .await?;
        self.wait_for_bootstrap(&mut control).await?;
        tracing::info!(control = %self.config.control_addr, "tor bootstrapped");
        state.control = Some(control);
        Ok(())
    }

    async fn server_socket(
        &self,
        port: u16,
        node_id: &str,
    ) -> Result<ServerSocket, TransportError> {
        let listener = bind_loopback(0).await?;
        let local_port = listener.local_addr()?.port();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let control = state
            .control
            .as_mut()
            .ok_or(TransportError::NotInitialized)?;

        // A still-published service for this node would collide with the new one.
        if let Some(existing) = state.services.get_mut(node_id) {
            if existing.active {
                if let Err(e) = control.del_onion(&existing.service_id).await {
                    tracing::debug!(error = %e, "removing previous onion service failed");
                }
                existing.active = false;
            }
        }

        let key = state
            .services
            .get(node_id)
            .map(|s| s.private_key.clone())
            .unwrap_or_else(|| NEW_ONION_KEY.to_string());
        let (service_id, new_key) = control.add_onion(&key, port, local_port).await?;
        let private_key = new_key.unwrap_or(key);
        state.services.insert(
            node_id.to_string(),
            OnionService {
                service_id: service_id.clone(),
                private_key,
                active: true,
            },
        );

        let address = Address::new(format!("{service_id}.onion"), port);
        tracing::info!(node_id, address = %address.print(), local_port, "onion service published");
        Ok(ServerSocket { listener, address })
    }

    async fn socket(&self, address: &Address) -> Result<TcpStream, TransportError> {
        let dial = async {
            let mut stream = connect_daemon(&self.config.socks_addr).await?;
            socks5_connect(&mut stream, address.host(), address.port()).await?;
            Ok::<_, TransportError>(stream)
        };
        tokio::time::timeout(TOR_CONNECT_TIMEOUT, dial)
            .await
            .map_err(|_| TransportError::Timeout(TOR_CONNECT_TIMEOUT))?
    }

    fn socks_proxy(&self) -> Option<SocksProxy> {
        match parse_endpoint(&self.config.socks_addr) {
            Ok(address) => Some(SocksProxy { address }),
            Err(e) => {
                tracing::warn!(error = %e, "invalid tor socks address");
                None
            }
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(mut control) = state.control.take() else {
            return;
        };
        for service in state.services.values_mut().filter(|s| s.active) {
            if let Err(e) = control.del_onion(&service.service_id).await {
                tracing::debug!(service = %service.service_id, error = %e, "DEL_ONION failed");
            }
            service.active = false;
        }
        tracing::info!("tor transport shut down");
    }
}

// ── Control protocol ───────────────────────────────────────────────────

/// One reply to a control command: status code plus the text of each line.
#[derive(Debug, PartialEq, Eq)]
struct ControlReply {
    status: u16,
    lines: Vec<String>,
}

impl ControlReply {
    /// Value of the first `KEY=value` line with this key.
    fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Split a reply line into status code, separator and text.
fn parse_reply_line(line: &str) -> Result<(u16, char, &str), TransportError> {
    let malformed = || TransportError::Control(format!("malformed reply line: {line:?}"));
    if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
        return Err(malformed());
    }
    let status: u16 = line[..3].parse().map_err(|_| malformed())?;
    let separator = line[3..4].chars().next().ok_or_else(malformed)?;
    if !matches!(separator, ' ' | '-' | '+') {
        return Err(malformed());
    }
    Ok((status, separator, &line[4..]))
}

async fn read_reply<R>(reader: &mut R) -> Result<ControlReply, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let line = read_control_line(reader).await?;
        let (status, separator, text) = parse_reply_line(&line)?;
        match separator {
            ' ' => {
                lines.push(text.to_string());
                return Ok(ControlReply { status, lines });
            }
            '-' => lines.push(text.to_string()),
            _ => {
                // Data reply: dot-terminated block following the keyword line.
                let mut data = text.to_string();
                loop {
                    let data_line = read_control_line(reader).await?;
                    if data_line == "." {
                        break;
                    }
                    data.push('\n');
                    data.push_str(data_line.strip_prefix('.').unwrap_or(&data_line));
                }
                lines.push(data);
            }
        }
    }
}

async fn read_control_line<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(TransportError::Control(
            "control connection closed".to_string(),
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse `PROGRESS=n` out of a `status/bootstrap-phase` value.
fn parse_bootstrap_progress(phase: &str) -> Option<u8> {
    phase
        .split_whitespace()
        .find_map(|token| token.strip_prefix("PROGRESS="))
        .and_then(|n| n.parse().ok())
}

struct TorControl<S> {
    stream: BufReader<S>,
}

impl<S> TorControl<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn command(&mut self, command: &str) -> Result<ControlReply, TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        let reply = read_reply(&mut self.stream).await?;
        if reply.status != 250 {
            let verb = command.split_whitespace().next().unwrap_or_default();
            return Err(TransportError::Control(format!(
                "{verb} failed: {} {}",
                reply.status,
                reply.lines.join(" ")
            )));
        }
        Ok(reply)
    }

    async fn authenticate(&mut self, password: Option<&str>) -> Result<(), TransportError> {
        let command = match password {
            Some(password) => format!("AUTHENTICATE {}", quote(password)),
            None => "AUTHENTICATE".to_string(),
        };
        self.command(&command).await.map(|_| ())
    }

    async fn bootstrap_progress(&mut self) -> Result<u8, TransportError> {
        let reply = self.command("GETINFO status/bootstrap-phase").await?;
        reply
            .value("status/bootstrap-phase")
            .and_then(parse_bootstrap_progress)
            .ok_or_else(|| TransportError::Control("no bootstrap progress in reply".to_string()))
    }

    /// Publish `virtual_port` on the onion forwarding to `local_port`.
    /// Returns the service id and, for new keys, the generated private key.
    async fn add_onion(
        &mut self,
        key: &str,
        virtual_port: u16,
        local_port: u16,
    ) -> Result<(String, Option<String>), TransportError> {
        let reply = self
            .command(&format!(
                "ADD_ONION {key} Port={virtual_port},127.0.0.1:{local_port}"
            ))
            .await?;
        let service_id = reply
            .value("ServiceID")
            .ok_or_else(|| TransportError::Control("ADD_ONION reply lacks ServiceID".to_string()))?
            .to_string();
        let private_key = reply.value("PrivateKey").map(str::to_string);
        Ok((service_id, private_key))
    }

    async fn del_onion(&mut self, service_id: &str) -> Result<(), TransportError> {
        self.command(&format!("DEL_ONION {service_id}"))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn reply_line_parsing() {
        assert_eq!(parse_reply_line("250 OK").unwrap(), (250, ' ', "OK"));
        assert_eq!(
            parse_reply_line("250-ServiceID=abc").unwrap(),
            (250, '-', "ServiceID=abc")
        );
        assert!(parse_reply_line("25").is_err());
        assert!(parse_reply_line("abc OK").is_err());
        assert!(parse_reply_line("250*OK").is_err());
    }

    #[test]
    fn bootstrap_progress_parsing() {
        let phase = r#"NOTICE BOOTSTRAP PROGRESS=85 TAG=ap_conn_done SUMMARY="Connected""#;
        assert_eq!(parse_bootstrap_progress(phase), Some(85));
        assert_eq!(parse_bootstrap_progress("NOTICE BOOTSTRAP TAG=x"), None);
    }

    #[test]
    fn password_is_quoted() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[tokio::test]
    async fn multi_line_and_data_replies() {
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"250-ServiceID=abc\r\n250+Data=\r\nline1\r\n..dotted\r\n.\r\n250 OK\r\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(client);
        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(reply.status, 250);
        assert_eq!(reply.value("ServiceID"), Some("abc"));
        assert_eq!(reply.lines[1], "Data=\nline1\n.dotted");
        assert_eq!(reply.lines[2], "OK");
    }

    #[tokio::test]
    async fn error_status_fails_command() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut control = TorControl::new(client);
        tokio::spawn(async move {
            let mut reader = BufReader::new(&mut server);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            server
                .write_all(b"515 Authentication failed\r\n")
                .await
                .unwrap();
        });
        let err = control.authenticate(Some("wrong")).await.unwrap_err();
        assert!(matches!(err, TransportError::Control(msg) if msg.contains("515")));
    }

    /// Accept one control connection and answer like a bootstrapped tor,
    /// recording every command received.
    async fn fake_tor(listener: TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut commands = Vec::new();
        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap() == 0 {
                return commands;
            }
            let command = line.trim_end().to_string();
            let reply: &[u8] = if command.starts_with("GETINFO") {
                b"250-status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS=100 TAG=done\r\n250 OK\r\n"
            } else if command.starts_with("ADD_ONION NEW") {
                b"250-ServiceID=exampleonion\r\n250-PrivateKey=ED25519-V3:c2VjcmV0\r\n250 OK\r\n"
            } else if command.starts_with("ADD_ONION") {
                b"250-ServiceID=exampleonion\r\n250 OK\r\n"
            } else {
                b"250 OK\r\n"
            };
            stream.get_mut().write_all(reply).await.unwrap();
            commands.push(command);
        }
    }

    #[tokio::test]
    async fn publishes_and_removes_onion_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_addr = listener.local_addr().unwrap().to_string();
        let daemon = tokio::spawn(fake_tor(listener));

        let transport = TorTransport::new(TorConfig {
            control_addr,
            ..TorConfig::default()
        });
        assert!(matches!(
            transport.server_socket(9999, "node-a").await,
            Err(TransportError::NotInitialized)
        ));

        transport.initialize().await.unwrap();
        let first = transport.server_socket(9999, "node-a").await.unwrap();
        assert_eq!(first.address, Address::new("exampleonion.onion", 9999));
        let second = transport.server_socket(9999, "node-a").await.unwrap();
        assert_eq!(second.address, first.address);
        transport.shutdown().await;
        drop(transport);

        let commands = daemon.await.unwrap();
        assert_eq!(commands[0], "AUTHENTICATE");
        assert_eq!(commands[1], "GETINFO status/bootstrap-phase");
        assert!(commands[2].starts_with("ADD_ONION NEW:ED25519-V3 Port=9999,127.0.0.1:"));
        assert_eq!(commands[3], "DEL_ONION exampleonion");
        assert!(commands[4].starts_with("ADD_ONION ED25519-V3:c2VjcmV0 Port=9999,"));
        assert_eq!(commands[5], "DEL_ONION exampleonion");
        assert_eq!(commands.len(), 6);
    }
}
