//! I2P transport over a SAM v3 bridge.
//!
//! Each node id gets a STREAM session with a transient destination. Inbound
//! streams are forwarded by the bridge to a loopback listener; outbound
//! streams are SAM sockets turned into data pipes by `STREAM CONNECT`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use harbor_types::{Address, TransportType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{bind_loopback, connect_daemon, ServerSocket, Transport};
use crate::config::I2pConfig;
use crate::TransportError;

/// Private keys in SESSION STATUS replies run to about 900 bytes.
const MAX_SAM_LINE: usize = 16 * 1024;
const MIN_SAM_VERSION: &str = "3.0";

pub struct I2pTransport {
    config: I2pConfig,
    sessions: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    by_node: HashMap<String, SamSession>,
    /// Session used for outbound streams.
    primary: Option<String>,
}

/// Sockets that must stay open for the session and its forwarding to live.
struct SamSession {
    session_id: String,
    destination: String,
    _control: TcpStream,
    _forward: TcpStream,
}

impl I2pTransport {
    pub fn new(config: I2pConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Open a SAM socket and complete the HELLO exchange.
    async fn open(&self) -> Result<TcpStream, TransportError> {
        let mut stream = connect_daemon(&self.config.sam_addr).await?;
        hello(&mut stream, &self.config.sam_version).await?;
        Ok(stream)
    }
}

impl fmt::Debug for I2pTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2pTransport")
            .field("sam_addr", &self.config.sam_addr)
            .finish()
    }
}

#[async_trait]
impl Transport for I2pTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::I2p
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        // Check the bridge answers; sessions open their own sockets.
        let _bridge = self.open().await?;
        tracing::info!(sam = %self.config.sam_addr, "SAM bridge reachable");
        Ok(())
    }

    async fn server_socket(
        &self,
        port: u16,
        node_id: &str,
    ) -> Result<ServerSocket, TransportError> {
        let mut sessions = self.sessions.lock().await;
        // Dropping the old session's sockets tears it down on the bridge.
        sessions.by_node.remove(node_id);

        let session_id = session_id_for(node_id);
        let mut control = self.open().await?;
        sam_command(
            &mut control,
            &format!(
                "SESSION CREATE STYLE=STREAM ID={session_id} DESTINATION=TRANSIENT SIGNATURE_TYPE=7"
            ),
            "SESSION",
        )
        .await?;
        let lookup = sam_command(&mut control, "NAMING LOOKUP NAME=ME", "NAMING").await?;
        let destination = lookup
            .value("VALUE")
            .ok_or_else(|| TransportError::Bootstrap("NAMING reply lacks VALUE".to_string()))?
            .to_string();

        let listener = bind_loopback(0).await?;
        let local_port = listener.local_addr()?.port();
        let mut forward = self.open().await?;
        sam_command(
            &mut forward,
            &format!("STREAM FORWARD ID={session_id} PORT={local_port} HOST=127.0.0.1 SILENT=true"),
            "STREAM",
        )
        .await?;

        let address = Address::new(destination.clone(), port);
        tracing::info!(node_id, address = %address.print(), local_port, "I2P session created");
        sessions.by_node.insert(
            node_id.to_string(),
            SamSession {
                session_id,
                destination,
                _control: control,
                _forward: forward,
            },
        );
        if sessions
            .primary
            .as_ref()
            .map_or(true, |primary| !sessions.by_node.contains_key(primary))
        {
            sessions.primary = Some(node_id.to_string());
        }
        Ok(ServerSocket { listener, address })
    }

    async fn socket(&self, address: &Address) -> Result<TcpStream, TransportError> {
        let session_id = {
            let sessions = self.sessions.lock().await;
            sessions
                .primary
                .as_ref()
                .and_then(|node_id| sessions.by_node.get(node_id))
                .map(|session| session.session_id.clone())
                .ok_or(TransportError::NotInitialized)?
        };
        let timeout = self.config.connect_timeout();
        let dial = async {
            let mut stream = self.open().await?;
            sam_command(
                &mut stream,
                &format!(
                    "STREAM CONNECT ID={session_id} DESTINATION={} SILENT=false",
                    address.host()
                ),
                "STREAM",
            )
            .await?;
            Ok::<_, TransportError>(stream)
        };
        tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.by_node.values() {
            tracing::debug!(
                session = %session.session_id,
                destination = %Address::new(session.destination.clone(), 0).print(),
                "closing I2P session"
            );
        }
        sessions.by_node.clear();
        sessions.primary = None;
    }
}

/// SAM session ids may not contain whitespace.
fn session_id_for(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ── SAM protocol ───────────────────────────────────────────────────────

/// A parsed SAM reply such as `STREAM STATUS RESULT=OK`.
#[derive(Debug, PartialEq, Eq)]
struct SamReply {
    topic: String,
    kind: String,
    values: BTreeMap<String, String>,
}

impl SamReply {
    fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn is_ok(&self) -> bool {
        self.value("RESULT") == Some("OK")
    }
}

/// Split a SAM line into tokens, honouring double-quoted values.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_sam_reply(line: &str) -> Result<SamReply, TransportError> {
    let mut tokens = tokenize(line).into_iter();
    let (Some(topic), Some(kind)) = (tokens.next(), tokens.next()) else {
        return Err(TransportError::Bootstrap(format!(
            "malformed SAM reply: {line:?}"
        )));
    };
    let values = tokens
        .map(|token| match token.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (token, String::new()),
        })
        .collect();
    Ok(SamReply {
        topic,
        kind,
        values,
    })
}

/// Read one `\n`-terminated line without buffering past it, so a socket
/// that becomes a data stream afterwards loses no bytes.
async fn read_sam_line<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if bytes.len() >= MAX_SAM_LINE {
            return Err(TransportError::Bootstrap("SAM reply too long".to_string()));
        }
        bytes.push(byte);
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes)
        .map_err(|_| TransportError::Bootstrap("SAM reply is not UTF-8".to_string()))
}

/// Send `command` and require an `OK` reply whose topic is `topic`.
async fn sam_command<S>(
    stream: &mut S,
    command: &str,
    topic: &str,
) -> Result<SamReply, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    let reply = parse_sam_reply(&read_sam_line(stream).await?)?;
    if reply.topic != topic || !reply.is_ok() {
        let result = reply.value("RESULT").unwrap_or("none");
        let message = reply.value("MESSAGE").unwrap_or_default();
        return Err(TransportError::Bootstrap(format!(
            "{command_verb} failed: RESULT={result} {message}",
            command_verb = command.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
        )));
    }
    Ok(reply)
}

async fn hello<S>(stream: &mut S, max_version: &str) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply = sam_command(
        stream,
        &format!("HELLO VERSION MIN={MIN_SAM_VERSION} MAX={max_version}"),
        "HELLO",
    )
    .await?;
    tracing::debug!(version = reply.value("VERSION").unwrap_or("?"), "SAM hello");
    Ok(())
}
