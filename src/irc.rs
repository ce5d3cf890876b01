//! Minimal IRC client.
//!
//! One connection task owns the socket: it registers (optional PASS, NICK,
//! USER), joins the configured channel after RPL_WELCOME, answers PING, and
//! drains an outbound queue of raw command lines. [`IrcHandle`] is the
//! cloneable send side of that queue; the session only ever talks to the
//! [`ChatSink`] trait, so tests can substitute a collecting stub.
//!
//! There is no reconnection: a failed or closed connection surfaces as a
//! [`SessionEvent::ChatError`] and the daemon keeps running without chat.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::session::SessionEvent;

/// Connection parameters for the IRC side.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nick: String,
    pub password: Option<String>,
    pub channel: String,
    /// Log every raw protocol frame at debug level.
    pub verbose: bool,
}

/// Errors at the chat boundary.
#[derive(Debug)]
pub enum ChatError {
    /// Failed to establish or register the connection.
    ConnectFailed(String),
    /// Failed to write a command.
    SendFailed(String),
    /// Failed to read from the server.
    ReceiveFailed(String),
    /// The server rejected us (ERROR frame, nick collision).
    Protocol(String),
    /// The server closed the connection.
    Closed,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "send failed: {msg}"),
            Self::ReceiveFailed(msg) => write!(f, "receive failed: {msg}"),
            Self::Protocol(msg) => write!(f, "server error: {msg}"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ChatError {}

/// Where announcements go.
///
/// The session depends on this seam rather than on the IRC client directly.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Deliver `text` to `target` (a channel or nick).
    async fn send(&self, target: &str, text: &str) -> Result<(), ChatError>;
}

/// Cloneable handle feeding the connection task's outbound queue.
#[derive(Debug, Clone)]
pub struct IrcHandle {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl ChatSink for IrcHandle {
    async fn send(&self, target: &str, text: &str) -> Result<(), ChatError> {
        self.tx
            .send(format!("PRIVMSG {target} :{text}"))
            .await
            .map_err(|_| ChatError::SendFailed("connection task gone".to_string()))
    }
}

/// Connect and register, spawning the connection task.
///
/// Readiness and later failures are delivered to `events`; only the initial
/// TCP connect is reported synchronously.
pub async fn connect(
    config: IrcConfig,
    events: mpsc::Sender<SessionEvent>,
) -> Result<IrcHandle, ChatError> {
    let stream = TcpStream::connect((config.server.as_str(), config.port))
        .await
        .map_err(|e| ChatError::ConnectFailed(format!("{}:{}: {e}", config.server, config.port)))?;
    log::info!("connected to {}:{}", config.server, config.port);

    let (tx, rx) = mpsc::channel(64);
    let error_events = events.clone();
    tokio::spawn(async move {
        if let Err(e) = run_connection(stream, config, rx, events).await {
            let _ = error_events
                .send(SessionEvent::ChatError(e.to_string()))
                .await;
        }
    });

    Ok(IrcHandle { tx })
}

async fn run_connection(
    stream: TcpStream,
    config: IrcConfig,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<(), ChatError> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();
    // Outbound messages queue up until registration completes; the server
    // would reject a PRIVMSG sent before RPL_WELCOME.
    let mut registered = false;

    if let Some(password) = &config.password {
        send_raw(&mut writer, &config, &format!("PASS {password}")).await?;
    }
    send_raw(&mut writer, &config, &format!("NICK {}", config.nick)).await?;
    send_raw(
        &mut writer,
        &config,
        &format!("USER {} 0 * :{}", config.nick, config.nick),
    )
    .await?;

    loop {
        tokio::select! {
            line = reader.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return Err(ChatError::Closed),
                    Err(e) => return Err(ChatError::ReceiveFailed(e.to_string())),
                };
                if config.verbose {
                    log::debug!("irc <- {line}");
                }
                match classify(&line) {
                    ServerMessage::Ping(token) => {
                        send_raw(&mut writer, &config, &format!("PONG {token}")).await?;
                    }
                    ServerMessage::Welcome => {
                        log::info!("registered with {}; joining {}", config.server, config.channel);
                        send_raw(&mut writer, &config, &format!("JOIN {}", config.channel)).await?;
                        registered = true;
                        let _ = events.send(SessionEvent::ChatReady).await;
                    }
                    ServerMessage::NickInUse => {
                        return Err(ChatError::Protocol(format!(
                            "nickname {} already in use",
                            config.nick
                        )));
                    }
                    ServerMessage::Error(reason) => {
                        return Err(ChatError::Protocol(reason.to_string()));
                    }
                    ServerMessage::Other => {}
                }
            }
            command = outbound.recv(), if registered => match command {
                Some(command) => send_raw(&mut writer, &config, &command).await?,
                // All handles dropped: orderly shutdown.
                None => return Ok(()),
            },
        }
    }
}

async fn send_raw(
    writer: &mut OwnedWriteHalf,
    config: &IrcConfig,
    line: &str,
) -> Result<(), ChatError> {
    if config.verbose {
        if line.starts_with("PASS ") {
            log::debug!("irc -> PASS ******");
        } else {
            log::debug!("irc -> {line}");
        }
    }
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ChatError::SendFailed(e.to_string()))?;
    writer
        .write_all(b"\r\n")
        .await
        .map_err(|e| ChatError::SendFailed(e.to_string()))
}

/// The server messages the client reacts to.
#[derive(Debug, PartialEq, Eq)]
enum ServerMessage<'a> {
    Ping(&'a str),
    Welcome,
    NickInUse,
    Error(&'a str),
    Other,
}

fn classify(line: &str) -> ServerMessage<'_> {
    let line = line.trim_end_matches('\r');
    if let Some(token) = line.strip_prefix("PING ") {
        return ServerMessage::Ping(token);
    }
    if let Some(reason) = line.strip_prefix("ERROR ") {
        return ServerMessage::Error(reason.trim_start_matches(':'));
    }

    // ":server 001 nick :welcome" puts the command after the prefix token.
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().unwrap_or("");
    let command = if first.starts_with(':') {
        parts.next().unwrap_or("")
    } else {
        first
    };
    match command {
        "001" => ServerMessage::Welcome,
        "433" => ServerMessage::NickInUse,
        _ => ServerMessage::Other,
    }
}
