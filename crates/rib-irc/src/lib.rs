//! IRC adapter.
//!
//! Implements the `rib-core` [`ChatTransport`] over a plain or TLS TCP stream,
//! using the `irc-proto` codec for line framing. Inbound traffic is mapped to
//! [`TransportEvent`]s and pushed into the channel given at construction; the
//! connection supervisor in `rib-core` decides what to do with them.

use std::time::Duration;

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use irc_proto::{Command, IrcCodec, Message, Response};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::Framed;

use rib_core::{
    config::IrcConfig,
    errors::Error,
    transport::{port::ChatTransport, types::TransportEvent},
    Result,
};

mod tls;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest line a client may send, CRLF excluded.
const MAX_LINE_BYTES: usize = 510;

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct IrcConnectConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub realname: String,
    /// Deadline for one outgoing line, lock wait included. A peer that stops
    /// reading fills the socket buffer and would otherwise block forever.
    pub write_timeout: Duration,
}

impl From<&IrcConfig> for IrcConnectConfig {
    fn from(cfg: &IrcConfig) -> Self {
        Self {
            host: cfg.server_host.clone(),
            port: cfg.server_port,
            use_tls: cfg.use_tls,
            username: cfg.nickname.clone(),
            realname: cfg.realname.clone(),
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

trait IrcIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcIo for T {}

type IrcFramed = Framed<Box<dyn IrcIo>, IrcCodec>;

struct Connection {
    sink: SplitSink<IrcFramed, Message>,
    reader: JoinHandle<()>,
}

pub struct IrcTransport {
    cfg: IrcConnectConfig,
    events: mpsc::Sender<TransportEvent>,
    conn: Mutex<Option<Connection>>,
}

impl IrcTransport {
    pub fn new(cfg: IrcConnectConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            cfg,
            events,
            conn: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<IrcFramed> {
        let addr = (self.cfg.host.as_str(), self.cfg.port);
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "connect to {}:{} timed out",
                    self.cfg.host, self.cfg.port
                ))
            })?
            .map_err(|e| {
                Error::Transport(format!("connect to {}:{}: {e}", self.cfg.host, self.cfg.port))
            })?;

        let io: Box<dyn IrcIo> = if self.cfg.use_tls {
            Box::new(tls::wrap(&self.cfg.host, tcp).await?)
        } else {
            Box::new(tcp)
        };

        let codec = IrcCodec::new("utf-8")
            .map_err(|e| Error::Transport(format!("irc codec: {e}")))?;
        Ok(Framed::new(io, codec))
    }

    async fn send(&self, command: Command) -> Result<()> {
        let write = async {
            let mut guard = self.conn.lock().await;
            let Some(conn) = guard.as_mut() else {
                return Err(Error::Transport("not connected".to_string()));
            };
            conn.sink
                .send(Message::from(command))
                .await
                .map_err(|e| Error::Transport(format!("write failed: {e}")))
        };
        timeout(self.cfg.write_timeout, write).await.map_err(|_| {
            Error::Transport(format!(
                "write timed out after {}ms",
                self.cfg.write_timeout.as_millis()
            ))
        })?
    }
}

#[async_trait]
impl ChatTransport for IrcTransport {
    async fn connect(&self, nickname: &str) -> Result<()> {
        self.disconnect().await?;

        let framed = self.open().await?;
        let (mut sink, stream) = framed.split();

        let registration = [
            Command::NICK(nickname.to_string()),
            Command::USER(
                self.cfg.username.clone(),
                "0".to_string(),
                self.cfg.realname.clone(),
            ),
        ];
        for command in registration {
            sink.send(Message::from(command))
                .await
                .map_err(|e| Error::Transport(format!("registration failed: {e}")))?;
        }

        let reader = tokio::spawn(read_loop(stream, self.events.clone()));
        *self.conn.lock().await = Some(Connection { sink, reader });

        tracing::info!(
            host = %self.cfg.host,
            port = self.cfg.port,
            tls = self.cfg.use_tls,
            nickname,
            "[IRC] connected, registering"
        );
        Ok(())
    }

    async fn join(&self, channels: &[String]) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        self.send(Command::JOIN(channels.join(","), None, None)).await
    }

    async fn send_message(&self, targets: &[String], text: &str) -> Result<()> {
        for batch in batch_targets(targets, text.len()) {
            self.send(Command::PRIVMSG(batch, text.to_string())).await?;
        }
        Ok(())
    }

    async fn set_nickname(&self, nickname: &str) -> Result<()> {
        self.send(Command::NICK(nickname.to_string())).await
    }

    async fn ping(&self, token: &str) -> Result<()> {
        self.send(Command::PING(token.to_string(), None)).await
    }

    async fn pong(&self, token: &str) -> Result<()> {
        self.send(Command::PONG(token.to_string(), None)).await
    }

    async fn disconnect(&self) -> Result<()> {
        let taken = timeout(self.cfg.write_timeout, self.conn.lock())
            .await
            .map_err(|_| Error::Transport("disconnect: connection is busy".to_string()))?
            .take();
        let Some(mut conn) = taken else {
            return Ok(());
        };
        conn.reader.abort();
        // Best-effort: the link may already be gone.
        let _ = timeout(self.cfg.write_timeout, async {
            let _ = conn.sink.send(Message::from(Command::QUIT(None))).await;
            conn.sink.close().await
        })
        .await;
        Ok(())
    }
}

/// Group comma-joined targets so every `PRIVMSG <targets> :<text>` line fits
/// in [`MAX_LINE_BYTES`].
fn batch_targets(targets: &[String], text_len: usize) -> Vec<String> {
    let room = MAX_LINE_BYTES.saturating_sub("PRIVMSG  :".len() + text_len);
    let mut batches: Vec<String> = Vec::new();
    for target in targets {
        match batches.last_mut() {
            Some(batch) if batch.len() + 1 + target.len() <= room => {
                batch.push(',');
                batch.push_str(target);
            }
            _ => batches.push(target.clone()),
        }
    }
    batches
}

/// Map one inbound protocol message to a transport event.
pub fn map_message(msg: &Message) -> TransportEvent {
    match &msg.command {
        Command::Response(Response::RPL_WELCOME, _) => TransportEvent::SessionEstablished,
        Command::Response(Response::ERR_NICKNAMEINUSE, _) => TransportEvent::NicknameTaken,
        Command::PING(token, _) => TransportEvent::Ping(token.clone()),
        Command::ERROR(reason) => TransportEvent::ConnectionError(reason.clone()),
        _ => TransportEvent::InboundMessage,
    }
}

async fn read_loop(mut stream: SplitStream<IrcFramed>, events: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                let ev = map_message(&msg);
                let fatal = matches!(ev, TransportEvent::ConnectionError(_));
                if events.send(ev).await.is_err() || fatal {
                    return;
                }
            }
            Some(Err(e)) => break format!("read failed: {e}"),
            None => break "connection closed by peer".to_string(),
        }
    };
    let _ = events.send(TransportEvent::ConnectionError(reason)).await;
}
