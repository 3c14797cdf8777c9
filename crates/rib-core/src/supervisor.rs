//! Connection supervisor: owns the transport lifecycle.
//!
//! State machine: `Disconnected -> Connecting -> Joined`, with `Degraded` when
//! the liveness watchdog finds a silent link and `Disconnected` on any
//! transport error. Every exit from a connection leads to a fixed-delay
//! reconnect; the supervisor never gives up.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};

use crate::{
    config::IrcConfig,
    nickname::next_nickname,
    transport::{
        port::ChatTransport,
        types::{ConnectionState, TransportEvent},
    },
    Error, Result,
};

/// Upper bound for one command issued from the supervisor loop. A write
/// stuck on a peer that stopped reading must not stall the watchdog.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a whole connect + registration attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub nickname: String,
    pub channels: Vec<String>,
    pub nick_max_len: usize,
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
}

impl From<&IrcConfig> for SupervisorConfig {
    fn from(cfg: &IrcConfig) -> Self {
        Self {
            nickname: cfg.nickname.clone(),
            channels: cfg.channels.clone(),
            nick_max_len: cfg.nick_max_len,
            ping_interval: cfg.ping_interval,
            reconnect_delay: cfg.reconnect_delay,
        }
    }
}

/// Why a single connection ended.
#[derive(Debug)]
enum ConnectionEnd {
    Failed(String),
    /// Watchdog saw no inbound traffic for a whole ping interval.
    Silent,
    /// The adapter dropped its event sender; nothing can be observed anymore.
    EventsClosed,
}

/// Handle other tasks use to tell the supervisor the link is broken, e.g.
/// when a send fails before the reader has noticed anything.
#[derive(Clone, Debug)]
pub struct LinkReporter {
    tx: mpsc::Sender<String>,
}

impl LinkReporter {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn report(&self, reason: impl Into<String>) {
        // Full means a report for this link is already pending.
        let _ = self.tx.try_send(reason.into());
    }
}

pub struct ConnectionSupervisor {
    cfg: SupervisorConfig,
    transport: Arc<dyn ChatTransport>,
    events: mpsc::Receiver<TransportEvent>,
    reporter: LinkReporter,
    failures: mpsc::Receiver<String>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    pub fn new(
        cfg: SupervisorConfig,
        transport: Arc<dyn ChatTransport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (reporter, failures) = LinkReporter::channel();
        Self {
            cfg,
            transport,
            events,
            reporter,
            failures,
            state,
        }
    }

    /// Observe connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn link_reporter(&self) -> LinkReporter {
        self.reporter.clone()
    }

    /// Connect, watch, reconnect. Only returns if the adapter's event channel closes.
    pub async fn run(mut self) -> Result<()> {
        let mut first_attempt = true;
        loop {
            if !first_attempt {
                sleep(self.cfg.reconnect_delay).await;
            }
            first_attempt = false;

            // Anything still queued belongs to the connection we just left.
            while self.events.try_recv().is_ok() {}
            while self.failures.try_recv().is_ok() {}

            let mut nickname = self.cfg.nickname.clone();
            self.set_state(ConnectionState::Connecting);
            let connected =
                bounded("connect", CONNECT_TIMEOUT, self.transport.connect(&nickname)).await;
            if let Err(reason) = connected {
                tracing::warn!(
                    retry_in_secs = self.cfg.reconnect_delay.as_secs(),
                    "[IRC] {reason}"
                );
                self.set_state(ConnectionState::Disconnected);
                continue;
            }

            let end = self.watch_connection(&mut nickname).await;
            match &end {
                ConnectionEnd::Failed(reason) => {
                    tracing::warn!("[IRC] connection lost: {reason}");
                }
                ConnectionEnd::Silent => {
                    self.set_state(ConnectionState::Degraded);
                    tracing::warn!(
                        silent_for_secs = self.cfg.ping_interval.as_secs(),
                        "[IRC] no traffic since last ping, forcing reconnect"
                    );
                }
                ConnectionEnd::EventsClosed => {
                    tracing::error!("[IRC] transport event channel closed");
                }
            }

            if let Err(reason) =
                bounded("disconnect", COMMAND_TIMEOUT, self.transport.disconnect()).await
            {
                tracing::debug!("[IRC] {reason}");
            }
            self.set_state(ConnectionState::Disconnected);

            if matches!(end, ConnectionEnd::EventsClosed) {
                return Err(Error::Transport("transport event channel closed".to_string()));
            }
            tracing::info!(
                in_secs = self.cfg.reconnect_delay.as_secs(),
                "[IRC] reconnecting"
            );
        }
    }

    async fn watch_connection(&mut self, nickname: &mut String) -> ConnectionEnd {
        let period = self.cfg.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut saw_traffic = false;
        let mut joined = false;

        loop {
            tokio::select! {
                Some(reason) = self.failures.recv() => {
                    return ConnectionEnd::Failed(reason);
                }
                ev = self.events.recv() => {
                    let Some(ev) = ev else {
                        return ConnectionEnd::EventsClosed;
                    };
                    tracing::trace!(event = ev.label(), "[IRC] event");
                    match ev {
                        TransportEvent::ConnectionError(reason) => {
                            return ConnectionEnd::Failed(reason);
                        }
                        TransportEvent::SessionEstablished => {
                            saw_traffic = true;
                            // Membership does not survive a reconnect; join once per connection.
                            if !joined {
                                joined = true;
                                let res = bounded(
                                    "join",
                                    COMMAND_TIMEOUT,
                                    self.transport.join(&self.cfg.channels),
                                )
                                .await;
                                if let Err(reason) = res {
                                    return ConnectionEnd::Failed(reason);
                                }
                                tracing::info!(
                                    nickname = %nickname,
                                    channels = ?self.cfg.channels,
                                    "[IRC] registered and joined"
                                );
                                self.set_state(ConnectionState::Joined);
                            }
                        }
                        TransportEvent::Ping(token) => {
                            saw_traffic = true;
                            let res = bounded("pong", COMMAND_TIMEOUT, self.transport.pong(&token)).await;
                            if let Err(reason) = res {
                                return ConnectionEnd::Failed(reason);
                            }
                        }
                        TransportEvent::NicknameTaken => {
                            saw_traffic = true;
                            let next = next_nickname(nickname.as_str(), self.cfg.nick_max_len);
                            tracing::info!(taken = %nickname, next = %next, "[IRC] nickname in use");
                            *nickname = next;
                            let res = bounded(
                                "nick change",
                                COMMAND_TIMEOUT,
                                self.transport.set_nickname(nickname.as_str()),
                            )
                            .await;
                            if let Err(reason) = res {
                                return ConnectionEnd::Failed(reason);
                            }
                        }
                        TransportEvent::InboundMessage => {
                            saw_traffic = true;
                        }
                    }
                }
                _ = ping.tick() => {
                    if !saw_traffic {
                        return ConnectionEnd::Silent;
                    }
                    saw_traffic = false;
                    let res = bounded("ping", COMMAND_TIMEOUT, self.transport.ping(nickname.as_str())).await;
                    if let Err(reason) = res {
                        return ConnectionEnd::Failed(reason);
                    }
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = prev.as_str(), to = next.as_str(), "[IRC] state change");
        }
    }
}

/// Run one transport command with a deadline, flattening both failure
/// kinds into a log-ready reason.
async fn bounded(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<()>>,
) -> std::result::Result<(), String> {
    match timeout(limit, fut).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{what} failed: {e}")),
        Err(_) => Err(format!("{what} timed out after {}s", limit.as_secs())),
    }
}
