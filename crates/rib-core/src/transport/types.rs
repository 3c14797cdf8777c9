/// Lifecycle signals raised by a transport adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Registration finished; channels can be joined.
    SessionEstablished,
    /// Server liveness check, to be answered with the same token.
    Ping(String),
    /// The requested nickname is already taken.
    NicknameTaken,
    /// Any other inbound traffic.
    InboundMessage,
    /// The link failed or was closed by the peer.
    ConnectionError(String),
}

impl TransportEvent {
    pub fn label(&self) -> &'static str {
        match self {
            TransportEvent::SessionEstablished => "session_established",
            TransportEvent::Ping(_) => "ping",
            TransportEvent::NicknameTaken => "nickname_taken",
            TransportEvent::InboundMessage => "inbound_message",
            TransportEvent::ConnectionError(_) => "connection_error",
        }
    }
}

/// Connection state published by the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Joined => "joined",
            ConnectionState::Degraded => "degraded",
        }
    }
}
