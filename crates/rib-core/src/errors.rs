/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the session
/// engine can decide between retry, skip and reconnect consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery queue closed")]
    QueueClosed,

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
