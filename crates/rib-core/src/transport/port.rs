use async_trait::async_trait;

use crate::Result;

/// Chat transport port.
///
/// Inbound lifecycle signals are not delivered through callbacks: the adapter
/// pushes [`TransportEvent`](super::types::TransportEvent)s into the channel it
/// was constructed with, and the connection supervisor consumes them.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a new connection and start registration as `nickname`.
    async fn connect(&self, nickname: &str) -> Result<()>;

    async fn join(&self, channels: &[String]) -> Result<()>;

    /// Send one line to every target (batched where the protocol allows).
    async fn send_message(&self, targets: &[String], text: &str) -> Result<()>;

    async fn set_nickname(&self, nickname: &str) -> Result<()>;

    async fn ping(&self, token: &str) -> Result<()>;

    async fn pong(&self, token: &str) -> Result<()>;

    /// Tear the current connection down. Must be safe to call when not connected.
    async fn disconnect(&self) -> Result<()>;
}
