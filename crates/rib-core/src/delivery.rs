//! Bounded outbound queue and its rate-limited drain.
//!
//! Producers block when the queue is full instead of dropping: losing a line
//! silently would break feed completeness for the session. A single drain
//! hands lines to the transport one at a time, spaced by a fixed interval to
//! stay under the server's flood limits. A failed send is reported to the
//! connection supervisor and retried on the next connection.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};

use crate::{
    domain::OutboundMessage,
    supervisor::LinkReporter,
    transport::{port::ChatTransport, types::ConnectionState},
    Error, Result,
};

/// Attempts per message before it is dropped. Each attempt runs on a
/// different connection.
pub const MAX_SEND_ATTEMPTS: usize = 3;

/// Create a FIFO queue holding at most `capacity` pending messages.
pub fn bounded(capacity: usize) -> (DeliverySender, DeliveryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DeliverySender { tx }, DeliveryReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct DeliverySender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl DeliverySender {
    /// Append `msg`, waiting for room if the queue is full.
    pub async fn enqueue(&self, msg: OutboundMessage) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::QueueClosed)
    }

    /// Messages currently waiting.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[derive(Debug)]
pub struct DeliveryReceiver {
    rx: mpsc::Receiver<OutboundMessage>,
}

impl DeliveryReceiver {
    /// Next message in insertion order; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }

    /// Next message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Consumer side of the queue.
pub struct DeliveryDrain {
    rx: DeliveryReceiver,
    transport: Arc<dyn ChatTransport>,
    targets: Vec<String>,
    limiter: IntervalLimiter,
    state: watch::Receiver<ConnectionState>,
    link: LinkReporter,
}

impl DeliveryDrain {
    pub fn new(
        rx: DeliveryReceiver,
        transport: Arc<dyn ChatTransport>,
        targets: Vec<String>,
        interval: Duration,
        state: watch::Receiver<ConnectionState>,
        link: LinkReporter,
    ) -> Self {
        Self {
            rx,
            transport,
            targets,
            limiter: IntervalLimiter::new(interval),
            state,
            link,
        }
    }

    /// Drain until every sender is gone.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.deliver(msg).await;
        }
        tracing::info!("[DELIVERY] queue closed, drain exiting");
    }

    async fn deliver(&mut self, msg: OutboundMessage) {
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            // Hold the line while the link is down rather than burn attempts.
            if !self.wait_for_state(|s| s == ConnectionState::Joined).await {
                tracing::error!("[DELIVERY] connection supervisor is gone, dropping message");
                return;
            }

            let wait = self.limiter.reserve();
            if !wait.is_zero() {
                sleep(wait).await;
            }

            let Err(e) = self.transport.send_message(&self.targets, &msg.text).await else {
                return;
            };
            tracing::warn!(attempt, "[DELIVERY] send failed, reporting broken link: {e}");
            self.link.report(format!("send failed: {e}"));

            // Do not retry on the connection that just failed.
            if !self.wait_for_state(|s| s != ConnectionState::Joined).await {
                tracing::error!("[DELIVERY] connection supervisor is gone, dropping message");
                return;
            }
        }
        tracing::error!(
            attempts = MAX_SEND_ATTEMPTS,
            "[DELIVERY] giving up on message: {}",
            msg.text
        );
    }

    /// `false` once the state publisher is gone.
    async fn wait_for_state(&mut self, pred: impl Fn(ConnectionState) -> bool) -> bool {
        self.state.wait_for(|s| pred(*s)).await.is_ok()
    }
}
