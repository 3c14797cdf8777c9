//! Session orchestration: startup seeding, poll timer, credential timer, and
//! the wiring of the long-running tasks.
//!
//! Tasks:
//! - poll timer (this module): fetch -> reconcile -> enqueue, source by source
//! - credential timer ([`TokenManager::run_refresh_timer`])
//! - delivery drain ([`DeliveryDrain`])
//! - connection supervisor ([`ConnectionSupervisor`])
//!
//! They share only the delivery queue, the token manager and the published
//! connection state.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::{
    config::Config,
    dedup::reconcile,
    delivery::{self, DeliveryDrain, DeliverySender},
    domain::{Credential, Source},
    formatting::to_outbound,
    poller::SourcePoller,
    ports::{AuthPort, FeedPort},
    supervisor::{ConnectionSupervisor, SupervisorConfig},
    token::TokenManager,
    transport::{port::ChatTransport, types::TransportEvent},
    Error, Result,
};

/// Drives the sources: seeds them at startup, then polls on every tick.
pub struct Orchestrator {
    tokens: Arc<TokenManager>,
    poller: SourcePoller,
    sources: Vec<Source>,
    queue: DeliverySender,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        tokens: Arc<TokenManager>,
        poller: SourcePoller,
        sources: Vec<Source>,
        queue: DeliverySender,
        retry_delay: Duration,
    ) -> Self {
        Self {
            tokens,
            poller,
            sources,
            queue,
            retry_delay,
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Acquire a credential and seed every source's watermark without
    /// announcing anything. Retries until it succeeds.
    ///
    /// Returns the credential in use and when it was acquired, which is where
    /// the credential timer starts counting.
    pub async fn startup(&mut self) -> (Credential, Instant) {
        let mut cred = self.tokens.acquire().await;
        let mut acquired_at = Instant::now();

        for idx in 0..self.sources.len() {
            loop {
                let source = &self.sources[idx];
                match self.poller.fetch(source, &cred).await {
                    Ok(items) => {
                        let seen = items.len();
                        let r = reconcile(source, items);
                        let source = &mut self.sources[idx];
                        source.advance(r.watermark);
                        tracing::info!(
                            endpoint = %source.endpoint,
                            items = seen,
                            watermark = source.high_water_mark,
                            "[POLL] source seeded"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %source.endpoint,
                            retry_in_secs = self.retry_delay.as_secs(),
                            "[POLL] seeding fetch failed: {e}"
                        );
                        sleep(self.retry_delay).await;
                        // The failure may have been a stale token.
                        cred = self.tokens.acquire().await;
                        acquired_at = Instant::now();
                    }
                }
            }
        }

        (cred, acquired_at)
    }

    /// One poll tick over every source, in configuration order.
    ///
    /// A failing source is logged and skipped until the next tick. Returns the
    /// number of messages enqueued.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let cred = self.tokens.current().await.ok_or_else(|| {
            Error::Invariant("poll tick without an acquired credential".to_string())
        })?;

        let mut enqueued = 0usize;
        for source in self.sources.iter_mut() {
            let items = match self.poller.fetch(source, &cred).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(endpoint = %source.endpoint, "[POLL] fetch failed, skipping: {e}");
                    continue;
                }
            };

            let r = reconcile(source, items);
            for item in &r.new_items {
                self.queue.enqueue(to_outbound(item)).await?;
            }
            if !r.new_items.is_empty() {
                tracing::info!(
                    endpoint = %source.endpoint,
                    new = r.new_items.len(),
                    watermark = r.watermark,
                    "[POLL] new items queued"
                );
            }
            enqueued += r.new_items.len();
            source.advance(r.watermark);
        }

        Ok(enqueued)
    }

    /// Poll timer. Must only be entered after [`Orchestrator::startup`].
    pub async fn run_poll_timer(&mut self, poll_interval: Duration) -> Result<()> {
        if self.tokens.current().await.is_none() {
            return Err(Error::Invariant(
                "poll timer started before a credential was acquired".to_string(),
            ));
        }

        let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await?;
        }
    }
}

/// External collaborators of a session.
pub struct SessionDeps {
    pub auth: Arc<dyn AuthPort>,
    pub feed: Arc<dyn FeedPort>,
    pub transport: Arc<dyn ChatTransport>,
    /// Receiving end of the channel the transport adapter publishes into.
    pub events: mpsc::Receiver<TransportEvent>,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub sources: Vec<Source>,
    pub poll_interval: Duration,
    pub auth_retry_delay: Duration,
    pub delivery_interval: Duration,
    pub delivery_queue_capacity: usize,
    pub supervisor: SupervisorConfig,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            sources: cfg.sources(),
            poll_interval: cfg.poll_interval,
            auth_retry_delay: cfg.auth_retry_delay,
            delivery_interval: cfg.delivery_interval,
            delivery_queue_capacity: cfg.delivery_queue_capacity,
            supervisor: SupervisorConfig::from(&cfg.irc),
        }
    }
}

/// Run the relay. Every task is meant to run forever, so this only returns
/// with an error describing which one stopped.
pub async fn run(deps: SessionDeps, settings: SessionSettings) -> Result<()> {
    let SessionDeps {
        auth,
        feed,
        transport,
        events,
    } = deps;

    let supervisor =
        ConnectionSupervisor::new(settings.supervisor.clone(), transport.clone(), events);
    let (queue, queue_rx) = delivery::bounded(settings.delivery_queue_capacity);
    let drain = DeliveryDrain::new(
        queue_rx,
        transport,
        settings.supervisor.channels.clone(),
        settings.delivery_interval,
        supervisor.subscribe(),
        supervisor.link_reporter(),
    );

    let mut supervisor_task = tokio::spawn(supervisor.run());
    let mut drain_task = tokio::spawn(drain.run());

    let tokens = Arc::new(TokenManager::new(auth, settings.auth_retry_delay));
    let mut orchestrator = Orchestrator::new(
        tokens.clone(),
        SourcePoller::new(feed),
        settings.sources,
        queue,
        settings.auth_retry_delay,
    );
    let poll_interval = settings.poll_interval;

    let timers = async {
        let (first, acquired_at) = orchestrator.startup().await;
        tracing::info!(
            sources = orchestrator.sources().len(),
            poll_secs = poll_interval.as_secs(),
            "[POLL] startup complete, timers armed"
        );

        let mut credential_task = tokio::spawn({
            let tokens = tokens.clone();
            async move {
                tokens
                    .run_refresh_timer(&first, acquired_at, poll_interval)
                    .await
            }
        });

        let res = tokio::select! {
            res = orchestrator.run_poll_timer(poll_interval) => res,
            res = &mut credential_task => Err(task_stopped("credential timer", res)),
        };
        credential_task.abort();
        res
    };

    let res = tokio::select! {
        res = timers => res,
        res = &mut supervisor_task => match res {
            Ok(Err(e)) => Err(e),
            other => Err(task_stopped("connection supervisor", other.map(|_| ()))),
        },
        res = &mut drain_task => Err(task_stopped("delivery drain", res)),
    };

    supervisor_task.abort();
    drain_task.abort();
    res
}

fn task_stopped(name: &str, res: std::result::Result<(), JoinError>) -> Error {
    match res {
        Ok(()) => Error::Invariant(format!("{name} task exited")),
        Err(e) => Error::Invariant(format!("{name} task failed: {e}")),
    }
}
