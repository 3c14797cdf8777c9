use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use rib_core::{
    config::Config,
    session::{self, SessionDeps, SessionSettings},
};
use rib_irc::{IrcConnectConfig, IrcTransport};
use rib_reddit::RedditClient;

const TRANSPORT_EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rib_core::logging::init("rib")?;

    let cfg = Config::load().context("loading configuration")?;
    tracing::info!(
        endpoints = ?cfg.endpoints,
        channels = ?cfg.irc.channels,
        server = %format!("{}:{}", cfg.irc.server_host, cfg.irc.server_port),
        tls = cfg.irc.use_tls,
        "[MAIN] starting relay"
    );

    let reddit = Arc::new(RedditClient::new(cfg.reddit.clone()).context("building reddit client")?);

    let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
    let transport = Arc::new(IrcTransport::new(
        IrcConnectConfig::from(&cfg.irc),
        events_tx,
    ));

    let deps = SessionDeps {
        auth: reddit.clone(),
        feed: reddit,
        transport,
        events: events_rx,
    };

    session::run(deps, SessionSettings::from_config(&cfg))
        .await
        .context("relay stopped")?;

    Ok(())
}
