use std::sync::Arc;

use crate::{
    domain::{Credential, FeedEntry, Item, Source},
    ids::decode_base36,
    ports::FeedPort,
    Result,
};

/// Fetches one source's current item set and decodes item ids.
#[derive(Clone)]
pub struct SourcePoller {
    feed: Arc<dyn FeedPort>,
}

impl SourcePoller {
    pub fn new(feed: Arc<dyn FeedPort>) -> Self {
        Self { feed }
    }

    /// Fetch `source` with `credential`, in listing order.
    ///
    /// An undecodable id fails the whole fetch: a partial set could let the
    /// watermark skip past items that were never compared.
    pub async fn fetch(&self, source: &Source, credential: &Credential) -> Result<Vec<Item>> {
        let entries = self.feed.fetch(&source.endpoint, credential).await?;
        entries.into_iter().map(to_item).collect()
    }
}

fn to_item(entry: FeedEntry) -> Result<Item> {
    let numeric_id = decode_base36(&entry.id)?;
    Ok(Item {
        source_name: entry.subreddit,
        title: entry.title,
        permalink: entry.permalink,
        raw_id: entry.id,
        numeric_id,
    })
}
