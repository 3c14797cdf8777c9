use std::time::Duration;

/// OAuth bearer credential. Replaced wholesale on every refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_in_secs: u64,
}

impl Credential {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in_secs)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

/// One configured feed endpoint and its dedup watermark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub endpoint: String,
    pub high_water_mark: u64,
    seeded: bool,
}

impl Source {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_watermark(endpoint, 0)
    }

    pub fn with_watermark(endpoint: impl Into<String>, high_water_mark: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            high_water_mark,
            seeded: false,
        }
    }

    /// Whether a fetch for this source has ever been reconciled.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Commit the result of a fetch+compare cycle. Never moves backwards.
    pub fn advance(&mut self, watermark: u64) {
        self.high_water_mark = self.high_water_mark.max(watermark);
        self.seeded = true;
    }
}

/// Raw feed entry as returned by the feed adapter, before id decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEntry {
    pub subreddit: String,
    pub title: String,
    pub permalink: String,
    pub id: String,
}

/// A feed item with its decoded numeric id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub source_name: String,
    pub title: String,
    pub permalink: String,
    pub raw_id: String,
    pub numeric_id: u64,
}

/// A fully formatted line ready for the chat transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
