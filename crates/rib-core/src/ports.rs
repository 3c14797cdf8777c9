use async_trait::async_trait;

use crate::{
    domain::{Credential, FeedEntry},
    Result,
};

/// Credential exchange against the OAuth token endpoint.
///
/// Implementations hold the client identity and account secrets; the core only
/// ever sees the resulting [`Credential`].
#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Perform one password-grant exchange. Errors must be `Error::Auth`.
    async fn refresh(&self) -> Result<Credential>;
}

/// Read access to a feed endpoint.
#[async_trait]
pub trait FeedPort: Send + Sync {
    /// Fetch the current listing for `endpoint`, in listing order.
    ///
    /// Errors must be `Error::Fetch`. No retries happen inside the port.
    async fn fetch(&self, endpoint: &str, credential: &Credential) -> Result<Vec<FeedEntry>>;
}
