mod error;
mod reddit;
mod types;

use async_trait::async_trait;

pub use error::{FeedError, FeedResult};
pub use reddit::{
    FeedCredentials, FeedEndpoints, RedditFeedClient, DEFAULT_API_BASE, DEFAULT_AUTH_URL,
    MAX_LISTING_LIMIT,
};
pub use types::{CandidatePost, ChannelDescriptor, DeclaredType, OrderingMode};

/// Read-only access to a feed of posts.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn list_posts(
        &self,
        channel: &str,
        ordering: OrderingMode,
        limit: u32,
    ) -> FeedResult<Vec<CandidatePost>>;
}
