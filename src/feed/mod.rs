pub mod neynar;
pub mod types;

use async_trait::async_trait;
pub use types::{FeedError, Post};

/// Source of the subject's most recent casts.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Up to `limit` casts for `fid`, newest first.
    async fn fetch_latest(&mut self, fid: u64, limit: u32) -> Result<Vec<Post>, FeedError>;
}
