//! Where messages come from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::FetchedMessage;

pub mod discord;

pub use discord::DiscordSource;

/// Failure kinds a caller must be able to tell apart: "channel gone" versus
/// "try later".
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("missing access to channel")]
    Forbidden,
    #[error("unknown channel")]
    NotFound,
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
}

impl SourceError {
    /// Forbidden and NotFound are never retried.
    pub fn is_permission(&self) -> bool {
        matches!(self, SourceError::Forbidden | SourceError::NotFound)
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Every message in `channel_id` with `created_at >= since`, in any order.
    async fn fetch_since(
        &self,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedMessage>, SourceError>;

    /// Up to `limit` messages strictly older than `before_id` (newest first when
    /// `before_id` is `None`).
    async fn fetch_page(
        &self,
        channel_id: u64,
        before_id: Option<u64>,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>, SourceError>;
}
