//! Incremental and backfill indexing of channel history into the store.
//!
//! Incremental runs fetch everything newer than each channel's cursor, a few
//! channels at a time. Backfill walks one channel at a time backwards page by
//! page, persisting a resume pointer after every page so an interrupted walk
//! continues where it stopped.

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::UserCache;
use crate::config::IndexerSettings;
use crate::db::MessageStore;
use crate::derive::derive_message;
use crate::model::{
    is_textable_type, Channel, ChannelFilter, ChannelState, ChannelStateUpdate, FetchedMessage,
};
use crate::progress::{Mode, ProgressEvent, ProgressLog, Status};
use crate::source::{MessageSource, SourceError};

mod backfill;
#[cfg(test)]
mod tests;

pub use backfill::{BackfillOutcome, BackfillStop};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("gave up after {attempts} failed attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SourceError },
    #[error("backfill cursor did not move below {before_id}")]
    CursorRegression { before_id: u64 },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IndexError {
    /// The source error behind a permission failure, if that is what this is.
    pub fn permission(&self) -> Option<&SourceError> {
        match self {
            IndexError::Source(e) if e.is_permission() => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexMode {
    #[default]
    Incremental,
    Backfill,
}

/// What to index and how.
#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    pub mode: IndexMode,
    /// Explicit channel ids; empty means every active channel of `guild_id`.
    pub channel_ids: Vec<u64>,
    pub guild_id: Option<u64>,
    /// Lookback for channels without a cursor; falls back to the settings.
    pub lookback_hours: Option<i64>,
    /// Backfill never stores messages older than this.
    pub cutoff: Option<DateTime<Utc>>,
    /// Backfill stops once this many messages were stored for a channel.
    pub max_total: Option<usize>,
    /// Clear the backfill cursor before walking.
    pub restart: bool,
    /// Only `GUILD_TEXT` channels.
    pub only_text: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChannel {
    pub channel_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel_id: u64,
    pub label: String,
    pub count: usize,
    pub status: Status,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct IndexSummary {
    pub reports: Vec<ChannelReport>,
    pub skipped: Vec<SkippedChannel>,
}

impl IndexSummary {
    pub fn total_messages(&self) -> usize {
        self.reports.iter().map(|r| r.count).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.error.is_some()).count()
    }
}

#[derive(Clone)]
pub struct Indexer {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn MessageStore>,
    progress: ProgressLog,
    settings: IndexerSettings,
    users: UserCache,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn MessageStore>,
        progress: ProgressLog,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            source,
            store,
            progress,
            settings,
            users: UserCache::new(1000),
        }
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    pub async fn run(&self, request: &IndexRequest) -> anyhow::Result<IndexSummary> {
        let (channels, skipped) = self.select_channels(request).await?;
        info!(
            "Indexer: {:?} run {} over {} channels ({} skipped)",
            request.mode,
            self.progress.run_id(),
            channels.len(),
            skipped.len()
        );

        let reports = match request.mode {
            IndexMode::Incremental => {
                let lookback = request
                    .lookback_hours
                    .unwrap_or(self.settings.lookback_hours);
                self.run_incremental(channels, lookback).await
            }
            IndexMode::Backfill => self.run_backfill(channels, request).await,
        };

        let summary = IndexSummary { reports, skipped };
        info!(
            "Indexer: stored {} messages, {} channels failed",
            summary.total_messages(),
            summary.failed()
        );
        Ok(summary)
    }

    /// Resolves the request to an ascending list of indexable channels.
    pub async fn select_channels(
        &self,
        request: &IndexRequest,
    ) -> anyhow::Result<(Vec<Channel>, Vec<SkippedChannel>)> {
        let mut skipped = Vec::new();

        let mut candidates = if request.channel_ids.is_empty() {
            self.store
                .list_channels(
                    ChannelFilter::default()
                        .with_guild(request.guild_id)
                        .active_only(),
                )
                .await?
        } else {
            let mut wanted = request.channel_ids.clone();
            wanted.sort_unstable();
            wanted.dedup();

            let found = self
                .store
                .list_channels(ChannelFilter::default().with_ids(wanted.iter().copied()))
                .await?;
            for id in wanted {
                if !found.iter().any(|c| c.id == id) {
                    info!("Indexer: skipping unknown channel {} (run sync-channels first)", id);
                    skipped.push(SkippedChannel {
                        channel_id: id,
                        reason: "unknown channel".to_string(),
                    });
                }
            }
            found
        };
        candidates.sort_by_key(|c| c.id);

        let mut selected = Vec::with_capacity(candidates.len());
        for channel in candidates {
            let reason = if !channel.is_active {
                Some("inactive".to_string())
            } else if !is_textable_type(&channel.kind) {
                Some(format!("type {} is not textable", channel.kind))
            } else if request.only_text && channel.kind.to_uppercase() != "GUILD_TEXT" {
                Some(format!("type {} excluded by --only-text", channel.kind))
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    info!("Indexer: skipping {} ({})", channel.label(), reason);
                    skipped.push(SkippedChannel {
                        channel_id: channel.id,
                        reason,
                    });
                }
                None => selected.push(channel),
            }
        }

        Ok((selected, skipped))
    }

    async fn run_incremental(&self, channels: Vec<Channel>, lookback_hours: i64) -> Vec<ChannelReport> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for channel in channels {
            let semaphore = semaphore.clone();
            let indexer = self.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                indexer.index_channel_incremental(channel, lookback_hours).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Indexer: channel task panicked: {}", e),
            }
        }
        reports.sort_by_key(|r| r.channel_id);
        reports
    }

    async fn index_channel_incremental(&self, channel: Channel, lookback_hours: i64) -> ChannelReport {
        let state = match self.store.get_channel_state(channel.id).await {
            Ok(state) => state,
            Err(e) => return self.failed_report(Mode::Incremental, &channel, 0, None, e.into()).await,
        };

        match self
            .index_incremental(&channel, state.as_ref(), lookback_hours)
            .await
        {
            Ok(count) => ChannelReport {
                channel_id: channel.id,
                label: channel.label(),
                count,
                status: Status::Ok,
                error: None,
            },
            Err(e) => self.failed_report(Mode::Incremental, &channel, 0, None, e).await,
        }
    }

    /// Stores every message newer than the channel's cursor and advances the
    /// cursor to the newest one. Returns how many messages were stored.
    pub async fn index_incremental(
        &self,
        channel: &Channel,
        state: Option<&ChannelState>,
        lookback_hours: i64,
    ) -> Result<usize, IndexError> {
        let now = Utc::now();
        let since = state
            .and_then(|s| s.last_message_created_at)
            .unwrap_or_else(|| now - chrono::Duration::hours(lookback_hours));
        debug!("Indexer: {} since {}", channel.label(), since);

        let mut batch = self
            .with_retries(Mode::Incremental, channel.id, None, || {
                self.source.fetch_since(channel.id, since)
            })
            .await?;
        batch.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        batch.dedup_by_key(|m| m.id);

        let bounds = batch
            .first()
            .zip(batch.last())
            .map(|(oldest, newest)| (oldest.created_at, newest.id, newest.created_at));
        let count = batch.len();

        for msg in batch {
            self.persist(channel, msg).await?;
        }

        let mut update = ChannelStateUpdate::indexed_at(now);
        let mut event = ProgressEvent::new(Mode::Incremental, Status::Ok, channel.id).batch_size(count);

        match bounds {
            Some((oldest_at, newest_id, newest_at)) => {
                let previous = state.and_then(|s| s.last_message_created_at.zip(s.last_message_id));
                let advances = previous.map_or(true, |(at, id)| (newest_at, newest_id) > (at, id));
                if advances {
                    update.last_message_id = Some(newest_id);
                    update.last_message_created_at = Some(newest_at);
                }
                event = event.oldest_seen(oldest_at);
            }
            None => event = event.message("no new messages"),
        }

        self.store.upsert_channel_state(channel.id, update).await?;
        self.progress.emit(event.total_so_far(count));
        debug!("Indexer: {} stored {} messages", channel.label(), count);
        Ok(count)
    }

    /// Upserts the author (when changed) and the derived message.
    async fn persist(&self, channel: &Channel, mut msg: FetchedMessage) -> Result<(), IndexError> {
        if msg.guild_id.is_none() {
            msg.guild_id = Some(channel.guild_id);
        }

        if self.users.needs_upsert(&msg.author) {
            self.store.upsert_user(&msg.author).await?;
            self.users.record(&msg.author);
        }

        let stored = derive_message(&msg);
        self.store.upsert_message(&stored).await?;
        Ok(())
    }

    /// Calls `op` until it succeeds. Rate limits wait out the advertised
    /// delay and are retried without limit; other transient failures back off
    /// exponentially up to `max_retries` times. Permission errors return at once.
    async fn with_retries<T, F, Fut>(
        &self,
        mode: Mode,
        channel_id: u64,
        before_id: Option<u64>,
        mut op: F,
    ) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut backoff = self.backoff();
        let mut failures = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_permission() => return Err(e.into()),
                Err(SourceError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(self.settings.rate_limit_default) + self.jitter();
                    warn!("Indexer: channel {} rate limited, waiting {:?}", channel_id, wait);
                    self.progress.emit(
                        ProgressEvent::new(mode, Status::Retry429, channel_id)
                            .before_id(before_id)
                            .message(format!("retry in {}ms", wait.as_millis())),
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.settings.max_retries {
                        return Err(IndexError::RetriesExhausted {
                            attempts: failures,
                            last: e,
                        });
                    }
                    let wait = backoff.next_backoff().unwrap_or(self.settings.backoff_cap);
                    warn!(
                        "Indexer: channel {} failed ({}), retry {}/{} in {:?}",
                        channel_id, e, failures, self.settings.max_retries, wait
                    );
                    self.progress.emit(
                        ProgressEvent::new(mode, Status::RetryOther, channel_id)
                            .before_id(before_id)
                            .message(e.to_string()),
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.settings.backoff_base,
            initial_interval: self.settings.backoff_base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.settings.backoff_cap,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.settings.rate_limit_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Logs a failed channel, deactivating it on permission errors, and
    /// builds its report. The cursor is left untouched.
    async fn failed_report(
        &self,
        mode: Mode,
        channel: &Channel,
        count: usize,
        before_id: Option<u64>,
        err: IndexError,
    ) -> ChannelReport {
        let status = match err.permission() {
            Some(source_err) => {
                let status = match source_err {
                    SourceError::NotFound => Status::Skip404,
                    _ => Status::Skip403,
                };
                warn!("Indexer: {} is not accessible ({}), deactivating", channel.label(), source_err);
                if let Err(e) = self.store.set_channel_active(channel.id, false).await {
                    warn!("Indexer: failed to deactivate {}: {}", channel.label(), e);
                }
                status
            }
            None => {
                error!("Indexer: {} failed: {}", channel.label(), err);
                Status::Error
            }
        };

        self.progress.emit(
            ProgressEvent::new(mode, status, channel.id)
                .total_so_far(count)
                .before_id(before_id)
                .message(err.to_string()),
        );

        ChannelReport {
            channel_id: channel.id,
            label: channel.label(),
            count,
            status,
            error: Some(err.to_string()),
        }
    }
}
