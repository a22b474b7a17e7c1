use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db::Database;
use crate::digest::build_digest;
use crate::indexer::{IndexRequest, Indexer};
use crate::publish::post_lines;
use crate::source::DiscordSource;
use crate::summarize::Summarizer;

/// Refreshes the stored channel list for `guild_id` from Discord.
pub async fn sync_channels(
    source: &DiscordSource,
    db: &Database,
    guild_id: u64,
) -> anyhow::Result<usize> {
    let channels = source.list_guild_channels(guild_id).await?;
    let synced = db
        .run_blocking(move |db| db.upsert_channels(guild_id, &channels))
        .await?;
    info!("Synced {} channels for guild {}", synced, guild_id);
    Ok(synced)
}

/// Periodically syncs channels, indexes new messages and posts the digest.
pub struct DigestScheduler {
    source: DiscordSource,
    indexer: Indexer,
    db: Database,
    summarizer: Summarizer,
    guild_id: u64,
    digest_channel_id: Option<u64>,
    hours: i64,
    top_n: usize,
    interval: Duration,
}

impl DigestScheduler {
    pub fn new(
        config: &Config,
        source: DiscordSource,
        indexer: Indexer,
        db: Database,
        summarizer: Summarizer,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            source,
            indexer,
            db,
            summarizer,
            guild_id: config.require_guild()?,
            digest_channel_id: config.digest_channel_id,
            hours: config.time_window_hours,
            top_n: config.top_n_convos,
            interval: config.schedule_interval,
        })
    }

    pub async fn run(self) {
        info!("Scheduler: running every {}", humantime::format_duration(self.interval));
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(0) => debug!("Scheduler: no new messages this cycle"),
                Ok(n) => info!("Scheduler: cycle indexed {} messages", n),
                Err(e) => error!("Scheduler cycle error: {:#}", e),
            }
        }
    }

    async fn run_cycle(&self) -> anyhow::Result<usize> {
        sync_channels(&self.source, &self.db, self.guild_id).await?;

        let request = IndexRequest {
            guild_id: Some(self.guild_id),
            lookback_hours: Some(self.hours),
            ..Default::default()
        };
        let summary = self.indexer.run(&request).await?;

        let digest = build_digest(&self.db, &self.summarizer, self.hours, self.top_n, Utc::now()).await?;
        match self.digest_channel_id {
            Some(channel_id) => {
                let posted = post_lines(&self.source.http(), channel_id, &digest.post_lines()).await?;
                info!("Scheduler: posted digest in {} messages", posted);
            }
            None => info!("Scheduler: DIGEST_CHANNEL_ID not set, digest not posted:\n{}", digest.preview()),
        }

        Ok(summary.total_messages())
    }
}
