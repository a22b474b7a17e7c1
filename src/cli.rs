//! Command-line interface. Flags override the environment configuration.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::per_channel::{PerChannelOptions, CHANNEL_SUMMARY_HOURS, DEFAULT_TOP_N, DEFAULT_WINDOW_HOURS};

/// Index Discord channels into SQLite and post activity digests.
#[derive(Parser, Debug)]
#[command(name = "digestcord")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Debug-level logging for this crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index messages: incremental by default, or a full backfill with --full
    Index(IndexArgs),

    /// Upsert the guild's channels and active threads from Discord
    SyncChannels {
        /// Guild id (defaults to GUILD_ID)
        #[arg(long)]
        guild: Option<u64>,
    },

    /// Show per-channel indexing checkpoints
    ShowState {
        /// Comma-separated channel ids (default: all stored channels)
        #[arg(long, value_delimiter = ',')]
        channels: Vec<u64>,
    },

    /// List channels marked inactive (e.g. after a 403 or 404)
    SkipReport,

    /// Rank recent stored messages, summarize them and post the digest
    Digest {
        /// Lookback window in hours (defaults to TIME_WINDOW_HOURS)
        #[arg(long)]
        hours: Option<i64>,

        /// Print instead of posting
        #[arg(long)]
        dry_run: bool,
    },

    /// Compact report of top channels, users and highlights
    Report {
        /// Lookback window in hours
        #[arg(long, default_value = "168")]
        hours: i64,

        /// Post to the digest channel instead of printing
        #[arg(long)]
        post: bool,
    },

    /// Summarize each active channel separately
    PerChannel(PerChannelArgs),

    /// Summarize one channel and post it to the digest channel
    ChannelSummary {
        /// Channel id
        #[arg(long)]
        channel: u64,

        /// Lookback window in hours
        #[arg(long, default_value_t = CHANNEL_SUMMARY_HOURS)]
        hours: i64,

        /// Print instead of posting
        #[arg(long)]
        dry_run: bool,
    },

    /// Index and post the digest every SCHEDULE_INTERVAL
    Serve,
}

/// Where per-channel summaries are posted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PostTarget {
    /// One rollup message in the digest channel
    #[default]
    Digest,
    /// Each summary back into the channel it describes
    Source,
}

#[derive(Args, Debug, Clone)]
pub struct PerChannelArgs {
    /// Lookback window in hours
    #[arg(long, default_value_t = DEFAULT_WINDOW_HOURS)]
    pub hours: i64,

    /// Comma-separated channel ids (default: every active channel)
    #[arg(long, value_delimiter = ',')]
    pub channels: Vec<u64>,

    /// Top messages summarized per channel
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Skip channels with fewer messages in the window
    #[arg(long, default_value_t = 1)]
    pub min_messages: usize,

    /// Keep only the busiest N channels
    #[arg(long)]
    pub max_channels: Option<usize>,

    /// Leave out the list of top message links
    #[arg(long)]
    pub no_links: bool,

    /// Where to post the summaries
    #[arg(long, value_enum, default_value_t = PostTarget::Digest)]
    pub post_to: PostTarget,

    /// Post the rollup into a new thread under the digest channel
    #[arg(long)]
    pub thread: bool,

    /// Thread name (default: "Weekly Digest" plus the window, e.g. 7d)
    #[arg(long, requires = "thread")]
    pub thread_name: Option<String>,

    /// Print instead of posting
    #[arg(long)]
    pub dry_run: bool,

    /// Guild id (defaults to GUILD_ID)
    #[arg(long)]
    pub guild: Option<u64>,
}

impl PerChannelArgs {
    pub fn options(&self, default_guild: Option<u64>) -> PerChannelOptions {
        PerChannelOptions {
            hours: self.hours,
            channel_ids: self.channels.clone(),
            guild_id: self.guild.or(default_guild),
            top_n: self.top_n,
            min_messages: self.min_messages,
            max_channels: self.max_channels,
            include_links: !self.no_links,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct IndexArgs {
    /// Full backfill, walking history backwards from the saved cursor
    #[arg(long)]
    pub full: bool,

    /// Comma-separated channel ids (default: every active channel)
    #[arg(long, value_delimiter = ',')]
    pub channels: Vec<u64>,

    /// Lookback in hours for channels never indexed before
    #[arg(long)]
    pub hours: Option<i64>,

    /// Backfill cutoff, RFC 3339 or YYYY-MM-DD (e.g. 2024-01-01T00:00:00Z)
    #[arg(long, value_parser = parse_cutoff)]
    pub since: Option<DateTime<Utc>>,

    /// Maximum messages per channel in backfill mode
    #[arg(long)]
    pub max: Option<usize>,

    /// Forget the backfill cursor and start again from the newest message
    #[arg(long, requires = "full")]
    pub restart: bool,

    /// Only GUILD_TEXT channels (no news channels or threads)
    #[arg(long)]
    pub only_text: bool,

    /// Guild id (defaults to GUILD_ID)
    #[arg(long)]
    pub guild: Option<u64>,
}

pub fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{raw}', expected RFC 3339 or YYYY-MM-DD"))
}
