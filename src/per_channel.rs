//! Per-channel summaries built from stored messages. Sections are posted
//! together as one rollup or each back into its own channel.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::Database;
use crate::model::{is_textable_type, ChannelFilter, MessageRecord};
use crate::report::window_label;
use crate::scoring::select_top;
use crate::summarize::Summarizer;

pub const DEFAULT_WINDOW_HOURS: i64 = 168;
pub const DEFAULT_TOP_N: usize = 5;
pub const CHANNEL_SUMMARY_HOURS: i64 = 72;

#[derive(Debug, Clone)]
pub struct PerChannelOptions {
    pub hours: i64,
    /// Empty means every active channel of `guild_id`.
    pub channel_ids: Vec<u64>,
    pub guild_id: Option<u64>,
    pub top_n: usize,
    pub min_messages: usize,
    pub max_channels: Option<usize>,
    pub include_links: bool,
}

impl Default for PerChannelOptions {
    fn default() -> Self {
        Self {
            hours: DEFAULT_WINDOW_HOURS,
            channel_ids: Vec::new(),
            guild_id: None,
            top_n: DEFAULT_TOP_N,
            min_messages: 1,
            max_channels: None,
            include_links: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSection {
    pub channel_id: u64,
    pub label: String,
    /// Messages in the window, not just the ones summarized.
    pub count: usize,
    pub lines: Vec<String>,
}

/// One section per textable channel with at least `min_messages` in the
/// window, busiest first.
pub async fn build_per_channel(
    db: &Database,
    summarizer: &Summarizer,
    opts: &PerChannelOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<ChannelSection>> {
    let since = now - Duration::hours(opts.hours);
    let filter = if opts.channel_ids.is_empty() {
        ChannelFilter::default().with_guild(opts.guild_id).active_only()
    } else {
        ChannelFilter::default().with_ids(opts.channel_ids.iter().copied())
    };
    let min_messages = opts.min_messages.max(1);

    let mut candidates: Vec<(u64, String, Vec<MessageRecord>)> = db
        .run_blocking(move |db| {
            let mut out = Vec::new();
            for channel in db.list_channels(&filter)? {
                if !is_textable_type(&channel.kind) {
                    continue;
                }
                let window = db.messages_since(since, Some(channel.id))?;
                if window.len() < min_messages {
                    debug!("Per-channel: skipping {} ({} messages)", channel.label(), window.len());
                    continue;
                }
                out.push((channel.id, channel.label(), window));
            }
            Ok(out)
        })
        .await?;

    candidates.sort_by(|a, b| b.2.len().cmp(&a.2.len()).then(a.0.cmp(&b.0)));
    if let Some(max) = opts.max_channels {
        candidates.truncate(max);
    }

    let mut sections = Vec::with_capacity(candidates.len());
    for (channel_id, label, window) in candidates {
        let top = select_top(&window, opts.top_n, now, since);
        let summary = summarizer.summarize(&top).await;

        let mut lines = vec![format!("**{} — last {}**", label, window_label(opts.hours)), summary];
        if opts.include_links {
            lines.extend(
                top.iter()
                    .filter(|m| !m.link.is_empty())
                    .map(|m| format!("- {}", m.link)),
            );
        }
        sections.push(ChannelSection {
            channel_id,
            label,
            count: window.len(),
            lines,
        });
    }

    Ok(sections)
}

/// All sections as one post, separated by blank lines.
pub fn rollup_lines(sections: &[ChannelSection]) -> Vec<String> {
    let mut out = Vec::new();
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            out.push(String::new());
        }
        out.extend(section.lines.iter().cloned());
    }
    out
}

pub fn preview(sections: &[ChannelSection], opts: &PerChannelOptions) -> String {
    if sections.is_empty() {
        return format!(
            "No channels with at least {} messages in the last {}h.",
            opts.min_messages.max(1),
            opts.hours
        );
    }
    let mut out = vec![format!("Per-channel preview (last {})", window_label(opts.hours))];
    for section in sections {
        out.push(String::new());
        out.extend(section.lines.iter().cloned());
    }
    out.join("\n")
}

pub fn thread_name(hours: i64) -> String {
    format!("Weekly Digest — {}", window_label(hours))
}

/// Summary of a single channel's recent stored messages.
pub async fn channel_summary_lines(
    db: &Database,
    summarizer: &Summarizer,
    channel_id: u64,
    hours: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<String>> {
    let since = now - Duration::hours(hours);
    let (label, window) = db
        .run_blocking(move |db| {
            let label = db
                .list_channels(&ChannelFilter::default().with_ids([channel_id]))?
                .first()
                .map(|c| c.label())
                .unwrap_or_else(|| channel_id.to_string());
            Ok((label, db.messages_since(since, Some(channel_id))?))
        })
        .await?;

    if window.is_empty() {
        return Ok(vec![format!("No recent messages in {label} (last {hours}h).")]);
    }

    let top = select_top(&window, DEFAULT_TOP_N, now, since);
    let summary = summarizer.summarize(&top).await;
    Ok(vec![format!("**{} — last {}**", label, window_label(hours)), summary])
}
