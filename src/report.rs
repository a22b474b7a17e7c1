//! Compact activity report: busiest channels and users, plus highlights.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::db::Database;
use crate::model::{ChannelFilter, MessageRecord};
use crate::summarize::shorten;

pub const DEFAULT_LIST_LEN: usize = 5;

pub fn build_compact_summary(
    db: &Database,
    hours: i64,
    max_lists: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<String>> {
    let since = now - Duration::hours(hours);
    let messages = db.messages_since(since, None)?;

    let mut lines = vec![format!("**What's Happening (last {})**", window_label(hours))];
    if messages.is_empty() {
        lines.push("No recent messages found.".to_string());
        return Ok(lines);
    }

    let per_channel = ranked_counts(messages.iter().map(|m| m.channel_id));
    let per_user = ranked_counts(messages.iter().map(|m| m.author_id));

    let channel_ids: Vec<u64> = per_channel.iter().map(|(id, _)| *id).collect();
    let channel_names: HashMap<u64, String> = db
        .list_channels(&ChannelFilter::default().with_ids(channel_ids))?
        .into_iter()
        .filter_map(|c| c.name.map(|name| (c.id, name)))
        .collect();
    let user_ids: Vec<u64> = per_user.iter().map(|(id, _)| *id).collect();
    let user_names = db.user_names(&user_ids)?;

    let channel_label = |id: u64| format!("#{}", channel_names.get(&id).cloned().unwrap_or_else(|| id.to_string()));
    let user_label = |id: u64| user_names.get(&id).cloned().unwrap_or_else(|| id.to_string());

    lines.push(String::new());
    lines.push("Top channels:".to_string());
    for (id, count) in per_channel.iter().take(max_lists) {
        lines.push(format!("- {} — {}", channel_label(*id), count));
    }
    lines.push("Top users:".to_string());
    for (id, count) in per_user.iter().take(max_lists) {
        lines.push(format!("- {} — {}", user_label(*id), count));
    }

    let highlights = highlights(&messages, max_lists);
    if !highlights.is_empty() {
        lines.push(String::new());
        lines.push("Highlights:".to_string());
        for msg in highlights {
            let mut meta = Vec::new();
            if msg.reactions_total > 0 {
                meta.push(format!("❤ {}", msg.reactions_total));
            }
            if msg.attachments_count > 0 {
                meta.push(format!("📎 {}", msg.attachments_count));
            }
            let meta = if meta.is_empty() {
                String::new()
            } else {
                format!(" {}", meta.join(" "))
            };

            lines.push(format!(
                "- {} by {}{}",
                channel_label(msg.channel_id),
                user_label(msg.author_id),
                meta
            ));
            lines.push(format!("  {}", shorten(&msg.content, 140, "…")));
            if !msg.link.is_empty() {
                lines.push(format!("  {}", msg.link));
            }
        }
    }

    Ok(lines)
}

/// Messages with content, most reactions first, newest first among ties.
fn highlights(messages: &[MessageRecord], n: usize) -> Vec<&MessageRecord> {
    let mut with_content: Vec<&MessageRecord> = messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .collect();
    with_content.sort_by(|a, b| {
        (b.reactions_total, b.created_at).cmp(&(a.reactions_total, a.created_at))
    });
    with_content.truncate(n);
    with_content
}

/// Counts per key, highest first; ties broken by ascending key.
fn ranked_counts(keys: impl Iterator<Item = u64>) -> Vec<(u64, usize)> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut ranked: Vec<(u64, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

pub(crate) fn window_label(hours: i64) -> String {
    if hours >= 24 && hours % 24 == 0 {
        format!("{}d", hours / 24)
    } else {
        format!("{hours}h")
    }
}
