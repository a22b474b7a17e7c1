use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::model::ChannelFilter;
use crate::progress::iso_seconds;
use crate::Data;

fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(iso_seconds).unwrap_or_else(|| "-".to_string())
}

fn fmt_id(id: Option<u64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn state_lines(db: &Database, channel_ids: &[u64]) -> anyhow::Result<Vec<String>> {
    let channels = db.list_channels(&ChannelFilter::default().with_ids(channel_ids.iter().copied()))?;
    if channels.is_empty() {
        return Ok(vec!["No channels in the store. Run sync-channels first.".to_string()]);
    }

    let mut lines = Vec::with_capacity(channels.len() * 2);
    for channel in channels {
        let state = db.get_channel_state(channel.id)?.unwrap_or_default();
        let (oldest, newest) = db.message_time_range(channel.id)?;
        let stored = db.message_count(Some(channel.id))?;

        lines.push(format!(
            "{} ({}) [{}{}]",
            channel.label(),
            channel.id,
            channel.kind,
            if channel.is_active { "" } else { ", inactive" }
        ));
        lines.push(format!(
            "  indexed={} last_message={} backfill_before={} backfill_oldest={} stored={} range={}..{}",
            fmt_time(state.last_indexed_at),
            fmt_time(state.last_message_created_at),
            fmt_id(state.backfill_before_id),
            fmt_time(state.backfill_oldest_at),
            stored,
            fmt_time(oldest),
            fmt_time(newest),
        ));
    }
    Ok(lines)
}

pub fn skip_lines(db: &Database) -> anyhow::Result<Vec<String>> {
    let inactive = db.list_channels(&ChannelFilter::default().inactive_only())?;
    if inactive.is_empty() {
        return Ok(vec!["No inactive channels.".to_string()]);
    }
    let mut lines = vec![format!("{} inactive channels:", inactive.len())];
    lines.extend(
        inactive
            .iter()
            .map(|c| format!("- {} ({}) [{}]", c.label(), c.id, c.kind)),
    );
    Ok(lines)
}

pub fn show_state(data: &Data, channel_ids: &[u64]) -> anyhow::Result<()> {
    for line in state_lines(&data.db, channel_ids)? {
        println!("{line}");
    }
    Ok(())
}

pub fn skip_report(data: &Data) -> anyhow::Result<()> {
    for line in skip_lines(&data.db)? {
        println!("{line}");
    }
    Ok(())
}
