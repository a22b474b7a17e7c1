//! Ranking of stored messages for the digest.

use chrono::{DateTime, Utc};

use crate::model::MessageRecord;

const REACTION_WEIGHT: f64 = 0.45;
const LENGTH_WEIGHT: f64 = 0.25;
const LINK_WEIGHT: f64 = 0.15;
const ATTACHMENT_WEIGHT: f64 = 0.05;
const RECENCY_WEIGHT: f64 = 0.10;

/// Reactions past this count add nothing.
const REACTION_SATURATION: f64 = 5.0;
/// Trimmed content length past this adds nothing.
const LENGTH_SATURATION: f64 = 180.0;

fn has_link(text: &str) -> bool {
    text.contains("http://") || text.contains("https://")
}

/// Score in `[0, 1]` for a message seen at `now` inside a window that began at `window_start`.
pub fn score_message(msg: &MessageRecord, now: DateTime<Utc>, window_start: DateTime<Utc>) -> f64 {
    let mut score = (msg.reactions_total as f64 / REACTION_SATURATION).min(1.0) * REACTION_WEIGHT;

    let length = msg.content.trim().chars().count() as f64;
    score += (length / LENGTH_SATURATION).min(1.0) * LENGTH_WEIGHT;

    if has_link(&msg.content) {
        score += LINK_WEIGHT;
    }
    if msg.attachments_count > 0 {
        score += ATTACHMENT_WEIGHT;
    }

    let span = ((now - window_start).num_milliseconds() as f64 / 1000.0).max(1.0);
    let age = (now - msg.created_at).num_milliseconds() as f64 / 1000.0;
    let recency = (1.0 - age / span).max(0.0);
    score + recency * RECENCY_WEIGHT
}

/// The `top_n` highest scoring messages, newest first.
pub fn select_top(
    messages: &[MessageRecord],
    top_n: usize,
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
) -> Vec<MessageRecord> {
    let mut scored: Vec<(f64, &MessageRecord)> = messages
        .iter()
        .map(|m| (score_message(m, now, window_start), m))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut top: Vec<MessageRecord> = scored
        .into_iter()
        .take(top_n)
        .map(|(_, m)| m.clone())
        .collect();
    top.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    top
}
