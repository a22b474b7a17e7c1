//! Cross-channel digest built from stored messages only.

use chrono::{DateTime, Duration, Utc};

use crate::db::Database;
use crate::model::MessageRecord;
use crate::scoring::select_top;
use crate::summarize::{collapse_whitespace, Summarizer};

#[derive(Debug, Clone, PartialEq)]
pub enum Digest {
    /// Nothing stored in the window.
    Empty { hours: i64 },
    Ready {
        hours: i64,
        top: Vec<MessageRecord>,
        summary: String,
    },
}

pub async fn build_digest(
    db: &Database,
    summarizer: &Summarizer,
    hours: i64,
    top_n: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<Digest> {
    let since = now - Duration::hours(hours);
    let window = db
        .run_blocking(move |db| db.messages_since(since, None))
        .await?;

    if window.is_empty() {
        return Ok(Digest::Empty { hours });
    }

    let top = select_top(&window, top_n, now, since);
    let summary = summarizer.summarize(&top).await;
    Ok(Digest::Ready { hours, top, summary })
}

impl Digest {
    pub fn title(&self) -> String {
        let hours = match self {
            Digest::Empty { hours } | Digest::Ready { hours, .. } => *hours,
        };
        format!("What's Happening (last {hours}h)")
    }

    /// Lines to post to the digest channel.
    pub fn post_lines(&self) -> Vec<String> {
        match self {
            Digest::Empty { hours } => vec![empty_hint(*hours)],
            Digest::Ready { summary, .. } => vec![format!("**{}**", self.title()), summary.clone()],
        }
    }

    /// Human-readable dry-run output with the selected messages.
    pub fn preview(&self) -> String {
        let (top, summary) = match self {
            Digest::Empty { hours } => return empty_hint(*hours),
            Digest::Ready { top, summary, .. } => (top, summary),
        };

        let mut out = vec![self.title(), "== Top messages ==".to_string()];
        for msg in top {
            out.push(format!(
                "- {} | ch={} reacts={} att={}",
                msg.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                msg.channel_id,
                msg.reactions_total,
                msg.attachments_count
            ));
            let preview: String = collapse_whitespace(&msg.content).chars().take(140).collect();
            out.push(format!("  {preview}"));
            out.push(format!("  {}", msg.link));
        }
        out.push("== Summary ==".to_string());
        out.push(summary.clone());
        out.join("\n")
    }
}

fn empty_hint(hours: i64) -> String {
    format!("No recent messages in the store (last {hours}h). Run: digestcord index --hours {hours}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoredMessage;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 8, 0, 0, 0).unwrap()
    }

    fn stored(id: u64, hours_ago: i64, content: &str, reactions: u64) -> StoredMessage {
        StoredMessage {
            id,
            channel_id: 10,
            guild_id: Some(1),
            author_id: 7,
            created_at: now() - Duration::hours(hours_ago),
            content: content.to_string(),
            link: format!("https://discord.com/channels/1/10/{id}"),
            reactions_total: reactions,
            attachments_count: 0,
            reply_to_id: None,
            has_link: false,
            link_domains: Vec::new(),
            word_count: 1,
            has_code_block: false,
            is_question: false,
            attachments: Vec::new(),
            reactions: Vec::new(),
            mentions: Vec::new(),
        }
    }

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    #[tokio::test]
    async fn test_empty_window_hints_at_indexing() {
        let db = test_db();
        let digest = build_digest(&db, &Summarizer::new(None), 72, 5, now()).await.unwrap();

        assert_eq!(digest, Digest::Empty { hours: 72 });
        assert!(digest.preview().contains("digestcord index --hours 72"));
        assert_eq!(digest.post_lines().len(), 1);
    }

    #[tokio::test]
    async fn test_digest_selects_top_and_summarizes() {
        let db = test_db();
        db.upsert_message(&stored(1, 1, "quiet note", 0)).unwrap();
        db.upsert_message(&stored(2, 5, "big announcement with lots of reactions", 12)).unwrap();
        db.upsert_message(&stored(3, 100, "outside the window", 40)).unwrap();

        let digest = build_digest(&db, &Summarizer::new(None), 24, 1, now()).await.unwrap();

        let Digest::Ready { top, summary, .. } = &digest else {
            panic!("expected a digest");
        };
        assert_eq!(top.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2]);
        assert!(summary.starts_with("- big announcement"));

        let lines = digest.post_lines();
        assert_eq!(lines[0], "**What's Happening (last 24h)**");
        assert!(digest.preview().contains("reacts=12"));
    }
}
