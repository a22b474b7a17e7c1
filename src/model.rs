//! Rows the indexer reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Creation time encoded in a Discord snowflake.
pub fn snowflake_time(id: u64) -> Option<DateTime<Utc>> {
    let ms = (id >> 22) as i64 + DISCORD_EPOCH_MS;
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Channel type names that can hold indexable text, plus their legacy numeric codes.
const TEXTABLE_TYPES: &[&str] = &[
    "GUILD_TEXT",
    "GUILD_NEWS",
    "GUILD_PUBLIC_THREAD",
    "GUILD_PRIVATE_THREAD",
    "GUILD_NEWS_THREAD",
    "0",
    "5",
    "10",
    "11",
    "12",
];

pub fn is_textable_type(kind: &str) -> bool {
    let upper = kind.trim().to_uppercase();
    TEXTABLE_TYPES.contains(&upper.as_str())
}

/// Normalizes the type spellings seen across API versions to the `GUILD_*` form.
pub fn normalize_channel_type(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    match upper.as_str() {
        "" | "TEXT" | "TEXT_CHANNEL" => "GUILD_TEXT".to_string(),
        "NEWS" | "ANNOUNCEMENT" => "GUILD_NEWS".to_string(),
        "STAGE" | "STAGE_CHANNEL" => "GUILD_STAGE_VOICE".to_string(),
        "VOICE" => "GUILD_VOICE".to_string(),
        "CATEGORY" => "GUILD_CATEGORY".to_string(),
        "FORUM" => "GUILD_FORUM".to_string(),
        "NEWS_THREAD" => "GUILD_NEWS_THREAD".to_string(),
        "PUBLIC_THREAD" => "GUILD_PUBLIC_THREAD".to_string(),
        "PRIVATE_THREAD" => "GUILD_PRIVATE_THREAD".to_string(),
        _ => upper,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u64,
    pub guild_id: u64,
    pub name: Option<String>,
    pub kind: String,
    pub parent_id: Option<u64>,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("#{name}"),
            _ => self.id.to_string(),
        }
    }
}

/// Filter for `MessageStore::list_channels`. Empty `ids` means "any channel".
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    pub ids: Vec<u64>,
    pub guild_id: Option<u64>,
    pub active: Option<bool>,
}

impl ChannelFilter {
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn with_guild(mut self, guild_id: Option<u64>) -> Self {
        self.guild_id = guild_id;
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn inactive_only(mut self) -> Self {
        self.active = Some(false);
        self
    }
}

/// Persisted per-channel indexing checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub channel_id: u64,
    pub last_message_id: Option<u64>,
    pub last_message_created_at: Option<DateTime<Utc>>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub backfill_before_id: Option<u64>,
    pub backfill_oldest_at: Option<DateTime<Utc>>,
}

/// Partial checkpoint write; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateUpdate {
    pub last_message_id: Option<u64>,
    pub last_message_created_at: Option<DateTime<Utc>>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub backfill_before_id: Option<u64>,
    pub backfill_oldest_at: Option<DateTime<Utc>>,
}

impl ChannelStateUpdate {
    pub fn indexed_at(at: DateTime<Utc>) -> Self {
        Self {
            last_indexed_at: Some(at),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: u64,
    pub url: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji_id: Option<u64>,
    pub emoji_name: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    User,
    Role,
    Channel,
    Everyone,
}

impl MentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionKind::User => "user",
            MentionKind::Role => "role",
            MentionKind::Channel => "channel",
            MentionKind::Everyone => "everyone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mention {
    pub kind: MentionKind,
    pub target_id: Option<u64>,
}

/// A message as delivered by a `MessageSource`, before derived fields are computed.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author: User,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub reply_to_id: Option<u64>,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
}

/// A normalized message ready for `MessageStore::upsert_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub link: String,
    pub reactions_total: u64,
    pub attachments_count: u64,
    pub reply_to_id: Option<u64>,
    pub has_link: bool,
    pub link_domains: Vec<String>,
    pub word_count: u64,
    pub has_code_block: bool,
    pub is_question: bool,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub mentions: Vec<Mention>,
}

/// Flat message row read back for ranking and reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub link: String,
    pub reactions_total: u64,
    pub attachments_count: u64,
}
