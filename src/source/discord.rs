use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId, ChannelType, GetMessages, GuildChannel, GuildId, Message, MessageId,
    MessageReaction, ReactionType,
};
use serenity::http::Http;
use std::sync::Arc;
use tracing::debug;

use super::{MessageSource, SourceError};
use crate::model::{
    normalize_channel_type, snowflake_time, Attachment, Channel, FetchedMessage, Reaction, User,
};

/// REST message source backed by serenity's HTTP client. Serenity's own
/// ratelimiter waits out most 429s before they reach us.
#[derive(Clone)]
pub struct DiscordSource {
    http: Arc<Http>,
    page_size: u8,
}

impl DiscordSource {
    pub fn new(token: &str, page_size: u8) -> Self {
        Self::with_http(Arc::new(Http::new(token)), page_size)
    }

    pub fn with_http(http: Arc<Http>, page_size: u8) -> Self {
        Self {
            http,
            page_size: page_size.clamp(1, 100),
        }
    }

    pub fn http(&self) -> Arc<Http> {
        self.http.clone()
    }

    /// Guild channels plus active threads, as channel rows ready for upsert.
    pub async fn list_guild_channels(&self, guild_id: u64) -> anyhow::Result<Vec<Channel>> {
        let guild = GuildId::new(guild_id);
        let now = Utc::now();

        let mut channels: Vec<Channel> = guild
            .channels(&self.http)
            .await?
            .into_values()
            .map(|ch| channel_row(&ch, guild_id, now))
            .collect();

        let threads = guild.get_active_threads(&self.http).await?;
        channels.extend(threads.threads.iter().map(|th| channel_row(th, guild_id, now)));

        channels.sort_by_key(|c| c.id);
        channels.dedup_by_key(|c| c.id);
        debug!("Discord: guild {} has {} channels", guild_id, channels.len());
        Ok(channels)
    }
}

#[async_trait]
impl MessageSource for DiscordSource {
    async fn fetch_since(
        &self,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedMessage>, SourceError> {
        let mut out = Vec::new();
        let mut before: Option<u64> = None;

        loop {
            let page = self.fetch_page(channel_id, before, self.page_size).await?;
            let full_page = page.len() >= usize::from(self.page_size);
            let mut crossed = false;

            for msg in page {
                before = Some(before.map_or(msg.id, |b| b.min(msg.id)));
                if msg.created_at >= since {
                    out.push(msg);
                } else {
                    crossed = true;
                }
            }

            if crossed || !full_page {
                break;
            }
        }

        Ok(out)
    }

    async fn fetch_page(
        &self,
        channel_id: u64,
        before_id: Option<u64>,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>, SourceError> {
        let mut builder = GetMessages::new().limit(limit.clamp(1, 100));
        if let Some(before) = before_id {
            builder = builder.before(MessageId::new(before));
        }

        let messages = ChannelId::new(channel_id)
            .messages(&self.http, builder)
            .await
            .map_err(classify_error)?;

        Ok(messages.iter().map(fetched_message).collect())
    }
}

pub fn classify_error(err: serenity::Error) -> SourceError {
    let status = match &err {
        serenity::Error::Http(http_err) => http_err.status_code().map(|s| s.as_u16()),
        _ => None,
    };
    classify_status(status, err.to_string())
}

/// Maps an HTTP status to the error kinds the indexer retries on.
///
/// Serenity parses error bodies into `DiscordJsonError`, which keeps only the
/// code and message, so a 429's `retry_after` never reaches us and the
/// indexer waits `rate_limit_default` instead.
pub fn classify_status(status: Option<u16>, detail: String) -> SourceError {
    match status {
        Some(403) => SourceError::Forbidden,
        Some(404) => SourceError::NotFound,
        Some(429) => SourceError::RateLimited { retry_after: None },
        _ => SourceError::Transient(detail),
    }
}

fn channel_row(ch: &GuildChannel, guild_id: u64, now: DateTime<Utc>) -> Channel {
    Channel {
        id: ch.id.get(),
        guild_id,
        name: Some(ch.name.clone()),
        kind: channel_type_name(ch.kind),
        parent_id: ch.parent_id.map(|p| p.get()),
        is_active: true,
        last_synced_at: Some(now),
    }
}

fn channel_type_name(kind: ChannelType) -> String {
    let name = match kind {
        ChannelType::Text => "GUILD_TEXT",
        ChannelType::News => "GUILD_NEWS",
        ChannelType::Voice => "GUILD_VOICE",
        ChannelType::Category => "GUILD_CATEGORY",
        ChannelType::Stage => "GUILD_STAGE_VOICE",
        ChannelType::Forum => "GUILD_FORUM",
        ChannelType::NewsThread => "GUILD_NEWS_THREAD",
        ChannelType::PublicThread => "GUILD_PUBLIC_THREAD",
        ChannelType::PrivateThread => "GUILD_PRIVATE_THREAD",
        other => return normalize_channel_type(other.name()),
    };
    name.to_string()
}

fn fetched_message(msg: &Message) -> FetchedMessage {
    let id = msg.id.get();
    FetchedMessage {
        id,
        channel_id: msg.channel_id.get(),
        guild_id: msg.guild_id.map(|g| g.get()),
        author: User {
            id: msg.author.id.get(),
            username: Some(msg.author.name.clone()),
            is_bot: msg.author.bot,
        },
        created_at: snowflake_time(id).unwrap_or_else(Utc::now),
        content: extract_message_text(msg),
        reply_to_id: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|m| m.get()),
        attachments: msg
            .attachments
            .iter()
            .map(|a| Attachment {
                id: a.id.get(),
                url: a.url.clone(),
                filename: Some(a.filename.clone()),
                content_type: a.content_type.clone(),
                size: Some(u64::from(a.size)),
            })
            .collect(),
        reactions: msg.reactions.iter().map(reaction_row).collect(),
    }
}

fn reaction_row(reaction: &MessageReaction) -> Reaction {
    let (emoji_id, emoji_name) = match &reaction.reaction_type {
        ReactionType::Custom { id, name, .. } => (Some(id.get()), name.clone()),
        ReactionType::Unicode(s) => (None, Some(s.clone())),
        _ => (None, None),
    };
    Reaction {
        emoji_id,
        emoji_name,
        count: reaction.count,
    }
}

/// Message content followed by embed titles, descriptions and fields.
pub fn extract_message_text(message: &Message) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim();
        if !s.is_empty() {
            parts.push(s.to_string());
        }
    };

    push(message.content.as_str());
    for embed in &message.embeds {
        if let Some(title) = &embed.title {
            push(title.as_str());
        }
        if let Some(description) = &embed.description {
            push(description.as_str());
        }
        for field in &embed.fields {
            match (field.name.trim(), field.value.trim()) {
                ("", "") => {}
                ("", value) => push(value),
                (name, "") => push(name),
                (name, value) => push(&format!("{name}: {value}")),
            }
        }
    }

    parts.join("\n")
}
