use anyhow::Context as _;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{
    Channel, ChannelFilter, ChannelState, ChannelStateUpdate, MessageRecord, StoredMessage, User,
};

pub mod schema;
mod store;

pub use store::MessageStore;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(database_url: &str) -> anyhow::Result<Self> {
        if database_url != ":memory:" {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }
        let conn = Connection::open(database_url)
            .with_context(|| format!("Failed to open database {database_url}"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))
    }

    /// Runs a synchronous database call on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // --- Users ---

    pub fn upsert_user(&self, user: &User) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, is_bot) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username = ?2, is_bot = ?3",
            params![user.id, user.username, user.is_bot],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: u64) -> anyhow::Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, is_bot FROM users WHERE id = ?1",
                [user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_bot: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_names(&self, ids: &[u64]) -> anyhow::Result<HashMap<u64, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT username FROM users WHERE id = ?1")?;
        let mut names = HashMap::new();
        for id in ids {
            let name: Option<Option<String>> = stmt.query_row([id], |row| row.get(0)).optional()?;
            if let Some(Some(name)) = name {
                names.insert(*id, name);
            }
        }
        Ok(names)
    }

    // --- Messages ---

    /// Writes the message row and replaces its attachments, reactions and
    /// mentions in one transaction. A failing child collection is rolled back
    /// to its savepoint and logged; the parent row is still committed.
    pub fn upsert_message(&self, msg: &StoredMessage) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;

        let domains = serde_json::to_string(&msg.link_domains)?;
        tx.execute(
            "INSERT INTO messages (id, channel_id, guild_id, author_id, created_at, content, link,
                reactions_total, attachments_count, reply_to_id, has_link, link_domains,
                word_count, has_code_block, is_question)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                link = excluded.link,
                guild_id = COALESCE(excluded.guild_id, messages.guild_id),
                reactions_total = excluded.reactions_total,
                attachments_count = excluded.attachments_count,
                reply_to_id = excluded.reply_to_id,
                has_link = excluded.has_link,
                link_domains = excluded.link_domains,
                word_count = excluded.word_count,
                has_code_block = excluded.has_code_block,
                is_question = excluded.is_question",
            params![
                msg.id,
                msg.channel_id,
                msg.guild_id,
                msg.author_id,
                msg.created_at,
                msg.content,
                msg.link,
                msg.reactions_total,
                msg.attachments_count,
                msg.reply_to_id,
                msg.has_link,
                domains,
                msg.word_count,
                msg.has_code_block,
                msg.is_question,
            ],
        )?;

        replace_children(&mut tx, "attachments", msg.id, |sp| {
            sp.execute("DELETE FROM message_attachments WHERE message_id = ?1", [msg.id])?;
            let mut stmt = sp.prepare(
                "INSERT OR REPLACE INTO message_attachments
                    (id, message_id, url, filename, content_type, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for att in &msg.attachments {
                stmt.execute(params![
                    att.id,
                    msg.id,
                    att.url,
                    att.filename,
                    att.content_type,
                    att.size
                ])?;
            }
            Ok(())
        });

        replace_children(&mut tx, "reactions", msg.id, |sp| {
            sp.execute("DELETE FROM message_reactions WHERE message_id = ?1", [msg.id])?;
            let mut stmt = sp.prepare(
                "INSERT INTO message_reactions (message_id, emoji_id, emoji_name, count)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for rx in &msg.reactions {
                stmt.execute(params![msg.id, rx.emoji_id, rx.emoji_name, rx.count])?;
            }
            Ok(())
        });

        replace_children(&mut tx, "mentions", msg.id, |sp| {
            sp.execute("DELETE FROM message_mentions WHERE message_id = ?1", [msg.id])?;
            let mut stmt = sp.prepare(
                "INSERT INTO message_mentions (message_id, kind, target_id) VALUES (?1, ?2, ?3)",
            )?;
            for mention in &msg.mentions {
                stmt.execute(params![msg.id, mention.kind.as_str(), mention.target_id])?;
            }
            Ok(())
        });

        tx.commit()?;
        Ok(())
    }

    pub fn message_count(&self, channel_id: Option<u64>) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count: usize = match channel_id {
            Some(cid) => conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
                [cid],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    pub fn message_ids(&self, channel_id: u64) -> anyhow::Result<Vec<u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM messages WHERE channel_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([channel_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<u64>>>()?;
        Ok(ids)
    }

    /// Messages created at or after `since`, newest first.
    pub fn messages_since(
        &self,
        since: DateTime<Utc>,
        channel_id: Option<u64>,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, channel_id, author_id, created_at, content, link,
                    reactions_total, attachments_count
             FROM messages WHERE created_at >= ?1",
        );
        if channel_id.is_some() {
            sql.push_str(" AND channel_id = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match channel_id {
            Some(cid) => stmt.query_map(params![since, cid], message_record)?,
            None => stmt.query_map(params![since], message_record)?,
        };
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Oldest and newest stored message times for a channel.
    pub fn message_time_range(
        &self,
        channel_id: u64,
    ) -> anyhow::Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let conn = self.conn()?;
        let range = conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM messages WHERE channel_id = ?1",
            [channel_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(range)
    }

    // --- Channel state ---

    pub fn get_channel_state(&self, channel_id: u64) -> anyhow::Result<Option<ChannelState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT channel_id, last_message_id, last_message_created_at, last_indexed_at,
                        backfill_before_id, backfill_oldest_at
                 FROM channel_state WHERE channel_id = ?1",
                [channel_id],
                |row| {
                    Ok(ChannelState {
                        channel_id: row.get(0)?,
                        last_message_id: row.get(1)?,
                        last_message_created_at: row.get(2)?,
                        last_indexed_at: row.get(3)?,
                        backfill_before_id: row.get(4)?,
                        backfill_oldest_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Creates the checkpoint row if needed and writes only the provided fields.
    pub fn upsert_channel_state(
        &self,
        channel_id: u64,
        update: &ChannelStateUpdate,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO channel_state (channel_id, last_message_id, last_message_created_at,
                last_indexed_at, backfill_before_id, backfill_oldest_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(channel_id) DO UPDATE SET
                last_message_id = COALESCE(excluded.last_message_id, channel_state.last_message_id),
                last_message_created_at = COALESCE(excluded.last_message_created_at, channel_state.last_message_created_at),
                last_indexed_at = COALESCE(excluded.last_indexed_at, channel_state.last_indexed_at),
                backfill_before_id = COALESCE(excluded.backfill_before_id, channel_state.backfill_before_id),
                backfill_oldest_at = COALESCE(excluded.backfill_oldest_at, channel_state.backfill_oldest_at)",
            params![
                channel_id,
                update.last_message_id,
                update.last_message_created_at,
                update.last_indexed_at,
                update.backfill_before_id,
                update.backfill_oldest_at,
            ],
        )?;
        Ok(())
    }

    pub fn clear_backfill_cursor(&self, channel_id: u64) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE channel_state SET backfill_before_id = NULL, backfill_oldest_at = NULL
             WHERE channel_id = ?1",
            [channel_id],
        )?;
        Ok(())
    }

    // --- Channels ---

    /// Upserts the channels seen for a guild, reactivating them, and
    /// deactivates that guild's channels missing from `seen`.
    pub fn upsert_channels(&self, guild_id: u64, seen: &[Channel]) -> anyhow::Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO channels (id, guild_id, name, type, parent_id, is_active, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, TRUE, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    guild_id = ?2, name = ?3, type = ?4, parent_id = ?5,
                    is_active = TRUE, last_synced_at = ?6",
            )?;
            for ch in seen {
                stmt.execute(params![
                    ch.id,
                    guild_id,
                    ch.name,
                    ch.kind,
                    ch.parent_id,
                    ch.last_synced_at
                ])?;
            }

            let seen_ids = serde_json::to_string(&seen.iter().map(|c| c.id).collect::<Vec<_>>())?;
            let deactivated = tx.execute(
                "UPDATE channels SET is_active = FALSE
                 WHERE guild_id = ?1 AND id NOT IN (SELECT value FROM json_each(?2))",
                params![guild_id, seen_ids],
            )?;
            if deactivated > 0 {
                info!("Database: deactivated {} channels no longer in guild {}", deactivated, guild_id);
            }
        }
        tx.commit()?;
        Ok(seen.len())
    }

    pub fn list_channels(&self, filter: &ChannelFilter) -> anyhow::Result<Vec<Channel>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, guild_id, name, type, parent_id, is_active, last_synced_at
             FROM channels WHERE 1 = 1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.ids.is_empty() {
            sql.push_str(" AND id IN (");
            sql.push_str(&vec!["?"; filter.ids.len()].join(", "));
            sql.push(')');
            for id in &filter.ids {
                params.push(Box::new(*id));
            }
        }
        if let Some(guild_id) = filter.guild_id {
            sql.push_str(" AND guild_id = ?");
            params.push(Box::new(guild_id));
        }
        if let Some(active) = filter.active {
            sql.push_str(" AND is_active = ?");
            params.push(Box::new(active));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let params_slice: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(&params_slice[..], channel_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_channel_active(&self, channel_id: u64, active: bool) -> anyhow::Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE channels SET is_active = ?1 WHERE id = ?2",
            params![active, channel_id],
        )?;
        if updated == 0 {
            warn!("Database: set_channel_active on unknown channel {}", channel_id);
        }
        Ok(())
    }
}

fn replace_children<F>(tx: &mut Transaction<'_>, what: &str, message_id: u64, f: F)
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let result = tx.savepoint().and_then(|sp| {
        f(&sp)?;
        sp.commit()
    });
    if let Err(e) = result {
        warn!("Database: failed to replace {} for message {}: {}", what, message_id, e);
    }
}

fn channel_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        guild_id: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        parent_id: row.get(4)?,
        is_active: row.get(5)?,
        last_synced_at: row.get(6)?,
    })
}

fn message_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        author_id: row.get(2)?,
        created_at: row.get(3)?,
        content: row.get(4)?,
        link: row.get(5)?,
        reactions_total: row.get(6)?,
        attachments_count: row.get(7)?,
    })
}
