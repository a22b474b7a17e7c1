use async_trait::async_trait;

use super::Database;
use crate::model::{Channel, ChannelFilter, ChannelState, ChannelStateUpdate, StoredMessage, User};

/// The persistence surface the indexer depends on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn upsert_user(&self, user: &User) -> anyhow::Result<()>;

    /// Idempotent on `msg.id`; child collections are replaced, not merged.
    async fn upsert_message(&self, msg: &StoredMessage) -> anyhow::Result<()>;

    async fn get_channel_state(&self, channel_id: u64) -> anyhow::Result<Option<ChannelState>>;

    async fn upsert_channel_state(
        &self,
        channel_id: u64,
        update: ChannelStateUpdate,
    ) -> anyhow::Result<()>;

    async fn clear_backfill_cursor(&self, channel_id: u64) -> anyhow::Result<()>;

    async fn list_channels(&self, filter: ChannelFilter) -> anyhow::Result<Vec<Channel>>;

    async fn set_channel_active(&self, channel_id: u64, active: bool) -> anyhow::Result<()>;
}

#[async_trait]
impl MessageStore for Database {
    async fn upsert_user(&self, user: &User) -> anyhow::Result<()> {
        let user = user.clone();
        self.run_blocking(move |db| db.upsert_user(&user)).await
    }

    async fn upsert_message(&self, msg: &StoredMessage) -> anyhow::Result<()> {
        let msg = msg.clone();
        self.run_blocking(move |db| db.upsert_message(&msg)).await
    }

    async fn get_channel_state(&self, channel_id: u64) -> anyhow::Result<Option<ChannelState>> {
        self.run_blocking(move |db| db.get_channel_state(channel_id))
            .await
    }

    async fn upsert_channel_state(
        &self,
        channel_id: u64,
        update: ChannelStateUpdate,
    ) -> anyhow::Result<()> {
        self.run_blocking(move |db| db.upsert_channel_state(channel_id, &update))
            .await
    }

    async fn clear_backfill_cursor(&self, channel_id: u64) -> anyhow::Result<()> {
        self.run_blocking(move |db| db.clear_backfill_cursor(channel_id))
            .await
    }

    async fn list_channels(&self, filter: ChannelFilter) -> anyhow::Result<Vec<Channel>> {
        self.run_blocking(move |db| db.list_channels(&filter)).await
    }

    async fn set_channel_active(&self, channel_id: u64, active: bool) -> anyhow::Result<()> {
        self.run_blocking(move |db| db.set_channel_active(channel_id, active))
            .await
    }
}
