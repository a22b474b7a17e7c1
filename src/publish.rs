use serenity::all::{
    AutoArchiveDuration, ChannelId, ChannelType, CreateAllowedMentions, CreateMessage, CreateThread,
};
use serenity::http::Http;
use tracing::debug;

use crate::chunk::chunk_lines;
use crate::config::DIGEST_BLOCK_LIMIT;

/// Sends `lines` to `channel_id` packed into as few messages as fit the
/// block limit. Mentions in the text never ping anyone.
pub async fn post_lines<S: AsRef<str>>(
    http: &Http,
    channel_id: u64,
    lines: &[S],
) -> anyhow::Result<usize> {
    let blocks = chunk_lines(lines.iter().map(|l| l.as_ref()), DIGEST_BLOCK_LIMIT);
    let channel = ChannelId::new(channel_id);

    for (i, block) in blocks.iter().enumerate() {
        let builder = CreateMessage::new()
            .content(block.as_str())
            .allowed_mentions(CreateAllowedMentions::new());
        debug!(
            "Posting block {}/{} ({} chars) to channel {}",
            i + 1,
            blocks.len(),
            block.chars().count(),
            channel_id
        );
        channel.send_message(http, builder).await?;
    }

    Ok(blocks.len())
}

/// Opens a public thread under `channel_id` that archives after a week of
/// inactivity. Returns the thread's channel id.
pub async fn create_thread(http: &Http, channel_id: u64, name: &str) -> anyhow::Result<u64> {
    // Discord caps thread names at 100 characters
    let name: String = name.chars().take(100).collect();
    let builder = CreateThread::new(name)
        .kind(ChannelType::PublicThread)
        .auto_archive_duration(AutoArchiveDuration::OneWeek);
    let thread = ChannelId::new(channel_id).create_thread(http, builder).await?;
    debug!("Created thread {} under channel {}", thread.id, channel_id);
    Ok(thread.id.get())
}
