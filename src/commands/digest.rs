use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::{PerChannelArgs, PostTarget};
use crate::digest::build_digest;
use crate::per_channel::{self, build_per_channel, channel_summary_lines, rollup_lines};
use crate::publish::{create_thread, post_lines};
use crate::report::{build_compact_summary, DEFAULT_LIST_LEN};
use crate::scheduler::DigestScheduler;
use crate::Data;

fn digest_channel(data: &Data) -> anyhow::Result<u64> {
    data.config
        .digest_channel_id
        .ok_or_else(|| anyhow::anyhow!("DIGEST_CHANNEL_ID must be set to post"))
}

pub async fn digest(data: &Data, hours: Option<i64>, dry_run: bool) -> anyhow::Result<()> {
    let hours = hours.unwrap_or(data.config.time_window_hours);
    let digest = build_digest(
        &data.db,
        &data.summarizer(),
        hours,
        data.config.top_n_convos,
        Utc::now(),
    )
    .await?;

    if dry_run {
        println!("{}", digest.preview());
        return Ok(());
    }

    let channel_id = digest_channel(data)?;
    let source = data.discord()?;
    let posted = post_lines(&source.http(), channel_id, &digest.post_lines()).await?;
    info!("Posted digest to channel {} in {} messages", channel_id, posted);
    Ok(())
}

pub async fn report(data: &Data, hours: i64, post: bool) -> anyhow::Result<()> {
    let lines = data
        .db
        .run_blocking(move |db| build_compact_summary(db, hours, DEFAULT_LIST_LEN, Utc::now()))
        .await?;

    if !post {
        println!("{}", lines.join("\n"));
        return Ok(());
    }

    let channel_id = digest_channel(data)?;
    let source = data.discord()?;
    let posted = post_lines(&source.http(), channel_id, &lines).await?;
    info!("Posted report to channel {} in {} messages", channel_id, posted);
    Ok(())
}

/// Pause between posts into different source channels.
const SOURCE_POST_PAUSE: Duration = Duration::from_millis(500);

pub async fn per_channel(data: &Data, args: PerChannelArgs) -> anyhow::Result<()> {
    if args.thread && args.post_to == PostTarget::Source {
        anyhow::bail!("--thread only applies to --post-to digest");
    }

    let opts = args.options(data.config.guild_id);
    let sections = build_per_channel(&data.db, &data.summarizer(), &opts, Utc::now()).await?;

    if args.dry_run {
        println!("{}", per_channel::preview(&sections, &opts));
        return Ok(());
    }
    if sections.is_empty() {
        info!(
            "No channels with at least {} messages in the last {}h, nothing to post",
            opts.min_messages, opts.hours
        );
        return Ok(());
    }

    let http = data.discord()?.http();
    match args.post_to {
        PostTarget::Digest => {
            let digest_channel = digest_channel(data)?;
            let mut target = digest_channel;
            if args.thread {
                let name = args
                    .thread_name
                    .clone()
                    .unwrap_or_else(|| per_channel::thread_name(opts.hours));
                match create_thread(&http, digest_channel, &name).await {
                    Ok(thread_id) => target = thread_id,
                    Err(e) => warn!(
                        "Could not create thread '{}' in channel {} ({}), posting to the channel",
                        name, digest_channel, e
                    ),
                }
            }
            let posted = post_lines(&http, target, &rollup_lines(&sections)).await?;
            info!(
                "Posted rollup of {} channels to {} in {} messages",
                sections.len(),
                target,
                posted
            );
        }
        PostTarget::Source => {
            let mut posted = 0;
            for (i, section) in sections.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(SOURCE_POST_PAUSE).await;
                }
                match post_lines(&http, section.channel_id, &section.lines).await {
                    Ok(_) => posted += 1,
                    Err(e) => warn!("Could not post summary to {}: {}", section.label, e),
                }
            }
            info!("Posted {}/{} per-channel summaries to their channels", posted, sections.len());
        }
    }
    Ok(())
}

pub async fn channel_summary(data: &Data, channel_id: u64, hours: i64, dry_run: bool) -> anyhow::Result<()> {
    let lines = channel_summary_lines(&data.db, &data.summarizer(), channel_id, hours, Utc::now()).await?;
    if dry_run {
        println!("{}", lines.join("\n"));
        return Ok(());
    }

    let target = digest_channel(data)?;
    let posted = post_lines(&data.discord()?.http(), target, &lines).await?;
    info!("Posted summary of channel {} to {} in {} messages", channel_id, target, posted);
    Ok(())
}

pub async fn serve(data: &Data) -> anyhow::Result<()> {
    let source = data.discord()?;
    let scheduler = DigestScheduler::new(
        &data.config,
        source.clone(),
        data.indexer(source),
        data.db.clone(),
        data.summarizer(),
    )?;
    scheduler.run().await;
    Ok(())
}
