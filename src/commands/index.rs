use tracing::info;

use crate::cli::IndexArgs;
use crate::indexer::{IndexMode, IndexRequest, IndexSummary};
use crate::scheduler;
use crate::Data;

pub fn request_from_args(args: &IndexArgs, default_guild: Option<u64>) -> IndexRequest {
    IndexRequest {
        mode: if args.full {
            IndexMode::Backfill
        } else {
            IndexMode::Incremental
        },
        channel_ids: args.channels.clone(),
        guild_id: args.guild.or(default_guild),
        lookback_hours: args.hours,
        cutoff: args.since,
        max_total: args.max,
        restart: args.restart,
        only_text: args.only_text,
    }
}

pub async fn index(data: &Data, args: IndexArgs) -> anyhow::Result<()> {
    let request = request_from_args(&args, data.config.guild_id);
    if request.channel_ids.is_empty() && request.guild_id.is_none() {
        anyhow::bail!("Pass --channels or set GUILD_ID to pick the channels to index");
    }

    let indexer = data.indexer(data.discord()?);
    let summary = indexer.run(&request).await?;
    print_summary(&summary);
    Ok(())
}

pub async fn sync_channels(data: &Data, guild: Option<u64>) -> anyhow::Result<()> {
    let guild_id = match guild {
        Some(id) => id,
        None => data.config.require_guild()?,
    };
    let source = data.discord()?;
    let synced = scheduler::sync_channels(&source, &data.db, guild_id).await?;
    println!("Synced {synced} channels for guild {guild_id}");
    Ok(())
}

fn print_summary(summary: &IndexSummary) {
    for report in &summary.reports {
        match &report.error {
            Some(err) => println!("{} [{:?}] {} messages: {}", report.label, report.status, report.count, err),
            None => println!("{} [{:?}] {} messages", report.label, report.status, report.count),
        }
    }
    for skipped in &summary.skipped {
        println!("{} skipped: {}", skipped.channel_id, skipped.reason);
    }
    info!(
        "Indexed {} messages across {} channels ({} failed, {} skipped)",
        summary.total_messages(),
        summary.reports.len(),
        summary.failed(),
        summary.skipped.len()
    );
}
