//! One handler per CLI subcommand.

pub mod digest;
pub mod index;
pub mod state;

use crate::cli::Commands;
use crate::Data;

pub async fn dispatch(data: &Data, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Index(args) => index::index(data, args).await,
        Commands::SyncChannels { guild } => index::sync_channels(data, guild).await,
        Commands::ShowState { channels } => state::show_state(data, &channels),
        Commands::SkipReport => state::skip_report(data),
        Commands::Digest { hours, dry_run } => digest::digest(data, hours, dry_run).await,
        Commands::Report { hours, post } => digest::report(data, hours, post).await,
        Commands::PerChannel(args) => digest::per_channel(data, args).await,
        Commands::ChannelSummary {
            channel,
            hours,
            dry_run,
        } => digest::channel_summary(data, channel, hours, dry_run).await,
        Commands::Serve => digest::serve(data).await,
    }
}
