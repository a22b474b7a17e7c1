use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{ChannelReport, IndexError, IndexRequest, Indexer};
use crate::model::{Channel, ChannelStateUpdate};
use crate::progress::{Mode, ProgressEvent, Status};

/// Why a backfill walk stopped.
#[derive(Debug)]
pub enum BackfillStop {
    /// Reached the beginning of the channel.
    Done,
    /// Met a message older than the cutoff.
    Cutoff,
    /// Stored `max_total` messages.
    Limit,
    /// Stopped on an error; the cursor stays at the last completed page.
    Failed(IndexError),
}

#[derive(Debug)]
pub struct BackfillOutcome {
    pub count: usize,
    pub before_id: Option<u64>,
    pub stop: BackfillStop,
}

impl Indexer {
    pub(super) async fn run_backfill(
        &self,
        channels: Vec<Channel>,
        request: &IndexRequest,
    ) -> Vec<ChannelReport> {
        let mut reports = Vec::with_capacity(channels.len());

        for channel in channels {
            if request.restart {
                info!("Indexer: restarting backfill of {}", channel.label());
                if let Err(e) = self.store.clear_backfill_cursor(channel.id).await {
                    warn!("Indexer: failed to clear cursor of {}: {}", channel.label(), e);
                }
            }

            let outcome = self
                .index_backfill(&channel, request.cutoff, request.max_total)
                .await;

            if let Err(e) = self
                .store
                .upsert_channel_state(channel.id, ChannelStateUpdate::indexed_at(Utc::now()))
                .await
            {
                warn!("Indexer: failed to stamp {}: {}", channel.label(), e);
            }

            let report = match outcome.stop {
                BackfillStop::Failed(err) => {
                    self.failed_report(Mode::Backfill, &channel, outcome.count, outcome.before_id, err)
                        .await
                }
                stop => ChannelReport {
                    channel_id: channel.id,
                    label: channel.label(),
                    count: outcome.count,
                    status: match stop {
                        BackfillStop::Done => Status::Done,
                        _ => Status::Ok,
                    },
                    error: None,
                },
            };
            reports.push(report);
        }

        reports
    }

    /// Walks `channel` backwards from its saved cursor (or from the newest
    /// message), storing each page and saving the cursor after it.
    ///
    /// Pages are handled newest to oldest. Meeting a message older than
    /// `cutoff` ends the walk without moving the cursor past that page.
    pub async fn index_backfill(
        &self,
        channel: &Channel,
        cutoff: Option<DateTime<Utc>>,
        max_total: Option<usize>,
    ) -> BackfillOutcome {
        let mut count = 0usize;
        let mut before = match self.store.get_channel_state(channel.id).await {
            Ok(state) => state.and_then(|s| s.backfill_before_id),
            Err(e) => {
                return BackfillOutcome {
                    count,
                    before_id: None,
                    stop: BackfillStop::Failed(e.into()),
                }
            }
        };
        let outcome = |count, before_id, stop| BackfillOutcome {
            count,
            before_id,
            stop,
        };

        if let Some(id) = before {
            info!("Indexer: resuming backfill of {} before {}", channel.label(), id);
        }

        loop {
            if max_total.is_some_and(|max| count >= max) {
                return outcome(count, before, BackfillStop::Limit);
            }

            let page_size = self.settings.page_size;
            let mut page = match self
                .with_retries(Mode::Backfill, channel.id, before, || {
                    self.source.fetch_page(channel.id, before, page_size)
                })
                .await
            {
                Ok(page) => page,
                Err(e) => return outcome(count, before, BackfillStop::Failed(e)),
            };

            if page.is_empty() {
                self.progress.emit(
                    ProgressEvent::new(Mode::Backfill, Status::Done, channel.id)
                        .total_so_far(count)
                        .before_id(before),
                );
                info!("Indexer: backfill of {} complete ({} messages)", channel.label(), count);
                return outcome(count, before, BackfillStop::Done);
            }

            if let Some(before_id) = before {
                if page.iter().all(|m| m.id >= before_id) {
                    return outcome(
                        count,
                        before,
                        BackfillStop::Failed(IndexError::CursorRegression { before_id }),
                    );
                }
            }

            page.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

            let mut page_count = 0usize;
            let mut oldest = None;
            let mut stop = None;
            for msg in page {
                if before.is_some_and(|b| msg.id >= b) {
                    continue;
                }
                if cutoff.is_some_and(|c| msg.created_at < c) {
                    stop = Some(BackfillStop::Cutoff);
                    break;
                }

                let (id, created_at) = (msg.id, msg.created_at);
                if let Err(e) = self.persist(channel, msg).await {
                    return outcome(count, before, BackfillStop::Failed(e));
                }
                count += 1;
                page_count += 1;
                oldest = Some((id, created_at));

                if max_total.is_some_and(|max| count >= max) {
                    stop = Some(BackfillStop::Limit);
                    break;
                }
            }

            if matches!(stop, Some(BackfillStop::Cutoff)) {
                self.progress.emit(
                    ProgressEvent::new(Mode::Backfill, Status::Done, channel.id)
                        .batch_size(page_count)
                        .total_so_far(count)
                        .before_id(before)
                        .message("reached cutoff"),
                );
                info!("Indexer: backfill of {} reached cutoff ({} messages)", channel.label(), count);
                return outcome(count, before, BackfillStop::Cutoff);
            }

            if let Some((oldest_id, oldest_at)) = oldest {
                let update = ChannelStateUpdate {
                    backfill_before_id: Some(oldest_id),
                    backfill_oldest_at: Some(oldest_at),
                    ..Default::default()
                };
                if let Err(e) = self.store.upsert_channel_state(channel.id, update).await {
                    return outcome(count, before, BackfillStop::Failed(e.into()));
                }
                before = Some(oldest_id);

                self.progress.emit(
                    ProgressEvent::new(Mode::Backfill, Status::Ok, channel.id)
                        .batch_size(page_count)
                        .total_so_far(count)
                        .oldest_seen(oldest_at)
                        .before_id(before),
                );
                debug!(
                    "Indexer: {} page of {} stored, {} total, next before {}",
                    channel.label(),
                    page_count,
                    count,
                    oldest_id
                );
            }

            if let Some(stop) = stop {
                return outcome(count, before, stop);
            }

            tokio::time::sleep(self.settings.pacing).await;
        }
    }
}
