use super::*;
use crate::db::Database;
use crate::model::User;
use async_trait::async_trait;
use chrono::TimeZone;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const GUILD: u64 = 1;

/// In-memory channel history with scripted failures. Each call first pops
/// the channel's failure queue; a `None` entry lets that call through.
#[derive(Default)]
struct ScriptedSource {
    history: Mutex<HashMap<u64, Vec<FetchedMessage>>>,
    failures: Mutex<HashMap<u64, VecDeque<Option<SourceError>>>>,
    pages: Mutex<HashMap<u64, VecDeque<Vec<FetchedMessage>>>>,
    calls: Mutex<Vec<(u64, Option<u64>)>>,
    fetch_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    fn add(&self, msgs: impl IntoIterator<Item = FetchedMessage>) {
        let mut history = self.history.lock().unwrap();
        for msg in msgs {
            history.entry(msg.channel_id).or_default().push(msg);
        }
    }

    fn fail(&self, channel_id: u64, errors: impl IntoIterator<Item = SourceError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .extend(errors.into_iter().map(Some));
    }

    fn pass(&self, channel_id: u64, calls: usize) {
        self.failures
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .extend(std::iter::repeat(None).take(calls));
    }

    fn script_page(&self, channel_id: u64, page: Vec<FetchedMessage>) {
        self.pages
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push_back(page);
    }

    fn next_failure(&self, channel_id: u64) -> Option<SourceError> {
        self.failures
            .lock()
            .unwrap()
            .get_mut(&channel_id)
            .and_then(|q| q.pop_front())
            .flatten()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Makes every `fetch_since` call take `delay`.
    fn slow(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch_since(
        &self,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedMessage>, SourceError> {
        self.calls.lock().unwrap().push((channel_id, None));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.next_failure(channel_id) {
            return Err(e);
        }
        let history = self.history.lock().unwrap();
        let mut out: Vec<FetchedMessage> = history
            .get(&channel_id)
            .map(|msgs| msgs.iter().filter(|m| m.created_at >= since).cloned().collect())
            .unwrap_or_default();
        // Newest first, like the REST API
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    async fn fetch_page(
        &self,
        channel_id: u64,
        before_id: Option<u64>,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>, SourceError> {
        self.calls.lock().unwrap().push((channel_id, before_id));
        if let Some(e) = self.next_failure(channel_id) {
            return Err(e);
        }
        if let Some(page) = self
            .pages
            .lock()
            .unwrap()
            .get_mut(&channel_id)
            .and_then(|q| q.pop_front())
        {
            return Ok(page);
        }
        let history = self.history.lock().unwrap();
        let mut out: Vec<FetchedMessage> = history
            .get(&channel_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| before_id.map_or(true, |b| m.id < b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(usize::from(limit));
        Ok(out)
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    base() + chrono::Duration::minutes(minutes)
}

/// Message `id` posted `id` minutes after the base time.
fn msg(channel_id: u64, id: u64) -> FetchedMessage {
    msg_at(channel_id, id, at(id as i64))
}

fn msg_at(channel_id: u64, id: u64, created_at: DateTime<Utc>) -> FetchedMessage {
    FetchedMessage {
        id,
        channel_id,
        guild_id: None,
        author: User {
            id: 500 + id % 3,
            username: Some(format!("user{}", id % 3)),
            is_bot: false,
        },
        created_at,
        content: format!("message {id} https://example.com/{id}"),
        reply_to_id: None,
        attachments: Vec::new(),
        reactions: Vec::new(),
    }
}

fn channel(id: u64, kind: &str) -> Channel {
    Channel {
        id,
        guild_id: GUILD,
        name: Some(format!("chan-{id}")),
        kind: kind.to_string(),
        parent_id: None,
        is_active: true,
        last_synced_at: Some(base()),
    }
}

fn fast_settings() -> IndexerSettings {
    IndexerSettings {
        pacing: Duration::ZERO,
        rate_limit_default: Duration::ZERO,
        rate_limit_jitter: Duration::ZERO,
        backoff_base: Duration::ZERO,
        backoff_cap: Duration::ZERO,
        ..Default::default()
    }
}

struct Harness {
    db: Database,
    source: Arc<ScriptedSource>,
    indexer: Indexer,
    log_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(channels: &[Channel]) -> Self {
        Self::with_settings(channels, fast_settings())
    }

    fn with_settings(channels: &[Channel], settings: IndexerSettings) -> Self {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db.upsert_channels(GUILD, channels).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("progress.jsonl");
        let progress = ProgressLog::open(&log_path, "test-run".to_string());

        let source = Arc::new(ScriptedSource::default());
        let indexer = Indexer::new(source.clone(), Arc::new(db.clone()), progress, settings);
        Self {
            db,
            source,
            indexer,
            log_path,
            _dir: dir,
        }
    }

    fn state(&self, channel_id: u64) -> ChannelState {
        self.db.get_channel_state(channel_id).unwrap().unwrap_or_default()
    }

    fn events(&self) -> Vec<serde_json::Value> {
        read_events(&self.log_path)
    }

    fn statuses(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

fn read_events(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn incremental(ids: &[u64]) -> IndexRequest {
    IndexRequest {
        channel_ids: ids.to_vec(),
        lookback_hours: Some(24 * 365 * 10),
        ..Default::default()
    }
}

fn backfill(ids: &[u64]) -> IndexRequest {
    IndexRequest {
        mode: IndexMode::Backfill,
        channel_ids: ids.to_vec(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_incremental_first_run_sets_cursor() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.source.add([msg(10, 1), msg(10, 2), msg(10, 3)]);

    let summary = h.indexer.run(&incremental(&[10])).await.unwrap();

    assert_eq!(summary.total_messages(), 3);
    assert_eq!(h.db.message_count(Some(10)).unwrap(), 3);
    let state = h.state(10);
    assert_eq!(state.last_message_id, Some(3));
    assert_eq!(state.last_message_created_at, Some(at(3)));
    assert!(state.last_indexed_at.is_some());

    let events = h.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "ok");
    assert_eq!(events[0]["mode"], "incremental");
    assert_eq!(events[0]["batch_size"], 3);
    assert_eq!(events[0]["run_id"], "test-run");
}

#[tokio::test]
async fn test_incremental_is_idempotent() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.source.add([msg(10, 1), msg(10, 2)]);

    h.indexer.run(&incremental(&[10])).await.unwrap();
    let first = h.state(10);
    h.indexer.run(&incremental(&[10])).await.unwrap();
    let second = h.state(10);

    assert_eq!(h.db.message_count(Some(10)).unwrap(), 2);
    assert_eq!(second.last_message_id, first.last_message_id);
    assert_eq!(second.last_message_created_at, first.last_message_created_at);
    assert!(second.last_indexed_at >= first.last_indexed_at);
}

#[tokio::test]
async fn test_incremental_stores_in_ascending_order() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    // Delivered newest first with ids out of time order
    h.source.add([msg_at(10, 7, at(1)), msg_at(10, 5, at(3)), msg_at(10, 6, at(2))]);

    h.indexer.run(&incremental(&[10])).await.unwrap();

    // The cursor tracks the newest timestamp, not the largest id
    let state = h.state(10);
    assert_eq!(state.last_message_id, Some(5));
    assert_eq!(state.last_message_created_at, Some(at(3)));
    assert_eq!(h.events()[0]["oldest_seen_iso"], "2024-06-01T12:01:00Z");
}

#[tokio::test]
async fn test_incremental_cursor_never_regresses() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.db.upsert_channel_state(
        10,
        &ChannelStateUpdate {
            last_message_id: Some(50),
            last_message_created_at: Some(at(50)),
            ..Default::default()
        },
    )
    .unwrap();

    let state = h.state(10);
    let count = h
        .indexer
        .index_incremental(&channel(10, "GUILD_TEXT"), Some(&state), 24)
        .await
        .unwrap();
    assert_eq!(count, 0);
    let after = h.state(10);
    assert_eq!(after.last_message_id, Some(50));
    assert_eq!(after.last_message_created_at, Some(at(50)));
    assert!(after.last_indexed_at.is_some());
    assert_eq!(h.events()[0]["message"], "no new messages");

    // Only messages at or after the cursor are fetched
    h.source.add([msg(10, 40), msg(10, 50), msg(10, 60)]);
    let count = h
        .indexer
        .index_incremental(&channel(10, "GUILD_TEXT"), Some(&after), 24)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(h.state(10).last_message_id, Some(60));
    assert_eq!(h.db.message_ids(10).unwrap(), vec![50, 60]);
}

#[tokio::test]
async fn test_incremental_fills_guild_and_derived_fields() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.source.add([msg(10, 1)]);

    h.indexer.run(&incremental(&[10])).await.unwrap();

    let rows = h.db.messages_since(base(), Some(10)).unwrap();
    assert_eq!(rows[0].link, "https://discord.com/channels/1/10/1");
    assert!(h.db.get_user(501).unwrap().is_some());
}

#[tokio::test]
async fn test_incremental_failure_is_isolated() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT"), channel(11, "GUILD_TEXT"), channel(12, "GUILD_TEXT")]);
    h.source.add([msg(10, 1), msg(11, 2), msg(12, 3)]);
    h.source.fail(11, (0..10).map(|i| SourceError::Transient(format!("boom {i}"))));
    h.source.fail(12, [SourceError::Forbidden]);

    let summary = h.indexer.run(&incremental(&[12, 11, 10])).await.unwrap();

    assert_eq!(
        summary.reports.iter().map(|r| r.channel_id).collect::<Vec<_>>(),
        vec![10, 11, 12]
    );
    assert_eq!(summary.reports[0].count, 1);
    assert_eq!(summary.reports[1].status, Status::Error);
    assert_eq!(summary.reports[2].status, Status::Skip403);

    assert_eq!(h.state(10).last_message_id, Some(1));
    assert_eq!(h.db.get_channel_state(11).unwrap(), None);
    assert_eq!(h.db.message_count(Some(11)).unwrap(), 0);

    let inactive = h
        .db
        .list_channels(&ChannelFilter::default().inactive_only())
        .unwrap();
    assert_eq!(inactive.iter().map(|c| c.id).collect::<Vec<_>>(), vec![12]);
}

#[tokio::test]
async fn test_rate_limit_retries_do_not_use_budget() {
    let settings = IndexerSettings {
        max_retries: 0,
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add([msg(10, 1)]);
    h.source.fail(
        10,
        [
            SourceError::RateLimited { retry_after: Some(Duration::ZERO) },
            SourceError::RateLimited { retry_after: None },
            SourceError::RateLimited { retry_after: Some(Duration::ZERO) },
        ],
    );

    let summary = h.indexer.run(&incremental(&[10])).await.unwrap();

    assert_eq!(summary.total_messages(), 1);
    assert_eq!(h.source.call_count(), 4);
    assert_eq!(h.statuses(), vec!["retry_429", "retry_429", "retry_429", "ok"]);
}

#[tokio::test]
async fn test_rate_limit_without_hint_waits_default() {
    let settings = IndexerSettings {
        rate_limit_default: Duration::from_millis(40),
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add([msg(10, 1)]);
    h.source.fail(10, [SourceError::RateLimited { retry_after: None }]);

    let started = Instant::now();
    let summary = h.indexer.run(&incremental(&[10])).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(summary.total_messages(), 1);
}

#[tokio::test]
async fn test_transient_retries_back_off_up_to_cap() {
    let settings = IndexerSettings {
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(30),
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add([msg(10, 1)]);
    h.source.fail(
        10,
        (0..3).map(|i| SourceError::Transient(format!("boom {i}"))),
    );

    let started = Instant::now();
    let summary = h.indexer.run(&incremental(&[10])).await.unwrap();

    // 20ms, then 40ms capped to 30ms twice
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(summary.total_messages(), 1);
    assert_eq!(h.statuses(), vec!["retry_other", "retry_other", "retry_other", "ok"]);
}

#[test]
fn test_default_backoff_schedule() {
    let defaults = IndexerSettings::default();
    assert_eq!(defaults.concurrency, 2);
    assert_eq!(defaults.pacing, Duration::from_millis(250));

    let h = Harness::with_settings(&[], defaults);
    let mut backoff = h.indexer.backoff();
    let schedule: Vec<u64> = (0..8)
        .map(|_| backoff.next_backoff().unwrap().as_secs())
        .collect();

    assert_eq!(schedule, vec![1, 2, 4, 8, 16, 32, 60, 60]);
}

#[tokio::test]
async fn test_incremental_respects_concurrency_limit() {
    let channels: Vec<Channel> = (10..15).map(|id| channel(id, "GUILD_TEXT")).collect();
    let ids: Vec<u64> = channels.iter().map(|c| c.id).collect();

    for limit in [1, 2, 3] {
        let settings = IndexerSettings {
            concurrency: limit,
            ..fast_settings()
        };
        let h = Harness::with_settings(&channels, settings);
        h.source.add(ids.iter().map(|&id| msg(id, id)));
        h.source.slow(Duration::from_millis(30));

        let summary = h.indexer.run(&incremental(&ids)).await.unwrap();

        assert_eq!(summary.total_messages(), 5);
        assert_eq!(h.source.max_in_flight(), limit, "concurrency {limit}");
    }
}

#[tokio::test]
async fn test_backfill_pauses_between_pages() {
    let settings = IndexerSettings {
        page_size: 2,
        pacing: Duration::from_millis(40),
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add((1..=5).map(|id| msg(10, id)));

    let started = Instant::now();
    let summary = h.indexer.run(&backfill(&[10])).await.unwrap();

    // Three full or partial pages, each followed by a pause
    assert!(started.elapsed() >= Duration::from_millis(120));
    assert_eq!(summary.total_messages(), 5);
    assert_eq!(h.source.call_count(), 4);
}

#[tokio::test]
async fn test_channel_selection() {
    let h = Harness::new(&[
        channel(30, "GUILD_PUBLIC_THREAD"),
        channel(10, "GUILD_TEXT"),
        channel(20, "GUILD_VOICE"),
        channel(40, "GUILD_NEWS"),
        channel(50, "GUILD_TEXT"),
    ]);
    h.db.set_channel_active(50, false).unwrap();

    let all = IndexRequest {
        guild_id: Some(GUILD),
        ..Default::default()
    };
    let (selected, skipped) = h.indexer.select_channels(&all).await.unwrap();
    assert_eq!(selected.iter().map(|c| c.id).collect::<Vec<_>>(), vec![10, 30, 40]);
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].channel_id, 20);

    let requested = IndexRequest {
        channel_ids: vec![50, 40, 99, 10, 40],
        only_text: true,
        ..Default::default()
    };
    let (selected, skipped) = h.indexer.select_channels(&requested).await.unwrap();
    assert_eq!(selected.iter().map(|c| c.id).collect::<Vec<_>>(), vec![10]);
    let mut skipped_ids: Vec<u64> = skipped.iter().map(|s| s.channel_id).collect();
    skipped_ids.sort_unstable();
    assert_eq!(skipped_ids, vec![40, 50, 99]);
}

#[tokio::test]
async fn test_backfill_cutoff_stops_immediately() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    let cutoff = at(100);
    h.source.script_page(
        10,
        vec![msg_at(10, 205, at(105)), msg_at(10, 203, at(103)), msg_at(10, 199, at(99))],
    );

    let outcome = h
        .indexer
        .index_backfill(&channel(10, "GUILD_TEXT"), Some(cutoff), None)
        .await;

    assert_eq!(outcome.count, 2);
    assert!(matches!(outcome.stop, BackfillStop::Cutoff));
    assert_eq!(h.db.message_ids(10).unwrap(), vec![203, 205]);
    assert_eq!(h.state(10).backfill_before_id, None);
    assert_eq!(h.source.call_count(), 1);
}

#[tokio::test]
async fn test_backfill_forbidden_deactivates_channel() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.source.add([msg(10, 1)]);
    h.source.fail(10, [SourceError::Forbidden]);

    let summary = h.indexer.run(&backfill(&[10])).await.unwrap();

    assert_eq!(summary.total_messages(), 0);
    assert_eq!(summary.reports[0].status, Status::Skip403);
    assert_eq!(h.db.message_count(Some(10)).unwrap(), 0);
    assert_eq!(h.source.call_count(), 1);
    let channels = h.db.list_channels(&ChannelFilter::default().with_ids([10])).unwrap();
    assert!(!channels[0].is_active);
    assert_eq!(h.statuses(), vec!["skip_403"]);
}

#[tokio::test]
async fn test_backfill_not_found_is_terminal() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.source.fail(10, [SourceError::NotFound]);

    let summary = h.indexer.run(&backfill(&[10])).await.unwrap();

    assert_eq!(summary.reports[0].status, Status::Skip404);
    assert_eq!(h.statuses(), vec!["skip_404"]);
}

#[tokio::test]
async fn test_backfill_gives_up_after_retries() {
    let settings = IndexerSettings {
        page_size: 2,
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add((1..=6).map(|id| msg(10, id)));
    // First page succeeds, then six failures in a row
    h.source.script_page(10, vec![msg(10, 6), msg(10, 5)]);

    let channel = channel(10, "GUILD_TEXT");
    let first = h.indexer.index_backfill(&channel, None, Some(2)).await;
    assert_eq!(first.count, 2);
    assert!(matches!(first.stop, BackfillStop::Limit));

    h.source.fail(10, (0..6).map(|i| SourceError::Transient(format!("boom {i}"))));
    let outcome = h.indexer.index_backfill(&channel, None, None).await;

    assert_eq!(outcome.count, 0);
    assert!(matches!(
        outcome.stop,
        BackfillStop::Failed(IndexError::RetriesExhausted { attempts: 6, .. })
    ));
    let state = h.state(10);
    assert_eq!(state.backfill_before_id, Some(5));
    assert_eq!(state.backfill_oldest_at, Some(at(5)));

    let statuses = h.statuses();
    assert_eq!(statuses.iter().filter(|s| *s == "retry_other").count(), 5);
}

#[tokio::test]
async fn test_backfill_error_reports_completed_pages() {
    let settings = IndexerSettings {
        page_size: 2,
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add((1..=6).map(|id| msg(10, id)));
    // One good page, then six transient failures in a row
    h.source.pass(10, 1);
    h.source.fail(10, (0..6).map(|_| SourceError::Transient("gateway".to_string())));

    let summary = h.indexer.run(&backfill(&[10])).await.unwrap();

    assert_eq!(summary.reports[0].status, Status::Error);
    assert_eq!(summary.reports[0].count, 2);
    assert_eq!(h.db.message_ids(10).unwrap(), vec![5, 6]);
    let state = h.state(10);
    assert_eq!(state.backfill_before_id, Some(5));
    assert!(state.last_indexed_at.is_some());
    assert_eq!(h.source.call_count(), 7);

    let statuses = h.statuses();
    assert_eq!(statuses.first().map(String::as_str), Some("ok"));
    assert_eq!(statuses.last().map(String::as_str), Some("error"));
    assert_eq!(h.events().last().unwrap()["total_so_far"], 2);
}

#[tokio::test]
async fn test_backfill_resumes_to_same_result() {
    let settings = IndexerSettings {
        page_size: 3,
        max_retries: 0,
        ..fast_settings()
    };

    let full = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings.clone());
    full.source.add((1..=10).map(|id| msg(10, id)));
    let summary = full.indexer.run(&backfill(&[10])).await.unwrap();
    assert_eq!(summary.reports[0].status, Status::Done);
    assert_eq!(summary.total_messages(), 10);

    let resumed = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    resumed.source.add((1..=10).map(|id| msg(10, id)));
    let channel = channel(10, "GUILD_TEXT");

    // Interrupted after two pages
    let first = resumed.indexer.index_backfill(&channel, None, Some(6)).await;
    assert_eq!(first.count, 6);
    assert_eq!(resumed.state(10).backfill_before_id, Some(5));

    let calls_before = resumed.source.call_count();
    let second = resumed.indexer.index_backfill(&channel, None, None).await;
    assert_eq!(second.count, 4);
    assert!(matches!(second.stop, BackfillStop::Done));

    // Resume started at the saved cursor, not from the newest page
    let calls = resumed.source.calls.lock().unwrap().clone();
    assert_eq!(calls[calls_before], (10, Some(5)));

    assert_eq!(resumed.db.message_ids(10).unwrap(), full.db.message_ids(10).unwrap());
    assert_eq!(resumed.state(10).backfill_before_id, Some(1));
}

#[tokio::test]
async fn test_backfill_restart_clears_cursor() {
    let settings = IndexerSettings {
        page_size: 5,
        ..fast_settings()
    };
    let h = Harness::with_settings(&[channel(10, "GUILD_TEXT")], settings);
    h.source.add((1..=5).map(|id| msg(10, id)));

    h.indexer.run(&backfill(&[10])).await.unwrap();
    assert_eq!(h.state(10).backfill_before_id, Some(1));

    // Without restart the walk is already at the start
    let again = h.indexer.run(&backfill(&[10])).await.unwrap();
    assert_eq!(again.total_messages(), 0);

    let restart = IndexRequest {
        restart: true,
        ..backfill(&[10])
    };
    let redone = h.indexer.run(&restart).await.unwrap();
    assert_eq!(redone.total_messages(), 5);
    assert_eq!(h.db.message_count(Some(10)).unwrap(), 5);
}

#[tokio::test]
async fn test_backfill_rejects_non_decreasing_cursor() {
    let h = Harness::new(&[channel(10, "GUILD_TEXT")]);
    h.db.upsert_channel_state(
        10,
        &ChannelStateUpdate {
            backfill_before_id: Some(5),
            ..Default::default()
        },
    )
    .unwrap();
    h.source.script_page(10, vec![msg(10, 7), msg(10, 6)]);

    let outcome = h.indexer.index_backfill(&channel(10, "GUILD_TEXT"), None, None).await;

    assert_eq!(outcome.count, 0);
    assert!(matches!(
        outcome.stop,
        BackfillStop::Failed(IndexError::CursorRegression { before_id: 5 })
    ));
    assert_eq!(h.state(10).backfill_before_id, Some(5));
}
