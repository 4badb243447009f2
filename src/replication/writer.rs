//! The single write path into the log.
//!
//! Backfill and live tailing both funnel records through [`RecordWriter`],
//! which serializes the dedup check, the append and the cursor update behind
//! one lock so concurrent deliveries cannot both pass the duplicate check.

use crate::core::{Record, Result};
use crate::storage::{AppendLog, CursorStore, DedupIndex, RebuildReport};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which replication stage delivered a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Backfill,
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Number of trailing log lines used to seed the dedup index.
    pub tail_lines: usize,
    /// Upper bound on bytes read from the end of the log while seeding.
    pub tail_bytes: u64,
    /// Trim the dedup index once it holds more ids than this.
    pub dedup_max_entries: usize,
    /// Ids kept after a trim.
    pub dedup_keep_newest: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            tail_lines: 10_000,
            tail_bytes: 1024 * 1024,
            dedup_max_entries: 50_000,
            dedup_keep_newest: 10_000,
        }
    }
}

impl WriterOptions {
    pub fn tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    pub fn tail_bytes(mut self, bytes: u64) -> Self {
        self.tail_bytes = bytes;
        self
    }

    pub fn dedup_trim(mut self, max_entries: usize, keep_newest: usize) -> Self {
        self.dedup_max_entries = max_entries;
        self.dedup_keep_newest = keep_newest.min(max_entries);
        self
    }
}

struct WriterState {
    index: DedupIndex,
    cursor: Option<String>,
}

pub struct RecordWriter {
    log: AppendLog,
    cursor_store: CursorStore,
    options: WriterOptions,
    state: Mutex<WriterState>,
}

impl RecordWriter {
    /// Opens the write path: seeds the dedup index from the log tail and
    /// loads the cursor.
    ///
    /// When no cursor is saved but the log has records, the cursor is
    /// recovered from the newest line so replication does not restart from
    /// the beginning.
    pub async fn open(
        log: AppendLog,
        cursor_store: CursorStore,
        options: WriterOptions,
    ) -> Result<Self> {
        log.ensure_exists().await?;

        let mut index = DedupIndex::new();
        let report = index
            .rebuild(&log, options.tail_lines, options.tail_bytes)
            .await?;

        let cursor = match cursor_store.load().await {
            Some(cursor) => Some(cursor),
            None => Self::recover_cursor(&cursor_store, &report).await,
        };
        info!(cursor = ?cursor, dedup_ids = index.len(), "record writer ready");

        Ok(Self {
            log,
            cursor_store,
            options,
            state: Mutex::new(WriterState { index, cursor }),
        })
    }

    async fn recover_cursor(cursor_store: &CursorStore, report: &RebuildReport) -> Option<String> {
        let last_id = report.last_id.clone()?;
        match cursor_store.save(&last_id).await {
            Ok(()) => info!(cursor = %last_id, "recovered cursor from log tail"),
            Err(err) => warn!(error = %err, "failed to persist recovered cursor"),
        }
        Some(last_id)
    }

    pub fn log(&self) -> &AppendLog {
        &self.log
    }

    /// Cursor as seen by the write path: the last key saved after an append.
    pub async fn cursor(&self) -> Option<String> {
        self.state.lock().await.cursor.clone()
    }

    pub async fn dedup_len(&self) -> usize {
        self.state.lock().await.index.len()
    }

    pub async fn is_known(&self, id: &str) -> bool {
        self.state.lock().await.index.contains(id)
    }

    /// Appends `record` unless it is invalid or its id is in the dedup window.
    ///
    /// A failed append leaves the index and cursor untouched, so the record
    /// is fetched again on the next run.
    pub async fn append_if_new(&self, record: &Record, origin: WriteOrigin) -> Result<AppendOutcome> {
        if !record.is_valid() {
            debug!(id = %record.id, "dropping invalid record");
            return Ok(AppendOutcome::Invalid);
        }

        let mut state = self.state.lock().await;
        if state.index.contains(&record.id) {
            return Ok(AppendOutcome::Duplicate);
        }

        self.log.append(record).await?;
        state.index.insert(&record.id);

        self.cursor_store.save(&record.id).await?;
        state.cursor = Some(record.id.clone());
        debug!(id = %record.id, ?origin, "appended record");

        let evicted = state
            .index
            .trim(self.options.dedup_max_entries, self.options.dedup_keep_newest);
        if evicted > 0 {
            debug!(evicted, remaining = state.index.len(), "trimmed dedup index");
        }

        Ok(AppendOutcome::Appended)
    }

    /// Moves the cursor past keys that were processed without an append
    /// (invalid or duplicate records at the end of a page).
    pub async fn advance_cursor(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.cursor.as_deref() == Some(key) {
            return Ok(());
        }
        self.cursor_store.save(key).await?;
        state.cursor = Some(key.to_string());
        Ok(())
    }
}
