//! Cursor-driven historical catch-up.
//!
//! Pages through the remote source in key order, strictly after the saved
//! cursor, until a short or empty page signals the end of remote data.

use crate::core::{MirrorError, Record, Result};
use crate::replication::source::{RemoteSource, key_is_after};
use crate::replication::writer::{AppendOutcome, RecordWriter, WriteOrigin};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub batch_size: usize,
    /// Stop once this many records have been appended in one run.
    pub max_records: Option<usize>,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_records: None,
        }
    }
}

impl BackfillOptions {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillStop {
    /// The remote source returned an empty or short page.
    #[default]
    Exhausted,
    /// `max_records` was reached, possibly in the middle of a page.
    LimitReached,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub pages: usize,
    pub fetched: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub cursor: Option<String>,
    pub stop: BackfillStop,
}

/// Runs one backfill pass.
///
/// A fetch error aborts the pass. Everything applied before it is already in
/// the log and reflected by the cursor, so the next pass resumes there.
pub async fn run_backfill(
    source: &dyn RemoteSource,
    writer: &RecordWriter,
    options: &BackfillOptions,
) -> Result<BackfillReport> {
    let batch_size = options.batch_size.max(1);
    let mut report = BackfillReport {
        cursor: writer.cursor().await,
        ..BackfillReport::default()
    };
    info!(cursor = ?report.cursor, batch_size, "starting backfill");

    loop {
        if options.max_records.is_some_and(|max| report.appended >= max) {
            report.stop = BackfillStop::LimitReached;
            break;
        }
        let page = source.page_after(report.cursor.as_deref(), batch_size).await?;
        if page.is_empty() {
            break;
        }
        report.pages += 1;
        report.fetched += page.len();
        let page_len = page.len();
        let page_start = report.cursor.clone();

        for entry in page {
            if let Some(max) = options.max_records
                && report.appended >= max
            {
                report.stop = BackfillStop::LimitReached;
                break;
            }
            if !key_is_after(&entry.key, report.cursor.as_deref()) {
                // The source replayed a key at or before the cursor.
                report.duplicates += 1;
                continue;
            }

            match Record::from_remote(&entry.key, &entry.value) {
                Some(record) => match writer.append_if_new(&record, WriteOrigin::Backfill).await? {
                    AppendOutcome::Appended => report.appended += 1,
                    AppendOutcome::Duplicate => report.duplicates += 1,
                    AppendOutcome::Invalid => report.invalid += 1,
                },
                None => report.invalid += 1,
            }
            report.cursor = Some(entry.key);
        }

        if report.cursor == page_start {
            if report.stop == BackfillStop::LimitReached {
                break;
            }
            return Err(MirrorError::Remote(format!(
                "source returned a page that does not advance past {:?}",
                page_start
            )));
        }
        if let Some(cursor) = report.cursor.as_deref() {
            writer.advance_cursor(cursor).await?;
        }
        debug!(page = report.pages, records = page_len, cursor = ?report.cursor, "applied backfill page");

        if report.stop == BackfillStop::LimitReached || page_len < batch_size {
            break;
        }
    }

    info!(
        pages = report.pages,
        appended = report.appended,
        duplicates = report.duplicates,
        invalid = report.invalid,
        cursor = ?report.cursor,
        "backfill complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::memory::MemorySource;
    use crate::storage::{AppendLog, CursorStore};
    use crate::replication::writer::WriterOptions;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::fs;

    async fn writer_in(dir: &TempDir) -> RecordWriter {
        RecordWriter::open(
            AppendLog::new(dir.path().join("cache.jsonl")),
            CursorStore::new(dir.path().join("last-key.txt")),
            WriterOptions::default(),
        )
        .await
        .unwrap()
    }

    fn reading(value: f64) -> serde_json::Value {
        json!({"sensor1": value, "fechaa": "2024-03-05T10:00:00Z"})
    }

    #[tokio::test]
    async fn short_page_ends_backfill() {
        let dir = TempDir::new().unwrap();
        let writer = writer_in(&dir).await;
        let source = MemorySource::with_entries([
            ("k1", reading(1.0)),
            ("k2", reading(2.0)),
            ("k3", reading(3.0)),
        ]);

        let report = run_backfill(&source, &writer, &BackfillOptions::default().batch_size(2))
            .await
            .unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.appended, 3);
        assert_eq!(report.cursor.as_deref(), Some("k3"));
        assert_eq!(report.stop, BackfillStop::Exhausted);
        assert_eq!(
            source.page_requests(),
            vec![(None, 2), (Some("k2".to_string()), 2)]
        );
        let saved = fs::read_to_string(dir.path().join("last-key.txt")).await.unwrap();
        assert_eq!(saved, "k3");
    }

    #[tokio::test]
    async fn invalid_records_advance_the_cursor_without_writing() {
        let dir = TempDir::new().unwrap();
        let writer = writer_in(&dir).await;
        let source = MemorySource::with_entries([
            ("k1", reading(1.0)),
            ("k2", json!({"sensor1": 2.0})),
            ("k3", json!(null)),
        ]);

        let report = run_backfill(&source, &writer, &BackfillOptions::default())
            .await
            .unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(report.invalid, 2);
        assert_eq!(writer.cursor().await.as_deref(), Some("k3"));
        let contents = fs::read_to_string(writer.log().path()).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn max_records_stops_mid_page() {
        let dir = TempDir::new().unwrap();
        let writer = writer_in(&dir).await;
        let source = MemorySource::with_entries((1..=5).map(|i| (format!("k{i}"), reading(i as f64))));

        let report = run_backfill(
            &source,
            &writer,
            &BackfillOptions::default().batch_size(10).max_records(3),
        )
        .await
        .unwrap();

        assert_eq!(report.appended, 3);
        assert_eq!(report.stop, BackfillStop::LimitReached);
        assert_eq!(writer.cursor().await.as_deref(), Some("k3"));
    }

    #[tokio::test]
    async fn fetch_error_keeps_applied_pages() {
        let dir = TempDir::new().unwrap();
        let writer = writer_in(&dir).await;
        let source = MemorySource::with_entries((1..=4).map(|i| (format!("k{i}"), reading(i as f64))));

        let options = BackfillOptions::default().batch_size(2);
        let report = run_backfill(&source, &writer, &options.clone().max_records(2))
            .await
            .unwrap();
        assert_eq!(report.cursor.as_deref(), Some("k2"));

        source.fail_next_pages(1);
        let err = run_backfill(&source, &writer, &options).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(writer.cursor().await.as_deref(), Some("k2"));

        let report = run_backfill(&source, &writer, &options).await.unwrap();
        assert_eq!(report.appended, 2);
        assert_eq!(report.cursor.as_deref(), Some("k4"));
    }
}
