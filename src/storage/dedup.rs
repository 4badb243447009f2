//! Duplicate-suppression index over recently written record ids.
//!
//! The index only remembers a bounded window of ids: it is seeded from the
//! tail of the log and trimmed by insertion order. An id that has scrolled out
//! of the window can be written again; an id inside it never is.

use crate::core::{Record, Result};
use crate::storage::log::AppendLog;
use lru::LruCache;
use tracing::{info, warn};

/// Outcome of seeding the index from the log tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub lines_scanned: usize,
    pub indexed: usize,
    pub malformed: usize,
    pub bytes_read: u64,
    /// Id of the newest valid line in the window.
    pub last_id: Option<String>,
}

pub struct DedupIndex {
    // Recency is insertion order: `contains` never promotes an entry.
    ids: LruCache<String, ()>,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupIndex {
    pub fn new() -> Self {
        Self {
            ids: LruCache::unbounded(),
        }
    }

    /// Seeds the index from at most `tail_lines` trailing lines of `log`,
    /// reading no more than `max_bytes` from the end of the file.
    pub async fn rebuild(
        &mut self,
        log: &AppendLog,
        tail_lines: usize,
        max_bytes: u64,
    ) -> Result<RebuildReport> {
        let window = log.read_tail(max_bytes, tail_lines).await?;
        let mut report = RebuildReport {
            bytes_read: window.bytes_read,
            ..RebuildReport::default()
        };

        for line in &window.lines {
            if line.trim().is_empty() {
                continue;
            }
            report.lines_scanned += 1;
            match Record::from_line(line) {
                Some(record) => {
                    if self.insert(&record.id) {
                        report.indexed += 1;
                    }
                    report.last_id = Some(record.id);
                }
                None => report.malformed += 1,
            }
        }

        if report.malformed > 0 {
            warn!(malformed = report.malformed, "skipped malformed lines while rebuilding dedup index");
        }
        info!(
            indexed = report.indexed,
            bytes_read = report.bytes_read,
            "loaded recent ids from log tail"
        );
        Ok(report)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Registers `id`; returns `false` if it was already known.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.put(id.to_string(), ());
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// When the index holds more than `max_size` ids, evicts the oldest
    /// inserted until only `keep_newest` remain. Returns the number evicted.
    pub fn trim(&mut self, max_size: usize, keep_newest: usize) -> usize {
        if self.ids.len() <= max_size {
            return 0;
        }
        let mut evicted = 0;
        while self.ids.len() > keep_newest {
            if self.ids.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}
