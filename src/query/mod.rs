//! Read-only queries over the record log.
//!
//! Queries never take the writer lock. They read only newline-terminated
//! lines, skip lines that fail to parse, and degrade to empty results when
//! the log itself cannot be read.

use crate::core::{Record, Result};
use crate::storage::AppendLog;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::warn;

pub const DEFAULT_LATEST_LIMIT: usize = 100;
pub const MAX_LATEST_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LATEST_LIMIT,
            max_limit: MAX_LATEST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_record: Option<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct QueryService {
    log: AppendLog,
    options: QueryOptions,
}

impl QueryService {
    pub fn new(log: AppendLog) -> Self {
        Self::with_options(log, QueryOptions::default())
    }

    pub fn with_options(log: AppendLog, options: QueryOptions) -> Self {
        Self { log, options }
    }

    /// Clamps a requested page size to the configured bounds.
    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.options.default_limit)
            .min(self.options.max_limit)
    }

    /// The newest `limit` records, skipping the newest `offset`, oldest first.
    pub async fn latest(&self, limit: Option<usize>, offset: usize) -> Vec<Record> {
        let limit = self.effective_limit(limit);
        self.try_latest(limit, offset)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "latest query failed");
                Vec::new()
            })
    }

    async fn try_latest(&self, limit: usize, offset: usize) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(records);
        }

        let mut skipped = 0;
        let mut malformed = 0;
        let mut lines = self.log.reverse_lines().await?;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let Some(record) = Record::from_line(&line) else {
                malformed += 1;
                continue;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            records.push(record);
            if records.len() == limit {
                break;
            }
        }

        if malformed > 0 {
            warn!(malformed, "skipped malformed lines in latest query");
        }
        records.reverse();
        Ok(records)
    }

    /// The record on the final line of the log.
    ///
    /// `None` when the log is empty, unreadable, or its final line does not
    /// parse.
    pub async fn last_record(&self) -> Option<Record> {
        match self.log.last_line().await {
            Ok(line) => {
                let line = line?;
                let record = Record::from_line(&line);
                if record.is_none() {
                    warn!("final log line is malformed");
                }
                record
            }
            Err(err) => {
                warn!(error = %err, "last record query failed");
                None
            }
        }
    }

    /// Records whose timestamp falls on `date`, ascending by timestamp.
    pub async fn day(&self, date: NaiveDate) -> Vec<Record> {
        self.try_day(date).await.unwrap_or_else(|err| {
            warn!(error = %err, %date, "day query failed");
            Vec::new()
        })
    }

    async fn try_day(&self, date: NaiveDate) -> Result<Vec<Record>> {
        // Every accepted timestamp starts with the zero-padded date, so lines
        // without it cannot match.
        let needle = date.format("%Y-%m-%d").to_string();
        let mut matches: Vec<(NaiveDateTime, Record)> = Vec::new();

        let mut lines = self.log.forward_lines().await?;
        while let Some(line) = lines.next_line().await? {
            if !line.contains(&needle) {
                continue;
            }
            let Some(record) = Record::from_line(&line) else {
                continue;
            };
            if let Some(ts) = record.parsed_timestamp()
                && ts.date() == date
            {
                matches.push((ts, record));
            }
        }

        // Stable: records sharing a timestamp keep log order.
        matches.sort_by_key(|(ts, _)| *ts);
        Ok(matches.into_iter().map(|(_, record)| record).collect())
    }

    /// Count, timestamp bounds and newest record over the whole log.
    pub async fn summary(&self) -> Summary {
        self.try_summary().await.unwrap_or_else(|err| {
            warn!(error = %err, "summary query failed");
            Summary::default()
        })
    }

    async fn try_summary(&self) -> Result<Summary> {
        let mut summary = Summary::default();
        let mut first: Option<NaiveDateTime> = None;
        let mut last: Option<NaiveDateTime> = None;

        let mut lines = self.log.forward_lines().await?;
        while let Some(line) = lines.next_line().await? {
            let Some(record) = Record::from_line(&line) else {
                continue;
            };
            summary.total += 1;

            if let Some(ts) = record.parsed_timestamp() {
                if first.is_none_or(|first| ts < first) {
                    first = Some(ts);
                    summary.first_date = Some(record.timestamp.clone());
                }
                if last.is_none_or(|last| ts > last) {
                    last = Some(ts);
                    summary.last_date = Some(record.timestamp.clone());
                }
            }
            summary.last_record = Some(record);
        }

        Ok(summary)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
