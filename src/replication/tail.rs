//! Live tailing of remote inserts after backfill has caught up.

use crate::core::{Record, Result};
use crate::replication::source::{RemoteEntry, RemoteSource, Subscription};
use crate::replication::writer::{AppendOutcome, RecordWriter, WriteOrigin};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailReport {
    pub received: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

pub struct TailSubscriber {
    writer: Arc<RecordWriter>,
}

impl TailSubscriber {
    pub fn new(writer: Arc<RecordWriter>) -> Self {
        Self { writer }
    }

    /// Subscribes strictly after the writer's current cursor.
    ///
    /// This is also the resumption point after a transport drop: the cursor
    /// only reflects completed appends, so nothing is skipped.
    pub async fn subscribe(&self, source: &dyn RemoteSource) -> Result<Subscription> {
        let cursor = self.writer.cursor().await;
        info!(cursor = ?cursor, "subscribing to remote inserts");
        source.subscribe_after(cursor).await
    }

    /// Applies events one at a time, in arrival order, until the transport
    /// closes (`Ok`) or fails (`Err`).
    pub async fn follow(&self, subscription: &mut Subscription) -> Result<TailReport> {
        let mut report = TailReport::default();
        while let Some(event) = subscription.next().await {
            self.apply(event?, &mut report).await?;
        }
        Ok(report)
    }

    /// Applies at most `count` events, returning early if the transport closes.
    pub async fn follow_n(&self, subscription: &mut Subscription, count: usize) -> Result<TailReport> {
        let mut report = TailReport::default();
        while report.received < count {
            let Some(event) = subscription.next().await else {
                break;
            };
            self.apply(event?, &mut report).await?;
        }
        Ok(report)
    }

    async fn apply(&self, entry: RemoteEntry, report: &mut TailReport) -> Result<()> {
        report.received += 1;

        let Some(record) = Record::from_remote(&entry.key, &entry.value) else {
            debug!(key = %entry.key, "dropping incomplete remote record");
            report.invalid += 1;
            return Ok(());
        };

        match self.writer.append_if_new(&record, WriteOrigin::Tail).await? {
            AppendOutcome::Appended => {
                report.appended += 1;
                info!(key = %record.id, "stored new record");
            }
            AppendOutcome::Duplicate => report.duplicates += 1,
            AppendOutcome::Invalid => report.invalid += 1,
        }
        Ok(())
    }
}
