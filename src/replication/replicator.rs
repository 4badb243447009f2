use crate::core::Result;
use crate::replication::backfill::{BackfillOptions, BackfillReport, run_backfill};
use crate::replication::source::RemoteSource;
use crate::replication::tail::TailSubscriber;
use crate::replication::writer::RecordWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReplicatorOptions {
    pub backfill: BackfillOptions,
    /// Delay before retrying a failed backfill or resubscribing.
    pub retry_interval: Duration,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self {
            backfill: BackfillOptions::default(),
            retry_interval: Duration::from_secs(15),
        }
    }
}

/// Drives the single writer stream: backfill to completion, then tail.
///
/// Backfill and tailing never overlap, so the cursor only ever moves forward
/// from one place at a time.
pub struct Replicator {
    source: Arc<dyn RemoteSource>,
    writer: Arc<RecordWriter>,
    options: ReplicatorOptions,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        writer: Arc<RecordWriter>,
        options: ReplicatorOptions,
    ) -> Self {
        Self {
            source,
            writer,
            options,
        }
    }

    pub fn writer(&self) -> &Arc<RecordWriter> {
        &self.writer
    }

    /// One backfill pass without retries.
    pub async fn sync_once(&self) -> Result<BackfillReport> {
        run_backfill(self.source.as_ref(), &self.writer, &self.options.backfill).await
    }

    /// Backfills until a pass succeeds, retrying after each failure.
    pub async fn backfill_until_done(&self) -> BackfillReport {
        loop {
            match self.sync_once().await {
                Ok(report) => return report,
                Err(err) => {
                    warn!(error = %err, retry_in = ?self.options.retry_interval, "backfill failed, will resume from cursor");
                    sleep(self.options.retry_interval).await;
                }
            }
        }
    }

    /// Runs forever: backfill, then tail with resubscription from the last
    /// saved cursor whenever the subscription ends or fails.
    pub async fn run(&self) {
        let report = self.backfill_until_done().await;
        info!(appended = report.appended, cursor = ?report.cursor, "initial download complete, switching to live tail");

        let tail = TailSubscriber::new(self.writer.clone());
        loop {
            match tail.subscribe(self.source.as_ref()).await {
                Ok(mut subscription) => match tail.follow(&mut subscription).await {
                    Ok(report) => {
                        warn!(received = report.received, "subscription closed, resubscribing")
                    }
                    Err(err) if err.is_transient() => {
                        warn!(error = %err, "subscription failed, resubscribing")
                    }
                    Err(err) => error!(error = %err, "tail write failed, resubscribing"),
                },
                Err(err) => warn!(error = %err, "failed to subscribe"),
            }
            sleep(self.options.retry_interval).await;
        }
    }
}
