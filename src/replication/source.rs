//! The remote ordered source consumed by backfill and live tailing.

use crate::core::{MirrorError, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// One child of the remote collection: its key and raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub key: String,
    pub value: JsonValue,
}

impl RemoteEntry {
    pub fn new(key: impl Into<String>, value: JsonValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Orders keys the way `orderBy="$key"` does: keys that are canonical
/// 32-bit integers sort first, numerically, then all other keys sort
/// lexicographically.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (integer_key(a), integer_key(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Whether `key` sorts strictly after `cursor`. Everything is after `None`.
pub fn key_is_after(key: &str, cursor: Option<&str>) -> bool {
    cursor.is_none_or(|cursor| compare_keys(key, cursor) == Ordering::Greater)
}

// "007" and "+7" are string keys.
fn integer_key(key: &str) -> Option<i32> {
    let n = key.parse::<i32>().ok()?;
    (n.to_string() == key).then_some(n)
}

/// A remote collection whose children are totally ordered by
/// [`compare_keys`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Returns up to `limit` entries in ascending key order whose keys are
    /// strictly greater than `after` (or from the first key when `None`).
    async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<RemoteEntry>>;

    /// Opens a subscription yielding entries inserted with keys strictly
    /// greater than `after`, in key order.
    async fn subscribe_after(&self, after: Option<String>) -> Result<Subscription>;
}

/// Handle over a stream of insert events.
///
/// Dropping the handle cancels the background producer, if any.
pub struct Subscription {
    events: mpsc::Receiver<Result<RemoteEntry>>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps a channel fed by something else (push-style transports).
    pub fn from_channel(events: mpsc::Receiver<Result<RemoteEntry>>) -> Self {
        Self {
            events,
            stop_tx: None,
            join_handle: None,
        }
    }

    fn with_worker(
        events: mpsc::Receiver<Result<RemoteEntry>>,
        stop_tx: oneshot::Sender<()>,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Next insert event; `None` once the transport has closed.
    pub async fn next(&mut self) -> Option<Result<RemoteEntry>> {
        self.events.recv().await
    }

    /// Stops the producer and waits for it to finish.
    pub async fn cancel(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.events.close();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Emulates a push subscription on top of `page_after`.
///
/// Keeps its own cursor, drains full pages back to back and waits
/// `interval` once it has caught up. A fetch error is delivered as the last
/// event; the consumer is expected to resubscribe from its saved cursor.
pub fn poll_after<S>(
    source: Arc<S>,
    after: Option<String>,
    interval: Duration,
    batch_size: usize,
) -> Subscription
where
    S: RemoteSource + ?Sized + 'static,
{
    let batch_size = batch_size.max(1);
    let (events_tx, events_rx) = mpsc::channel(batch_size);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        let mut cursor = after;
        loop {
            let page = tokio::select! {
                _ = &mut stop_rx => break,
                page = source.page_after(cursor.as_deref(), batch_size) => page,
            };

            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    let _ = events_tx.send(Err(err)).await;
                    break;
                }
            };

            let caught_up = page.len() < batch_size;
            for entry in page {
                if !key_is_after(&entry.key, cursor.as_deref()) {
                    continue;
                }
                cursor = Some(entry.key.clone());
                if events_tx.send(Ok(entry)).await.is_err() {
                    return;
                }
            }

            if caught_up {
                debug!(cursor = ?cursor, "poll caught up, waiting for new entries");
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = sleep(interval) => {}
                }
            }
        }
    });

    Subscription::with_worker(events_rx, stop_tx, join_handle)
}

pub(crate) fn remote_error(context: &str, err: impl std::fmt::Display) -> MirrorError {
    MirrorError::Remote(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_sort_numerically_before_strings() {
        let mut keys = vec!["-Nk1", "10", "9", "abc", "007", "-3", "2"];
        keys.sort_by(|a, b| compare_keys(a, b));
        assert_eq!(keys, ["-3", "2", "9", "10", "-Nk1", "007", "abc"]);
    }

    #[test]
    fn key_is_after_uses_key_order() {
        assert!(key_is_after("10", Some("9")));
        assert!(!key_is_after("9", Some("10")));
        assert!(!key_is_after("9", Some("9")));
        assert!(key_is_after("-Nk1", Some("99999")));
        assert!(key_is_after("anything", None));
    }
}
