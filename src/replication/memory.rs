use crate::core::Result;
use crate::replication::source::{
    RemoteEntry, RemoteSource, Subscription, compare_keys, key_is_after, remote_error,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

/// In-process ordered source.
///
/// Useful for tests and local runs without network access. Inserts are
/// pushed to open subscriptions immediately. Every page and subscription
/// request is recorded so callers can check where replication resumed.
pub struct MemorySource {
    entries: Mutex<HashMap<String, JsonValue>>,
    inserts: broadcast::Sender<RemoteEntry>,
    failing_pages: AtomicUsize,
    page_requests: Mutex<Vec<(Option<String>, usize)>>,
    subscribe_requests: Mutex<Vec<Option<String>>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(1024);
        Self {
            entries: Mutex::new(HashMap::new()),
            inserts,
            failing_pages: AtomicUsize::new(0),
            page_requests: Mutex::new(Vec::new()),
            subscribe_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, JsonValue)>,
        K: Into<String>,
    {
        let source = Self::new();
        for (key, value) in entries {
            source.push(key, value);
        }
        source
    }

    /// Inserts or replaces a child and notifies subscribers.
    pub fn push(&self, key: impl Into<String>, value: JsonValue) {
        let entry = RemoteEntry::new(key, value);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.key.clone(), entry.value.clone());
        }
        // No receivers simply means nobody is tailing yet.
        let _ = self.inserts.send(entry);
    }

    /// Makes the next `count` page requests fail with a remote error.
    pub fn fail_next_pages(&self, count: usize) {
        self.failing_pages.store(count, Ordering::SeqCst);
    }

    pub fn page_requests(&self) -> Vec<(Option<String>, usize)> {
        self.page_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn subscribe_requests(&self) -> Vec<Option<String>> {
        self.subscribe_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn entries_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<RemoteEntry>> {
        let entries = self.entries.lock()?;
        let mut page: Vec<RemoteEntry> = entries
            .iter()
            .filter(|(key, _)| key_is_after(key, after))
            .map(|(key, value)| RemoteEntry::new(key.clone(), value.clone()))
            .collect();
        page.sort_by(|a, b| compare_keys(&a.key, &b.key));
        page.truncate(limit);
        Ok(page)
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<RemoteEntry>> {
        self.page_requests
            .lock()?
            .push((after.map(str::to_string), limit));

        let should_fail = self
            .failing_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(remote_error("memory source", "injected page failure"));
        }

        self.entries_after(after, limit)
    }

    async fn subscribe_after(&self, after: Option<String>) -> Result<Subscription> {
        self.subscribe_requests.lock()?.push(after.clone());

        // Subscribe before snapshotting so no insert falls in between.
        let mut inserts = self.inserts.subscribe();
        let backlog = self.entries_after(after.as_deref(), usize::MAX)?;
        let (events_tx, events_rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            let mut cursor = after;
            for entry in backlog {
                cursor = Some(entry.key.clone());
                if events_tx.send(Ok(entry)).await.is_err() {
                    return;
                }
            }
            loop {
                match inserts.recv().await {
                    Ok(entry) => {
                        if !key_is_after(&entry.key, cursor.as_deref()) {
                            continue;
                        }
                        cursor = Some(entry.key.clone());
                        if events_tx.send(Ok(entry)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let _ = events_tx
                            .send(Err(remote_error(
                                "memory subscription",
                                format!("lagged by {skipped} inserts"),
                            )))
                            .await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription::from_channel(events_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pages_are_strictly_after_the_cursor() {
        let source = MemorySource::with_entries([
            ("k1", json!(1)),
            ("k2", json!(2)),
            ("k3", json!(3)),
        ]);

        let page = source.page_after(None, 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["k1", "k2"]);

        let page = source.page_after(Some("k2"), 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["k3"]);

        assert_eq!(
            source.page_requests(),
            vec![(None, 2), (Some("k2".to_string()), 2)]
        );
    }

    #[tokio::test]
    async fn integer_keys_page_in_numeric_order() {
        let source = MemorySource::with_entries((1..=12).map(|i| (i.to_string(), json!(i))));

        let page = source.page_after(Some("9"), 10).await.unwrap();
        assert_eq!(page.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["10", "11", "12"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let source = MemorySource::with_entries([("k1", json!(1))]);
        source.fail_next_pages(1);
        assert!(source.page_after(None, 10).await.is_err());
        assert_eq!(source.page_after(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscription_replays_backlog_then_live_inserts() {
        let source = MemorySource::with_entries([("k1", json!(1)), ("k2", json!(2))]);
        let mut subscription = source.subscribe_after(Some("k1".to_string())).await.unwrap();

        source.push("k3", json!(3));

        let first = subscription.next().await.unwrap().unwrap();
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(first.key, "k2");
        assert_eq!(second.key, "k3");
        assert_eq!(source.subscribe_requests(), vec![Some("k1".to_string())]);
    }
}
