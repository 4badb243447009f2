//! Firebase Realtime Database over its REST interface.
//!
//! Pages are requested with `orderBy="$key"`, `startAt` and `limitToFirst`.
//! The REST interface has no exclusive lower bound, so a page after a cursor
//! asks for one extra child and drops the cursor key itself. Live tailing
//! polls the same query; see [`poll_after`].

use crate::core::{MirrorError, Result};
use crate::replication::source::{
    RemoteEntry, RemoteSource, Subscription, compare_keys, key_is_after, poll_after, remote_error,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FirebaseOptions {
    pub database_url: String,
    /// Collection path under the database root, e.g. `payload`.
    pub path: String,
    /// Database secret or ID token passed as `auth`.
    pub auth: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_batch_size: usize,
}

impl FirebaseOptions {
    pub fn new(database_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            path: path.into(),
            auth: None,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            poll_batch_size: 1000,
        }
    }

    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_batch_size(mut self, batch_size: usize) -> Self {
        self.poll_batch_size = batch_size.max(1);
        self
    }
}

#[derive(Clone)]
pub struct FirebaseSource {
    client: reqwest::Client,
    options: FirebaseOptions,
}

impl FirebaseSource {
    pub fn new(options: FirebaseOptions) -> Result<Self> {
        if !options.database_url.starts_with("http://") && !options.database_url.starts_with("https://") {
            return Err(MirrorError::Config(format!(
                "database url must be http(s), got '{}'",
                options.database_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| MirrorError::Config(format!("build http client: {err}")))?;
        Ok(Self { client, options })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}.json",
            self.options.database_url.trim_end_matches('/'),
            self.options.path.trim_matches('/')
        )
    }

    fn page_query(&self, after: Option<&str>, limit: usize) -> Result<Vec<(&'static str, String)>> {
        let fetch = if after.is_some() { limit + 1 } else { limit };
        let mut query = vec![
            ("orderBy", "\"$key\"".to_string()),
            ("limitToFirst", fetch.to_string()),
        ];
        if let Some(after) = after {
            query.push(("startAt", serde_json::to_string(after)?));
        }
        if let Some(auth) = &self.options.auth {
            query.push(("auth", auth.clone()));
        }
        Ok(query)
    }
}

#[async_trait]
impl RemoteSource for FirebaseSource {
    async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<RemoteEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.page_query(after, limit)?;
        let response = self
            .client
            .get(self.endpoint())
            .query(&query)
            .send()
            .await
            .map_err(|err| remote_error("firebase request", err))?
            .error_for_status()
            .map_err(|err| remote_error("firebase response", err))?;

        let body: JsonValue = response
            .json()
            .await
            .map_err(|err| remote_error("firebase body", err))?;

        let page = parse_page(body, after, limit);
        debug!(after = ?after, received = page.len(), "fetched firebase page");
        Ok(page)
    }

    async fn subscribe_after(&self, after: Option<String>) -> Result<Subscription> {
        Ok(poll_after(
            Arc::new(self.clone()),
            after,
            self.options.poll_interval,
            self.options.poll_batch_size,
        ))
    }
}

/// Turns a query response into ordered entries strictly after `after`.
///
/// Firebase answers with an object keyed by child key, `null` when empty,
/// and an array when every key happens to be a small integer.
fn parse_page(body: JsonValue, after: Option<&str>, limit: usize) -> Vec<RemoteEntry> {
    let mut entries: Vec<RemoteEntry> = match body {
        JsonValue::Object(children) => children
            .into_iter()
            .map(|(key, value)| RemoteEntry::new(key, value))
            .collect(),
        JsonValue::Array(children) => children
            .into_iter()
            .enumerate()
            .filter(|(_, value)| !value.is_null())
            .map(|(idx, value)| RemoteEntry::new(idx.to_string(), value))
            .collect(),
        _ => Vec::new(),
    };

    entries.sort_by(|a, b| compare_keys(&a.key, &b.key));
    entries.retain(|entry| key_is_after(&entry.key, after));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> FirebaseSource {
        FirebaseSource::new(
            FirebaseOptions::new("https://example-default-rtdb.firebaseio.com/", "/payload")
                .auth("secret"),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_url_and_path() {
        assert_eq!(
            source().endpoint(),
            "https://example-default-rtdb.firebaseio.com/payload.json"
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = FirebaseSource::new(FirebaseOptions::new("ftp://nope", "payload")).err();
        assert!(matches!(err, Some(MirrorError::Config(_))));
    }

    #[test]
    fn page_after_cursor_requests_one_extra_child() {
        let query = source().page_query(Some("-Nk2"), 1000).unwrap();
        assert!(query.contains(&("orderBy", "\"$key\"".to_string())));
        assert!(query.contains(&("limitToFirst", "1001".to_string())));
        assert!(query.contains(&("startAt", "\"-Nk2\"".to_string())));
        assert!(query.contains(&("auth", "secret".to_string())));

        let first = source().page_query(None, 1000).unwrap();
        assert!(first.contains(&("limitToFirst", "1000".to_string())));
        assert!(!first.iter().any(|(name, _)| *name == "startAt"));
    }

    #[test]
    fn parse_page_drops_cursor_and_orders_keys() {
        let body = json!({
            "-Nk3": {"sensor1": 3, "fechaa": "2024-03-05"},
            "-Nk2": {"sensor1": 2, "fechaa": "2024-03-05"},
            "-Nk4": {"sensor1": 4, "fechaa": "2024-03-05"},
        });
        let page = parse_page(body, Some("-Nk2"), 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "-Nk3");
    }

    #[test]
    fn parse_page_orders_integer_keys_numerically() {
        let body = json!({
            "9": {"sensor1": 9, "fechaa": "2024-03-05"},
            "10": {"sensor1": 10, "fechaa": "2024-03-05"},
            "11": {"sensor1": 11, "fechaa": "2024-03-05"},
        });
        let page = parse_page(body, Some("9"), 10);
        assert_eq!(page.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["10", "11"]);
    }

    #[test]
    fn parse_page_handles_null_and_arrays() {
        assert!(parse_page(JsonValue::Null, None, 10).is_empty());

        let page = parse_page(json!([null, {"sensor1": 1}, {"sensor1": 2}]), None, 10);
        assert_eq!(page.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["1", "2"]);
    }
}
