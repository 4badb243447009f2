use crate::query::{DEFAULT_LATEST_LIMIT, MAX_LATEST_LIMIT, QueryOptions};
use crate::replication::{BackfillOptions, FirebaseOptions, ReplicatorOptions, WriterOptions};
use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, sourced from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub host: String,
    pub port: u16,

    /// Firebase Realtime Database root URL. Required.
    pub database_url: String,
    /// Collection path mirrored under the database root.
    pub source_path: String,
    pub source_auth: Option<String>,
    pub remote_timeout: Duration,
    pub poll_interval: Duration,

    pub data_dir: PathBuf,
    pub cache_file: String,
    pub cursor_file: String,
    pub static_dir: Option<PathBuf>,

    pub batch_size: usize,
    pub max_backfill_records: Option<usize>,
    pub retry_interval: Duration,

    pub tail_window_lines: usize,
    pub tail_window_bytes: u64,
    pub dedup_max_entries: usize,
    pub dedup_keep_newest: usize,

    pub latest_default_limit: usize,
    pub latest_max_limit: usize,
}

impl MirrorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("FIREBASE_DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("FIREBASE_DATABASE_URL must be set"))?;

        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_url,
            source_path: lookup("FIREBASE_PATH").unwrap_or_else(|| "payload".to_string()),
            source_auth: lookup("FIREBASE_AUTH").filter(|auth| !auth.is_empty()),
            remote_timeout: Duration::from_secs(parse_or(&lookup, "REMOTE_TIMEOUT_SECS", 30)?),
            poll_interval: Duration::from_millis(parse_or(&lookup, "TAIL_POLL_INTERVAL_MS", 2000)?),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            cache_file: lookup("CACHE_FILE").unwrap_or_else(|| "firebase-cache.jsonl".to_string()),
            cursor_file: lookup("LAST_KEY_FILE").unwrap_or_else(|| "last-key.txt".to_string()),
            static_dir: lookup("STATIC_DIR").map(PathBuf::from),
            batch_size: parse_or(&lookup, "BATCH_SIZE", 1000)?,
            max_backfill_records: parse_opt(&lookup, "MAX_BACKFILL_RECORDS")?,
            retry_interval: Duration::from_secs(parse_or(&lookup, "RETRY_INTERVAL_SECS", 15)?),
            tail_window_lines: parse_or(&lookup, "TAIL_WINDOW_LINES", 10_000)?,
            tail_window_bytes: parse_or(&lookup, "TAIL_WINDOW_BYTES", 1024 * 1024)?,
            dedup_max_entries: parse_or(&lookup, "DEDUP_MAX_ENTRIES", 50_000)?,
            dedup_keep_newest: parse_or(&lookup, "DEDUP_KEEP_NEWEST", 10_000)?,
            latest_default_limit: parse_or(&lookup, "LATEST_DEFAULT_LIMIT", DEFAULT_LATEST_LIMIT)?,
            latest_max_limit: parse_or(&lookup, "LATEST_MAX_LIMIT", MAX_LATEST_LIMIT)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("BATCH_SIZE must be at least 1"));
        }
        if self.dedup_keep_newest > self.dedup_max_entries {
            return Err(anyhow!(
                "DEDUP_KEEP_NEWEST ({}) must not exceed DEDUP_MAX_ENTRIES ({})",
                self.dedup_keep_newest,
                self.dedup_max_entries
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.data_dir.join(&self.cursor_file)
    }

    pub fn firebase_options(&self) -> FirebaseOptions {
        let options = FirebaseOptions::new(&self.database_url, &self.source_path)
            .request_timeout(self.remote_timeout)
            .poll_interval(self.poll_interval)
            .poll_batch_size(self.batch_size);
        match &self.source_auth {
            Some(auth) => options.auth(auth),
            None => options,
        }
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions::default()
            .tail_lines(self.tail_window_lines)
            .tail_bytes(self.tail_window_bytes)
            .dedup_trim(self.dedup_max_entries, self.dedup_keep_newest)
    }

    pub fn replicator_options(&self) -> ReplicatorOptions {
        let mut backfill = BackfillOptions::default().batch_size(self.batch_size);
        if let Some(max) = self.max_backfill_records {
            backfill = backfill.max_records(max);
        }
        ReplicatorOptions {
            backfill,
            retry_interval: self.retry_interval,
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            default_limit: self.latest_default_limit.min(self.latest_max_limit),
            max_limit: self.latest_max_limit,
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}

fn parse_opt<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        _ => Ok(None),
    }
}
