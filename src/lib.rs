// ============================================================================
// feedmirror Library
// ============================================================================

//! Local mirror of a Firebase Realtime Database collection.
//!
//! Remote records are replicated into an append-only JSON Lines log (initial
//! backfill, then a live tail) and served back through a small HTTP API.

pub mod config;
pub mod core;
pub mod query;
pub mod replication;
pub mod storage;
pub mod web;

// Re-export main types for convenience
pub use crate::core::{MirrorError, Record, Result};
pub use config::MirrorConfig;
pub use query::{QueryService, Summary};

// Re-export replication API
pub use replication::{
    FirebaseSource, MemorySource, RecordWriter, RemoteSource, Replicator, TailSubscriber,
};
pub use storage::{AppendLog, CursorStore, DedupIndex};
pub use web::{AppState, router};
