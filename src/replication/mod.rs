//! Incremental replication from a remote ordered source into the local log.

pub mod backfill;
pub mod firebase;
pub mod memory;
pub mod replicator;
pub mod source;
pub mod tail;
pub mod writer;

pub use backfill::{BackfillOptions, BackfillReport, BackfillStop, run_backfill};
pub use firebase::{FirebaseOptions, FirebaseSource};
pub use memory::MemorySource;
pub use replicator::{Replicator, ReplicatorOptions};
pub use source::{RemoteEntry, RemoteSource, Subscription, compare_keys, key_is_after, poll_after};
pub use tail::{TailReport, TailSubscriber};
pub use writer::{AppendOutcome, RecordWriter, WriteOrigin, WriterOptions};
