pub mod cursor;
pub mod dedup;
pub mod log;

pub use cursor::CursorStore;
pub use dedup::{DedupIndex, RebuildReport};
pub use log::{AppendLog, ForwardLines, ReverseLines, TailWindow};
