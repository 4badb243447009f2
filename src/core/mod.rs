pub mod error;
pub mod record;

pub use error::{MirrorError, Result};
pub use record::{Record, parse_timestamp};
