use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Remote source error: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl MirrorError {
    /// Transient failures are retried by the replicator instead of stopping the process.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::SubscriptionClosed(_))
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for MirrorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
