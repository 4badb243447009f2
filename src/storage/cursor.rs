use crate::core::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Persists the last remote key that was fully replicated.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the saved cursor, or `None` when there is nothing usable.
    ///
    /// Read failures are logged and reported as "no cursor" so that the next
    /// run replicates from the beginning and relies on deduplication.
    pub async fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let key = contents.trim();
                (!key.is_empty()).then(|| key.to_string())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read cursor, starting from the beginning");
                None
            }
        }
    }

    /// Replaces the saved cursor with `key`.
    ///
    /// Written to a sibling temp file and renamed so a crash never leaves a
    /// truncated key behind.
    pub async fn save(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, key.as_bytes()).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
