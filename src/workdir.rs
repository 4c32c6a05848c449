use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, TempDir};
use tracing::{debug, info};

use crate::error::IndexerError;

// removed on drop unless retention was requested
#[derive(Debug)]
pub struct ScopedWorkdir {
    dir: Option<TempDir>,
    path: Utf8PathBuf,
    retain: bool,
}

impl ScopedWorkdir {
    pub fn acquire(prefix: &str, retain: bool) -> Result<Self, IndexerError> {
        let dir = Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        Self::from_tempdir(dir, retain)
    }

    fn from_tempdir(dir: TempDir, retain: bool) -> Result<Self, IndexerError> {
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| IndexerError::Filesystem("non-utf8 temp dir".to_string()))?;
        debug!(path = %path, retain, "acquired working directory");
        Ok(Self {
            dir: Some(dir),
            path,
            retain,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn join(&self, relative: &str) -> Utf8PathBuf {
        self.path.join(relative)
    }
}

impl Drop for ScopedWorkdir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.retain {
            let kept = dir.keep();
            info!(path = %kept.display(), "retaining working directory for inspection");
        } else if let Err(err) = dir.close() {
            debug!(path = %self.path, %err, "failed to remove working directory");
        }
    }
}
