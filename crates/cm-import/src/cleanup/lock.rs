//! Advisory lock serialising cleaners of different processes on one registry.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::debug;

use crate::Result;

/// Name of the lock file inside the registry directory.
pub const LOCK_FILE_NAME: &str = ".c_lock";

/// Exclusive, non-blocking `flock` style lock on a file.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Lock on the `.c_lock` file of `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOCK_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Single attempt; `Ok(false)` when another holder has the lock.
    pub fn try_acquire(&mut self) -> Result<bool> {
        if self.is_locked() {
            return Ok(true);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        // Any account running the console must be able to take the lock.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = file.set_permissions(std::fs::Permissions::from_mode(0o666)) {
                debug!(path = %self.path.display(), error = %e, "Failed to change lock file mode to 666");
            }
        }

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                self.file = Some(file);
                Ok(true)
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Lock is held elsewhere");
                Ok(false)
            }
        }
    }

    /// Retry every `retry_interval` until the lock is ours.
    pub async fn acquire(&mut self, retry_interval: Duration) -> Result<()> {
        loop {
            if self.try_acquire()? {
                return Ok(());
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Release the lock; a no-op when it is not held.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!(path = %self.path.display(), error = %e, "Failed to unlock");
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}
