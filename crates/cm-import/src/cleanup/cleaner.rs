use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lock::FileLock;
use super::registry::{CleanupRegistry, CleanupRequest};
use crate::Result;
use crate::gateway::JobGateway;

const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
const ONE_DAY_SECS: u64 = 24 * 60 * 60;

/// Days an import file of a failed job is kept.
pub const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Cleaner timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerConfig {
    /// Pause between periodic sweeps; zero disables the background worker.
    pub interval: Duration,
    /// How long files of jobs with errors are kept after their last change.
    pub error_retention: Duration,
    /// Delay before the background worker starts.
    pub initial_delay: Duration,
    /// Lock retry interval of a manual sweep.
    pub manual_retry_interval: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: ONE_HOUR,
            error_retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * ONE_DAY_SECS),
            initial_delay: Duration::from_secs(10),
            manual_retry_interval: Duration::from_secs(30),
        }
    }
}

impl CleanerConfig {
    pub fn new(interval: Duration, retention_days: u64) -> Self {
        Self {
            interval,
            error_retention: Duration::from_secs(retention_days.saturating_mul(ONE_DAY_SECS)),
            ..Default::default()
        }
    }

    /// Configuration without background worker, for one-shot cleanups.
    pub fn one_shot(retention_days: u64) -> Self {
        Self::new(Duration::ZERO, retention_days)
    }
}

/// Where a request ended up after a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupState {
    /// Job still running; checked again next sweep.
    Pending,
    /// Job failed recently; the file is kept for the retention period.
    Retained,
    /// File deleted and request dropped.
    Deleted,
    /// Job gone or file no longer part of it; request dropped, file kept.
    Orphaned,
}

impl CleanupState {
    /// Whether the request stays registered for a later sweep.
    pub fn is_pending(&self) -> bool {
        matches!(self, CleanupState::Pending | CleanupState::Retained)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub job_id: String,
    pub job_file: PathBuf,
    pub state: CleanupState,
}

/// Result of one sweep over the registry.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl SweepReport {
    pub fn count(&self, state: CleanupState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn state_of(&self, job_id: &str) -> Option<CleanupState> {
        self.outcomes
            .iter()
            .find(|o| o.job_id == job_id)
            .map(|o| o.state)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

struct CleanerInner {
    registry: CleanupRegistry,
    gateway: Arc<dyn JobGateway>,
    config: CleanerConfig,
    // one sweep at a time inside this process
    sweep_lock: tokio::sync::Mutex<()>,
}

/// Deletes uploaded import files once their jobs are done.
///
/// Files are registered with [`FileCleaner::add_file`] and checked against
/// the job status on every sweep. With a non-zero interval a background
/// worker sweeps periodically, holding the registry lock for its whole life;
/// [`FileCleaner::clean_files`] runs one sweep on demand.
pub struct FileCleaner {
    inner: Arc<CleanerInner>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileCleaner {
    /// Create a cleaner on `registry_root`.
    ///
    /// The background worker is spawned on the current tokio runtime when
    /// `config.interval` is non-zero.
    pub fn new(
        registry_root: impl Into<PathBuf>,
        gateway: Arc<dyn JobGateway>,
        config: CleanerConfig,
    ) -> Self {
        let registry = CleanupRegistry::new(registry_root);
        if let Err(e) = std::fs::create_dir_all(registry.root()) {
            warn!(root = %registry.root().display(), error = %e, "Failed to create cleanup registry");
        }

        let cleaner = Self {
            inner: Arc::new(CleanerInner {
                registry,
                gateway,
                config,
                sweep_lock: tokio::sync::Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        };

        if !cleaner.inner.config.interval.is_zero() {
            cleaner.start_worker();
        }
        cleaner
    }

    pub fn registry(&self) -> &CleanupRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.inner.config
    }

    /// Register `file_path` for deletion once `job_id` finishes.
    pub async fn add_file(&self, job_id: &str, file_path: &Path) -> Result<()> {
        self.inner.registry.add_request(job_id, file_path).await
    }

    /// Run one sweep now, waiting for the registry lock if another process
    /// holds it.
    pub async fn clean_files(&self) -> Result<SweepReport> {
        let mut lock = FileLock::in_dir(self.inner.registry.root());
        lock.acquire(self.inner.config.manual_retry_interval).await?;
        debug!("Got the lock to process files");
        let report = self.inner.sweep().await;
        lock.release();
        Ok(report)
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background worker, if any.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn start_worker(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, periodic file cleanup disabled");
            return;
        };
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let handle = runtime.spawn(async move { inner.run_periodic(cancel).await });
        *self.worker.lock() = Some(handle);
    }
}

impl Drop for FileCleaner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CleanerInner {
    async fn run_periodic(&self, cancel: CancellationToken) {
        let interval = self.config.interval;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }
        debug!("Starting file cleaner worker");

        let mut lock = FileLock::in_dir(self.registry.root());
        tokio::select! {
            _ = cancel.cancelled() => return,
            acquired = lock.acquire(interval) => {
                if let Err(e) = acquired {
                    error!(error = %e, "File cleaner could not open its lock file, stopping");
                    return;
                }
            }
        }
        debug!("File cleaner got the lock to process files");

        loop {
            let report = self.sweep().await;
            debug!(
                requests = report.outcomes.len(),
                deleted = report.count(CleanupState::Deleted),
                "Periodic sweep done, sleeping for {:?}",
                interval
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        lock.release();
        debug!("File cleaner worker stopped");
    }

    async fn sweep(&self) -> SweepReport {
        let _guard = self.sweep_lock.lock().await;
        debug!("Starting the clean up");

        let mut report = SweepReport::default();
        let requests = match self.registry.get_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(root = %self.registry.root().display(), error = %e, "Failed to list cleanup requests");
                return report;
            }
        };

        for request in requests {
            debug!(
                job_id = %request.job_id(),
                file = %request.job_file().display(),
                "Found clean request"
            );
            let state = match self.resolve(&request).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(job_id = %request.job_id(), error = %e, "Cleanup request check failed, will retry");
                    CleanupState::Pending
                }
            };
            report.outcomes.push(CleanupOutcome {
                job_id: request.job_id().to_string(),
                job_file: request.job_file().to_path_buf(),
                state,
            });
        }

        report
    }

    async fn resolve(&self, request: &CleanupRequest) -> Result<CleanupState> {
        let Some(job) = self.gateway.find_job(request.job_id()).await? else {
            info!(job_id = %request.job_id(), "Could not find job on system, canceling cleanup request");
            request.cancel().await;
            return Ok(CleanupState::Orphaned);
        };

        if !job.is_finished() {
            debug!(job_id = %job.id, status = %job.status, "Import job is not finished yet, keeping file");
            return Ok(CleanupState::Pending);
        }

        if job.has_errors() {
            match file_age(request.job_file()).await {
                Ok(age) if age < self.config.error_retention => {
                    info!(job_id = %job.id, "Not deleting file, job has failures");
                    return Ok(CleanupState::Retained);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %request.job_file().display(), "Import file already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let file_name = request
            .job_file()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if job.file_names().any(|name| name == file_name) {
            request.delete_and_cancel().await;
            Ok(CleanupState::Deleted)
        } else {
            error!(
                file = %file_name,
                job_id = %job.id,
                "File won't be deleted since it does not match any file of the job"
            );
            request.cancel().await;
            Ok(CleanupState::Orphaned)
        }
    }
}

/// Time since `path` was last modified; zero for timestamps in the future.
async fn file_age(path: &Path) -> std::io::Result<Duration> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::gateway::MockJobGateway;
    use crate::job::ImportJob;
    use serde_json::json;
    use tempfile::TempDir;

    fn finished_job(id: &str, files: &[&str], errors: bool) -> ImportJob {
        let files: Vec<_> = files
            .iter()
            .enumerate()
            .map(|(i, name)| json!({"id": i, "name": name}))
            .collect();
        let mut value = json!({"id": id, "status": "executed", "files": files});
        if errors {
            value["failureReason"] = json!("node unreachable");
        }
        ImportJob::from_value(value).unwrap()
    }

    fn cleaner(dir: &TempDir, gateway: MockJobGateway) -> FileCleaner {
        FileCleaner::new(dir.path(), Arc::new(gateway), CleanerConfig::one_shot(1))
    }

    fn import_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "create MeContext=1").unwrap();
        path
    }

    fn backdate(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn unknown_job_is_orphaned() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "a.txt");

        let mut gateway = MockJobGateway::new();
        gateway.expect_find_job().returning(|_| Ok(None));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("1", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("1"), Some(CleanupState::Orphaned));
        assert!(file.exists());
        assert!(cleaner.registry().get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn running_job_stays_pending() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "a.txt");

        let mut gateway = MockJobGateway::new();
        gateway.expect_find_job().returning(|id| {
            Ok(Some(
                ImportJob::from_value(json!({"id": id, "status": "executing"})).unwrap(),
            ))
        });

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("1", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("1"), Some(CleanupState::Pending));
        assert!(file.exists());
        assert_eq!(cleaner.registry().get_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_job_file_is_deleted_and_second_sweep_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "batch.txt");

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .times(1)
            .returning(|id| Ok(Some(finished_job(id, &["batch.txt"], false))));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("5", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("5"), Some(CleanupState::Deleted));
        assert!(!file.exists());

        let second = cleaner.clean_files().await.unwrap();
        assert!(second.is_empty());
        assert!(cleaner.registry().get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_not_in_job_is_orphaned_and_kept() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "mine.txt");

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .returning(|id| Ok(Some(finished_job(id, &["other.txt"], false))));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("5", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("5"), Some(CleanupState::Orphaned));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn failed_job_file_is_retained_until_window_elapses() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "failed.txt");
        backdate(&file, Duration::from_secs(1));

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .returning(|id| Ok(Some(finished_job(id, &["failed.txt"], true))));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("8", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("8"), Some(CleanupState::Retained));
        assert!(report.state_of("8").unwrap().is_pending());
        assert!(file.exists());

        backdate(&file, Duration::from_secs(2 * ONE_DAY_SECS));
        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("8"), Some(CleanupState::Deleted));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn one_failing_request_does_not_stop_the_sweep() {
        let dir = TempDir::new().unwrap();
        let broken = import_file(&dir, "broken.txt");
        let fine = import_file(&dir, "fine.txt");

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .withf(|id| id == "1")
            .returning(|_| Err(Error::ServiceUnavailable));
        gateway
            .expect_find_job()
            .withf(|id| id == "2")
            .returning(|id| Ok(Some(finished_job(id, &["fine.txt"], false))));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("1", &broken).await.unwrap();
        cleaner.add_file("2", &fine).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("1"), Some(CleanupState::Pending));
        assert_eq!(report.state_of("2"), Some(CleanupState::Deleted));
        assert!(broken.exists());
        assert!(!fine.exists());
    }

    #[tokio::test]
    async fn missing_file_of_failed_job_resolves_the_request() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("vanished.txt");

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .returning(|id| Ok(Some(finished_job(id, &["vanished.txt"], true))));

        let cleaner = cleaner(&dir, gateway);
        cleaner.add_file("4", &file).await.unwrap();

        let report = cleaner.clean_files().await.unwrap();
        assert_eq!(report.state_of("4"), Some(CleanupState::Deleted));
        assert!(cleaner.registry().get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_shot_cleaner_has_no_worker() {
        let dir = TempDir::new().unwrap();
        let cleaner = cleaner(&dir, MockJobGateway::new());
        assert!(!cleaner.is_worker_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_worker_sweeps_in_background() {
        let dir = TempDir::new().unwrap();
        let file = import_file(&dir, "periodic.txt");

        let mut gateway = MockJobGateway::new();
        gateway
            .expect_find_job()
            .returning(|id| Ok(Some(finished_job(id, &["periodic.txt"], false))));

        let config = CleanerConfig {
            interval: Duration::from_millis(20),
            initial_delay: Duration::from_millis(10),
            ..CleanerConfig::one_shot(1)
        };
        let cleaner = FileCleaner::new(dir.path(), Arc::new(gateway), config);
        cleaner.add_file("3", &file).await.unwrap();
        assert!(cleaner.is_worker_running());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while file.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!file.exists());

        // the worker holds the registry lock while it runs
        let mut lock = FileLock::in_dir(dir.path());
        assert!(!lock.try_acquire().unwrap());

        cleaner.shutdown();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while cleaner.is_worker_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!cleaner.is_worker_running());
        assert!(lock.try_acquire().unwrap());
    }
}
