//! Deferred deletion of uploaded import files.
//!
//! Uploading a file to a job registers a cleanup request. A [`FileCleaner`]
//! later checks the job and deletes the file once the job is done, keeping
//! files of failed jobs for a retention period. Requests survive restarts and
//! a [`FileLock`] keeps cleaners of different processes from racing on one
//! registry.

mod cleaner;
mod lock;
mod registry;

pub use cleaner::{
    CleanerConfig, CleanupOutcome, CleanupState, DEFAULT_RETENTION_DAYS, FileCleaner, SweepReport,
};
pub use lock::{FileLock, LOCK_FILE_NAME};
pub use registry::{CleanupRegistry, CleanupRequest, RECORD_EXTENSION};
