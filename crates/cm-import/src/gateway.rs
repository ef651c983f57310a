//! Seam between the job search / file cleanup logic and the remote job
//! collection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::ImportJob;
use crate::{Error, Result};

/// Offset based slice of the job collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// 0-based page index, page 0 holding the newest jobs.
    pub index: usize,
    pub page_size: usize,
    /// Ask the server to inline the summary and files of every job.
    pub expand: bool,
}

impl PageRequest {
    pub fn new(index: usize, page_size: usize) -> Self {
        Self {
            index,
            page_size,
            expand: false,
        }
    }

    pub fn expanded(index: usize, page_size: usize) -> Self {
        Self {
            expand: true,
            ..Self::new(index, page_size)
        }
    }

    pub fn offset(&self) -> usize {
        self.index * self.page_size
    }
}

/// One fetched page, jobs ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct JobPage {
    pub index: usize,
    /// Size of the whole collection as reported by the server.
    pub total_count: u64,
    pub jobs: Vec<ImportJob>,
}

/// Outcome of a page fetch.
///
/// An empty page and a temporarily unavailable service are routine while
/// paging, so they are values rather than errors.
#[derive(Debug, Clone)]
pub enum PageFetch {
    Page(JobPage),
    Empty,
    Unavailable,
}

impl PageFetch {
    /// `None` for empty pages, an error when the service is unavailable.
    pub fn into_page(self) -> Result<Option<JobPage>> {
        match self {
            PageFetch::Page(page) if page.jobs.is_empty() => Ok(None),
            PageFetch::Page(page) => Ok(Some(page)),
            PageFetch::Empty => Ok(None),
            PageFetch::Unavailable => Err(Error::ServiceUnavailable),
        }
    }
}

/// Access to the remote job collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobGateway: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageFetch>;

    /// Look a job up by id; `None` when the system no longer knows it.
    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>>;
}

#[async_trait]
impl<G: JobGateway + ?Sized> JobGateway for Arc<G> {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageFetch> {
        (**self).fetch_page(request).await
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>> {
        (**self).find_job(job_id).await
    }
}
