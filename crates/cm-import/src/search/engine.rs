use chrono::{DateTime, Utc};
use tracing::debug;

use super::collector::collect_pages;
use crate::Result;
use crate::gateway::JobGateway;
use crate::job::ImportJob;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// What to look for in the job collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub created_start: Option<DateTime<Utc>>,
    pub created_end: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the job name.
    pub job_name: Option<String>,
    /// Exact user id.
    pub user_id: Option<String>,
    pub page_size: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            created_start: None,
            created_end: None,
            job_name: None,
            user_id: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchCriteria {
    pub fn between(created_start: DateTime<Utc>, created_end: DateTime<Utc>) -> Self {
        Self {
            created_start: Some(created_start),
            created_end: Some(created_end),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn matches_dates(&self, job: &ImportJob) -> bool {
        if self.created_start.is_none() && self.created_end.is_none() {
            return true;
        }
        let Some(created) = job.created_at() else {
            return false;
        };
        self.created_start.is_none_or(|start| start <= created)
            && self.created_end.is_none_or(|end| created <= end)
    }

    fn matches_name(&self, job: &ImportJob, name_lower: &str) -> bool {
        !job.name.is_empty() && job.name.to_lowercase().contains(name_lower)
    }

    fn matches_user(&self, job: &ImportJob, user_id: &str) -> bool {
        !job.user_id.is_empty() && job.user_id == user_id
    }
}

/// Date range search over the paged job collection.
///
/// Pages are located by binary search on their creation dates, then every job
/// is filtered individually. Results keep page order (ascending page index)
/// and, within a page, the server's newest-first order; they are not sorted
/// globally.
pub struct JobSearch<'a, G: ?Sized> {
    gateway: &'a G,
}

impl<'a, G: JobGateway + ?Sized> JobSearch<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    pub async fn find_jobs(&self, criteria: &SearchCriteria) -> Result<Vec<ImportJob>> {
        debug!(?criteria, "Starting job search");

        let pages = collect_pages(
            self.gateway,
            criteria.created_start,
            criteria.created_end,
            criteria.page_size,
        )
        .await?;
        debug!(pages = pages.len(), "Found pages within the interval");

        let name_lower = criteria.job_name.as_deref().map(str::to_lowercase);
        let mut found = Vec::new();

        for page in pages {
            let before = page.jobs.len();
            let jobs = page.jobs.into_iter().filter(|job| {
                criteria.matches_dates(job)
                    && name_lower
                        .as_deref()
                        .is_none_or(|name| criteria.matches_name(job, name))
                    && criteria
                        .user_id
                        .as_deref()
                        .is_none_or(|user| criteria.matches_user(job, user))
            });
            let start = found.len();
            found.extend(jobs);
            debug!(
                page = page.index,
                jobs = before,
                kept = found.len() - start,
                "Filtered page"
            );
        }

        debug!(found = found.len(), "Job search completed");
        Ok(found)
    }
}
