use chrono::{DateTime, Utc};
use tracing::warn;

use crate::gateway::JobPage;
use crate::job::ImportJob;
use crate::timestamp::parse_timestamp;

/// Creation instants covered by one page.
///
/// Pages list jobs newest first, so `start` comes from the last job and `end`
/// from the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PageRange {
    /// Range of `jobs`, `None` for an empty page or an unparsable timestamp.
    pub fn of(jobs: &[ImportJob]) -> Option<Self> {
        let first = jobs.first()?;
        let last = jobs.last()?;
        Some(Self {
            start: created(last)?,
            end: created(first)?,
        })
    }

    pub fn of_page(page: &JobPage) -> Option<Self> {
        Self::of(&page.jobs)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

fn created(job: &ImportJob) -> Option<DateTime<Utc>> {
    let raw = job.created.as_deref()?;
    match parse_timestamp(raw) {
        Ok(instant) => Some(instant),
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Unparsable job creation time");
            None
        }
    }
}
