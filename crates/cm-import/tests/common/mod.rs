#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cm_import::{ImportFile, ImportJob, JobGateway, JobPage, PageFetch, PageRequest, Result};
use parking_lot::Mutex;

/// Creation time of the newest synthetic job.
pub fn newest() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn format_created(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn job(id: usize, created: DateTime<Utc>) -> ImportJob {
    ImportJob {
        id: id.to_string(),
        name: format!("job-{id}"),
        status: "executed".to_string(),
        created: Some(format_created(created)),
        user_id: format!("user{}", id % 3),
        files: vec![ImportFile {
            id: "1".to_string(),
            name: format!("file-{id}.txt"),
        }],
        ..Default::default()
    }
}

/// In-memory job collection, newest first, recording every page request.
pub struct FakeGateway {
    jobs: Vec<ImportJob>,
    unavailable: bool,
    requests: Mutex<Vec<PageRequest>>,
    lookups: Mutex<HashMap<String, Option<ImportJob>>>,
}

impl FakeGateway {
    /// `count` jobs one minute apart; job `i` is the i-th newest.
    pub fn with_jobs(count: usize) -> Self {
        let times = (0..count)
            .map(|i| newest() - Duration::minutes(i as i64))
            .collect();
        Self::with_times(times)
    }

    /// One job per instant, ids counting from 0; `times` must be newest first.
    pub fn with_times(times: Vec<DateTime<Utc>>) -> Self {
        let jobs = times
            .into_iter()
            .enumerate()
            .map(|(i, created)| job(i, created))
            .collect();
        Self {
            jobs,
            unavailable: false,
            requests: Mutex::new(Vec::new()),
            lookups: Mutex::new(HashMap::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::with_jobs(0)
        }
    }

    pub fn created(&self, id: usize) -> DateTime<Utc> {
        cm_import::parse_timestamp(self.jobs[id].created.as_deref().unwrap()).unwrap()
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    pub fn fetch_count(&self, index: usize, expand: bool) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.index == index && r.expand == expand)
            .count()
    }

    /// Answer `find_job(id)` with `job`; `None` means unknown to the system.
    pub fn set_lookup(&self, id: &str, job: Option<ImportJob>) {
        self.lookups.lock().insert(id.to_string(), job);
    }
}

#[async_trait]
impl JobGateway for FakeGateway {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageFetch> {
        self.requests.lock().push(request);
        if self.unavailable {
            return Ok(PageFetch::Unavailable);
        }

        let start = request.offset();
        if start >= self.jobs.len() {
            return Ok(PageFetch::Empty);
        }
        let end = (start + request.page_size).min(self.jobs.len());
        Ok(PageFetch::Page(JobPage {
            index: request.index,
            total_count: self.jobs.len() as u64,
            jobs: self.jobs[start..end].to_vec(),
        }))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>> {
        if let Some(job) = self.lookups.lock().get(job_id) {
            return Ok(job.clone());
        }
        Ok(self.jobs.iter().find(|job| job.id == job_id).cloned())
    }
}
