//! Undo jobs generated from executed import jobs.
//!
//! Undo jobs live in the generic configuration job service rather than the
//! import NBI; the generated undo file can be downloaded once the job
//! completed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::job::de::{null_as_default, string_or_number};
use crate::session::NbiSession;
use crate::{Error, Result};

const JOBS_URI: &str = "/configuration/jobs";
pub const UNDO_JOB_TYPE: &str = "UNDO_IMPORT_TO_LIVE";
const UNDO_FILE_FORMAT: &str = "3GPP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoJob {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status_reason: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creation_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_update_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    /// Id of the import job this job undoes.
    #[serde(default, deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub undo_operations: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub total_operations: String,
    #[serde(default, deserialize_with = "file_uri")]
    pub file_uri: String,
}

impl UndoJob {
    pub fn is_successful(&self) -> bool {
        self.status == "COMPLETED"
    }

    pub fn has_file(&self) -> bool {
        !self.file_uri.is_empty()
    }
}

/// Some releases send `/configurationjobs/...`; put the missing slash back.
fn fix_context_uri(uri: String) -> String {
    match uri.strip_prefix("/configuration") {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => format!("/configuration/{rest}"),
        _ => uri,
    }
}

fn file_uri<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(fix_context_uri(null_as_default(deserializer)?))
}

#[derive(Debug, Default, Deserialize)]
struct UndoJobList {
    #[serde(default, deserialize_with = "null_as_default")]
    jobs: Vec<UndoJob>,
}

/// Client of the undo jobs.
///
/// Keeps a map from import job id to the ids of its undo jobs, rebuilt on
/// every listing.
pub struct UndoClient {
    session: Arc<NbiSession>,
    undo_by_import: Mutex<Option<HashMap<String, Vec<String>>>>,
}

impl UndoClient {
    pub fn new(session: Arc<NbiSession>) -> Self {
        Self {
            session,
            undo_by_import: Mutex::new(None),
        }
    }

    /// Undo jobs on the system, optionally only those of one import job.
    pub async fn get_jobs(&self, for_import_job: Option<&str>) -> Result<Vec<UndoJob>> {
        let query = [("type", UNDO_JOB_TYPE.to_string())];
        let value = match self
            .session
            .get_value(JOBS_URI, &query, Some(json_headers()))
            .await
        {
            Ok(value) => value,
            Err(Error::NoContent) => Value::Null,
            Err(e) => return Err(e),
        };

        let jobs: Vec<UndoJob> = if value.is_null() {
            Vec::new()
        } else {
            serde_json::from_value::<UndoJobList>(value)?
                .jobs
                .into_iter()
                .filter(|job| job.kind == UNDO_JOB_TYPE)
                .collect()
        };
        debug!(count = jobs.len(), "Loaded undo jobs");

        *self.undo_by_import.lock() = Some(map_import_to_undo(&jobs));

        Ok(match for_import_job {
            Some(import_id) => jobs.into_iter().filter(|j| j.job_id == import_id).collect(),
            None => jobs,
        })
    }

    pub async fn get_job(&self, undo_job_id: &str) -> Result<UndoJob> {
        let query = [("type", UNDO_JOB_TYPE.to_string())];
        let path = format!("{JOBS_URI}/{undo_job_id}");
        let value = self
            .session
            .get_value(&path, &query, Some(json_headers()))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the system to generate an undo job for `import_job_id`; returns
    /// the id of the new undo job.
    pub async fn undo_import_job(&self, import_job_id: &str) -> Result<String> {
        let body = json!({
            "type": UNDO_JOB_TYPE,
            "id": import_job_id,
            "fileFormat": UNDO_FILE_FORMAT,
        });
        let response = self.session.post_json(JOBS_URI, &body).await?;
        let undo_id = match response.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(Error::invalid_job("undo job response has no id")),
        };

        self.undo_by_import
            .lock()
            .get_or_insert_with(HashMap::new)
            .entry(import_job_id.to_string())
            .or_default()
            .push(undo_id.clone());

        debug!(import_job_id, undo_id = %undo_id, "Created undo job");
        Ok(undo_id)
    }

    /// Ids of the undo jobs of `import_job_id`, listing them on first use.
    pub async fn undo_jobs_for_import(&self, import_job_id: &str) -> Result<Vec<String>> {
        if self.undo_by_import.lock().is_none() {
            self.get_jobs(None).await?;
        }
        Ok(self
            .undo_by_import
            .lock()
            .as_ref()
            .and_then(|map| map.get(import_job_id).cloned())
            .unwrap_or_default())
    }

    /// Download the undo file of `job` into `writer`.
    pub async fn save_file<W>(&self, job: &UndoJob, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if !job.has_file() {
            return Err(Error::invalid_job(format!(
                "there is no file available to download for undo job {}",
                job.id
            )));
        }
        self.session.download(&job.file_uri, writer).await
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Import job id to undo job ids. Ids that are not plain numbers are skipped.
fn map_import_to_undo(jobs: &[UndoJob]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for job in jobs {
        if job.job_id.is_empty() || !job.job_id.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        map.entry(job.job_id.clone()).or_default().push(job.id.clone());
    }
    map
}
