use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de::{lenient_count, null_as_default, string_or_number};
use super::operations::ImportOperations;
use crate::timestamp::parse_timestamp;
use crate::{Error, Result};

pub const VALIDATION_INSTANCE_VALIDATION: &str = "instance-validation";
pub const VALIDATION_NO_INSTANCE_VALIDATION: &str = "no-instance-validation";

pub const ON_ERROR_STOP: &str = "stop-on-error";
pub const ON_ERROR_NEXT_OPERATION: &str = "continue-on-error-operation";
pub const ON_ERROR_NEXT_NODE: &str = "continue-on-error-node";

pub const EXECUTION_MODE_VALIDATE: &str = "validate";
pub const EXECUTION_MODE_VALIDATE_EXECUTE: &str = "validate-and-execute";
pub const EXECUTION_MODE_EXECUTE: &str = "execute";

/// Statuses after which a job no longer changes.
const FINISHED_STATUSES: [&str; 2] = ["executed", "execution-interrupted"];

/// A HAL link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, deserialize_with = "null_as_default")]
    pub href: String,
}

/// Relation name to link.
pub type Links = HashMap<String, Link>;

/// An import file attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Per-category counters of a job (`total` aggregates every category).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub parsed: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub valid: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub invalid: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub executed: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub execution_errors: u64,
}

/// Read projection of a remote CM Import job.
///
/// Unknown keys sent by the server are ignored so newer NBI versions keep
/// decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_validation: Option<String>,
    #[serde(default)]
    pub last_execution: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub validation_policy: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub execution_policy: Vec<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub total_elapsed_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: BTreeMap<String, JobSummary>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<ImportFile>,
    #[serde(rename = "_links", default, deserialize_with = "null_as_default")]
    pub links: Links,
    #[serde(default)]
    pub operations: Option<ImportOperations>,
}

impl ImportJob {
    /// Decode a job from one entry of a jobs page.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Creation instant, `None` when absent or unparsable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .as_deref()
            .and_then(|created| parse_timestamp(created).ok())
    }

    pub fn is_finished(&self) -> bool {
        let status = self.status.to_lowercase();
        FINISHED_STATUSES.contains(&status.as_str())
    }

    pub fn has_errors(&self) -> bool {
        if self.failure_reason.as_deref().is_some_and(|r| !r.is_empty()) {
            return true;
        }
        self.summary
            .values()
            .any(|s| s.invalid > 0 || s.execution_errors > 0)
    }

    /// Aggregate `total` summary entry, if the server sent one.
    pub fn total_summary(&self) -> Option<&JobSummary> {
        self.summary
            .values()
            .find(|s| s.kind.eq_ignore_ascii_case("total"))
    }

    pub fn set_summary(&mut self, summary: BTreeMap<String, JobSummary>) {
        self.summary = summary;
    }

    pub fn set_operations(&mut self, operations: Option<ImportOperations>) {
        self.operations = operations;
    }

    /// Validation and execution progress in percent.
    pub fn progress(&self) -> (u8, u8) {
        let Some(total) = self.total_summary() else {
            return (0, 0);
        };
        if total.parsed == 0 {
            return (0, 0);
        }

        let validated = total.valid + total.invalid;
        let validation = percent(validated, total.parsed);

        let to_execute = total.parsed.saturating_sub(total.invalid);
        let execution = if self.is_finished() {
            100
        } else if to_execute > 0 {
            percent(total.executed + total.execution_errors, to_execute)
        } else {
            0
        };

        (validation, execution)
    }

    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .get(rel)
            .map(|l| l.href.as_str())
            .filter(|href| !href.is_empty())
    }

    pub fn self_link(&self) -> Option<&str> {
        self.link("self")
    }

    pub fn can_execute(&self) -> bool {
        self.links.contains_key("invocations") || self.status.eq_ignore_ascii_case("validated")
    }

    pub fn can_have_file(&self) -> bool {
        self.links.contains_key("files")
    }

    pub fn invocations_url(&self) -> Result<String> {
        self.related_url("invocations")
    }

    pub fn operations_url(&self) -> Result<String> {
        self.related_url("operations")
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }

    /// Link of `rel`, or the self link with `rel` appended as a path segment.
    fn related_url(&self, rel: &str) -> Result<String> {
        if let Some(href) = self.link(rel) {
            return Ok(href.to_string());
        }
        let self_link = self
            .self_link()
            .ok_or_else(|| Error::invalid_job(format!("job {} has no self link", self.id)))?;
        Ok(append_segment(self_link, rel))
    }
}

/// Body of the job collection endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobList {
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub jobs: Vec<ImportJob>,
}

impl std::fmt::Display for ImportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Id: {}", self.id)?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Created: {}", self.created.as_deref().unwrap_or(""))?;
        writeln!(f, "Executed: {}", self.last_execution.as_deref().unwrap_or(""))?;
        writeln!(f, "Execution Policy: {}", self.execution_policy.join(", "))?;
        write!(f, "Total Elapsed Time: {}", self.total_elapsed_time)
    }
}

fn percent(part: u64, whole: u64) -> u8 {
    (part.saturating_mul(100) / whole).min(100) as u8
}

/// Drop query and fragment from `href` and append `segment` to its path.
pub(crate) fn append_segment(href: &str, segment: &str) -> String {
    let end = href.find(['?', '#']).unwrap_or(href.len());
    format!("{}/{}", href[..end].trim_end_matches('/'), segment)
}
