//! CM Import job operations on top of an [`NbiSession`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::gateway::{JobGateway, JobPage, PageFetch, PageRequest};
use crate::job::{ImportJob, ImportOperation, ImportOperations, JobList, Link, OperationAttribute};
use crate::session::NbiSession;
use crate::timestamp::format_query_timestamp;
use crate::{Error, Result};

const JOBS_URI: &str = "jobs";
const JOB_EXPAND: [&str; 2] = ["summary", "files"];
const OPERATION_EXPAND: [&str; 2] = ["attributes", "failures"];
const ATTRIBUTE_EXPAND: &str = "current-value";

/// Filters of the job collection endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub offset: u64,
    pub limit: u64,
    pub job_id: Option<String>,
    pub user_id: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            job_id: None,
            user_id: None,
            created_before: None,
            created_after: None,
        }
    }
}

impl JobQuery {
    pub fn page(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn by_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }

    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("offset", self.offset.to_string()),
            ("limit", self.limit.to_string()),
        ];
        query.extend(job_expand());
        if let Some(id) = self.job_id.as_deref().filter(|id| !id.is_empty()) {
            query.push(("id", id.to_string()));
        }
        if let Some(user) = self.user_id.as_deref().filter(|u| !u.is_empty()) {
            query.push(("userId", user.to_string()));
        }
        if let Some(before) = &self.created_before {
            query.push(("createdBefore", format_query_timestamp(before)));
        }
        if let Some(after) = &self.created_after {
            query.push(("createdAfter", format_query_timestamp(after)));
        }
        query
    }
}

/// Parameters of a job to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewJob {
    pub name: Option<String>,
    pub validation_policy: Vec<String>,
    pub execution_policy: Vec<String>,
}

impl NewJob {
    fn to_body(&self) -> Value {
        let mut body = json!({});
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            body["name"] = json!(name);
        }
        if !self.validation_policy.is_empty() {
            body["validationPolicy"] = json!(self.validation_policy);
        }
        if !self.execution_policy.is_empty() {
            body["executionPolicy"] = json!(self.execution_policy);
        }
        body
    }
}

/// Client of the CM Import job collection.
#[derive(Clone)]
pub struct CmImportClient {
    session: Arc<NbiSession>,
}

impl CmImportClient {
    pub fn new(session: Arc<NbiSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &NbiSession {
        &self.session
    }

    /// Jobs matching `query`, newest first. An empty collection is not an error.
    pub async fn get_jobs(&self, query: &JobQuery) -> Result<Vec<ImportJob>> {
        match self
            .session
            .get_json::<JobList>(JOBS_URI, &query.to_query())
            .await
        {
            Ok(list) => Ok(list.jobs),
            Err(Error::NoContent) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ImportJob> {
        let path = format!("{JOBS_URI}/{job_id}");
        let value = self.session.get_value(&path, &job_expand(), None).await?;
        ImportJob::from_value(value)
    }

    pub async fn create_job(&self, job: &NewJob) -> Result<ImportJob> {
        let value = self.session.post_json(JOBS_URI, &job.to_body()).await?;
        let created = ImportJob::from_value(value)?;
        debug!(job_id = %created.id, "Created import job");
        Ok(created)
    }

    /// Upload `path` to the job; the job learns its invocations link from the
    /// response.
    pub async fn upload_file(&self, job: &mut ImportJob, path: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::invalid_job(format!(
                "it is not a file: {}",
                path.display()
            )));
        }
        let files_url = job
            .link("files")
            .ok_or_else(|| Error::invalid_job(format!("job {} does not accept files", job.id)))?
            .to_string();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = tokio::fs::read(path).await?;
        let form = Form::new()
            .text("filename", file_name.clone())
            .part("file", Part::bytes(data).file_name(file_name.clone()));

        debug!(job_id = %job.id, file = %file_name, "Uploading import file");
        let response = self.session.post_multipart(&files_url, form).await?;
        if let Some(href) = response
            .pointer("/_links/invocations/href")
            .and_then(Value::as_str)
        {
            job.links.insert(
                "invocations".to_string(),
                Link {
                    href: href.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Start `flow` (validate, execute, ...) on the job, then refresh it.
    pub async fn execute(
        &self,
        job: &mut ImportJob,
        flow: &str,
        validation_policy: &[String],
        execution_policy: &[String],
    ) -> Result<()> {
        if !job.can_execute() {
            return Err(Error::invalid_job(format!("job {} can not be executed", job.id)));
        }

        let mut body = json!({ "invocationFlow": flow });
        if !validation_policy.is_empty() {
            body["validationPolicy"] = json!(validation_policy);
        }
        if !execution_policy.is_empty() {
            body["executionPolicy"] = json!(execution_policy);
        }

        let url = job.invocations_url()?;
        debug!(job_id = %job.id, flow, "Invoking job");
        self.session.post_json(&url, &body).await?;
        self.refresh(job).await
    }

    /// Reload the job from its self link, keeping and refetching the page of
    /// operations it had loaded.
    pub async fn refresh(&self, job: &mut ImportJob) -> Result<()> {
        let Some(self_link) = job.self_link().map(str::to_string) else {
            return Ok(());
        };
        let value = self.session.get_value(&self_link, &job_expand(), None).await?;
        let mut fresh = ImportJob::from_value(value)?;

        if let Some(loaded) = job.operations.take() {
            let length = loaded.operations.len() as u64;
            let operations = if length > 0 {
                self.operations(&fresh, loaded.offset, length)
                    .await?
                    .or(Some(loaded))
            } else {
                Some(loaded)
            };
            fresh.set_operations(operations);
        }

        *job = fresh;
        Ok(())
    }

    /// One page of operations of the job.
    ///
    /// `None` when the job has no operations yet; an unavailable service
    /// yields an empty page.
    pub async fn operations(
        &self,
        job: &ImportJob,
        offset: u64,
        limit: u64,
    ) -> Result<Option<ImportOperations>> {
        let url = job.operations_url()?;
        let mut query = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        query.extend(OPERATION_EXPAND.iter().map(|e| ("expand", e.to_string())));

        match self.session.get_json::<ImportOperations>(&url, &query).await {
            Ok(mut operations) => {
                operations.offset = offset;
                Ok(Some(operations))
            }
            Err(Error::NoContent) => Ok(None),
            Err(Error::ServiceUnavailable) => {
                error!(job_id = %job.id, "Error fetching operations, service unavailable");
                Ok(Some(ImportOperations {
                    offset,
                    ..Default::default()
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Attributes of `operation` with their current value on the node.
    pub async fn attributes(&self, operation: &ImportOperation) -> Result<Vec<OperationAttribute>> {
        let Some(url) = operation.attributes_link() else {
            return Ok(Vec::new());
        };
        let query = [("expand", ATTRIBUTE_EXPAND.to_string())];
        match self.session.get_value(url, &query, None).await {
            Ok(value) => parse_attributes(value),
            Err(Error::NoContent) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Fill in the current value of every attribute of create and update
    /// operations that lacks one. Returns the number of operations updated.
    pub async fn load_current_values(&self, operations: &mut ImportOperations) -> usize {
        let mut updated = 0;
        for operation in operations
            .operations
            .iter_mut()
            .filter(|op| op.modifies_attributes())
        {
            let fetched = match self.attributes(operation).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(operation = %operation.id, fdn = %operation.fdn, error = %e, "Failed to read current values");
                    continue;
                }
            };
            if merge_current_values(operation, fetched) {
                updated += 1;
            }
        }
        updated
    }
}

#[async_trait]
impl JobGateway for CmImportClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageFetch> {
        match self
            .session
            .get_json::<JobList>(JOBS_URI, &page_query(&request))
            .await
        {
            Ok(list) => Ok(PageFetch::Page(JobPage {
                index: request.index,
                total_count: list.total_count,
                jobs: list.jobs,
            })),
            Err(Error::NoContent) => Ok(PageFetch::Empty),
            Err(Error::ServiceUnavailable) => Ok(PageFetch::Unavailable),
            Err(e) => Err(e),
        }
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ImportJob>> {
        let jobs = self.get_jobs(&JobQuery::by_id(job_id)).await?;
        let position = jobs.iter().position(|job| job.id == job_id).unwrap_or(0);
        Ok(jobs.into_iter().nth(position))
    }
}

fn job_expand() -> Vec<(&'static str, String)> {
    JOB_EXPAND.iter().map(|e| ("expand", e.to_string())).collect()
}

/// Query of one page of the job collection; only the located page is expanded.
fn page_query(request: &PageRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("offset", request.offset().to_string()),
        ("limit", request.page_size.to_string()),
    ];
    if request.expand {
        query.extend(job_expand());
    }
    query
}

/// The attributes endpoint answers with a bare list or an `attributes` field.
fn parse_attributes(value: Value) -> Result<Vec<OperationAttribute>> {
    let list = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Object(mut map) => map.remove("attributes").unwrap_or(Value::Null),
        other => other,
    };
    if list.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(list)?)
}

fn merge_current_values(operation: &mut ImportOperation, fetched: Vec<OperationAttribute>) -> bool {
    if operation.attributes.is_empty() {
        let changed = !fetched.is_empty();
        operation.set_attributes(fetched);
        return changed;
    }

    let mut changed = false;
    for attribute in operation
        .attributes
        .iter_mut()
        .filter(|a| a.current_value.is_none())
    {
        let current = fetched
            .iter()
            .find(|f| f.name == attribute.name)
            .and_then(|f| f.current_value.clone())
            .unwrap_or_else(|| Value::String("not found".to_string()));
        attribute.current_value = Some(current);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query_value<'a>(query: &'a [(&str, String)], key: &str) -> Vec<&'a str> {
        query
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn page_query_expands_only_when_asked() {
        let plain = page_query(&PageRequest::new(3, 200));
        assert_eq!(query_value(&plain, "offset"), ["600"]);
        assert_eq!(query_value(&plain, "limit"), ["200"]);
        assert!(query_value(&plain, "expand").is_empty());

        let hit = page_query(&PageRequest::expanded(3, 200));
        assert_eq!(query_value(&hit, "expand"), ["summary", "files"]);
    }

    #[test]
    fn job_query_includes_only_set_filters() {
        let query = JobQuery {
            user_id: Some("administrator".into()),
            created_after: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            ..JobQuery::page(100, 25)
        }
        .to_query();

        assert_eq!(query_value(&query, "offset"), ["100"]);
        assert_eq!(query_value(&query, "limit"), ["25"]);
        assert_eq!(query_value(&query, "expand"), ["summary", "files"]);
        assert_eq!(query_value(&query, "userId"), ["administrator"]);
        assert_eq!(query_value(&query, "createdAfter"), ["2024-01-02T03:04:05Z"]);
        assert!(query_value(&query, "id").is_empty());
        assert!(query_value(&query, "createdBefore").is_empty());
    }

    #[test]
    fn new_job_body_skips_empty_fields() {
        assert_eq!(NewJob::default().to_body(), json!({}));

        let body = NewJob {
            name: Some("nightly".into()),
            validation_policy: vec!["instance-validation".into()],
            execution_policy: vec![],
        }
        .to_body();
        assert_eq!(
            body,
            json!({"name": "nightly", "validationPolicy": ["instance-validation"]})
        );
    }

    #[test]
    fn attributes_come_as_list_or_wrapped() {
        let bare = parse_attributes(json!([{"name": "a", "suppliedValue": 1}])).unwrap();
        assert_eq!(bare.len(), 1);

        let wrapped = parse_attributes(json!({
            "attributes": [{"name": "a", "suppliedValue": 1, "currentValue": 2}]
        }))
        .unwrap();
        assert_eq!(wrapped[0].current_value, Some(json!(2)));

        assert!(parse_attributes(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn merges_current_values_by_name() {
        let mut operation: ImportOperation = serde_json::from_value(json!({
            "id": 1,
            "type": "update",
            "attributes": [
                {"name": "a", "suppliedValue": 1},
                {"name": "b", "suppliedValue": 2},
                {"name": "c", "suppliedValue": 3, "currentValue": 3}
            ]
        }))
        .unwrap();
        let fetched = vec![OperationAttribute {
            name: "a".into(),
            supplied_value: json!(1),
            current_value: Some(json!(5)),
        }];

        assert!(merge_current_values(&mut operation, fetched));
        assert_eq!(operation.attributes[0].current_value, Some(json!(5)));
        assert_eq!(operation.attributes[1].current_value, Some(json!("not found")));
        assert_eq!(operation.attributes[2].current_value, Some(json!(3)));
    }
}
