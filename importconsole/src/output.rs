use crate::{cli::OutputFormat, error::Result};
use cm_import::cleanup::{CleanupState, SweepReport};
use cm_import::job::{ImportOperations, OperationAttribute};
use cm_import::undo::UndoJob;
use cm_import::ImportJob;
use colored::*;
use serde_json::json;
use std::borrow::Cow;
use std::io::Write;
use tabled::{Table, Tabled, settings::Style};

/// Placeholder for values the server did not send.
const NONE: &str = "-";

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_jobs(&self, jobs: &[ImportJob], format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(jobs)? + "\n"),
            OutputFormat::Table => Ok(self.format_jobs_table(jobs)),
            OutputFormat::Pretty => Ok(self.format_jobs_pretty(jobs)),
        }
    }

    pub fn format_job(&self, job: &ImportJob, format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(job)? + "\n"),
            OutputFormat::Table => Ok(self.format_job_table(job)),
            OutputFormat::Pretty => Ok(self.format_job_pretty(job)),
        }
    }

    pub fn format_undo_jobs(&self, jobs: &[UndoJob], format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(jobs)? + "\n"),
            OutputFormat::Table | OutputFormat::Pretty if jobs.is_empty() => {
                Ok(format!("{}\n", self.colorize("No undo jobs found", &Color::Yellow, false)))
            }
            OutputFormat::Table | OutputFormat::Pretty => {
                #[derive(Tabled)]
                struct UndoRow<'a> {
                    id: &'a str,
                    #[tabled(rename = "import job")]
                    import_job: &'a str,
                    status: Cow<'a, str>,
                    user: &'a str,
                    created: &'a str,
                    operations: String,
                    file: &'a str,
                }

                let rows = jobs.iter().map(|job| UndoRow {
                    id: &job.id,
                    import_job: &job.job_id,
                    status: if job.status_reason.is_empty() {
                        Cow::Borrowed(job.status.as_str())
                    } else {
                        Cow::Owned(format!("{} ({})", job.status, job.status_reason))
                    },
                    user: &job.user_id,
                    created: or_none(&job.creation_time),
                    operations: format!("{}/{}", job.undo_operations, job.total_operations),
                    file: if job.has_file() { "yes" } else { "no" },
                });
                Ok(format!("{}\n", Table::new(rows).with(Style::modern())))
            }
        }
    }

    pub fn format_sweep(&self, report: &SweepReport, format: &OutputFormat) -> Result<String> {
        if let OutputFormat::Json = format {
            let outcomes: Vec<_> = report
                .outcomes
                .iter()
                .map(|o| {
                    json!({
                        "jobId": o.job_id,
                        "file": o.job_file,
                        "state": state_label(o.state),
                    })
                })
                .collect();
            return Ok(serde_json::to_string_pretty(&outcomes)? + "\n");
        }

        if report.is_empty() {
            return Ok(format!(
                "{}\n",
                self.colorize("No files waiting for cleanup", &Color::Yellow, false)
            ));
        }

        let mut output = String::new();
        if let OutputFormat::Table = format {
            #[derive(Tabled)]
            struct SweepRow<'a> {
                job: &'a str,
                file: Cow<'a, str>,
                state: &'static str,
            }
            let rows = report.outcomes.iter().map(|o| SweepRow {
                job: &o.job_id,
                file: o.job_file.to_string_lossy(),
                state: state_label(o.state),
            });
            output.push_str(&Table::new(rows).with(Style::modern()).to_string());
            output.push('\n');
        } else {
            for outcome in &report.outcomes {
                output.push_str(&format!(
                    "  {} {} {}\n",
                    self.colorize(&format!("[{}]", outcome.job_id), &Color::Cyan, false),
                    outcome.job_file.display(),
                    self.state_colorized(outcome.state)
                ));
            }
        }

        output.push_str(&format!(
            "{} deleted, {} pending, {} retained, {} orphaned\n",
            report.count(CleanupState::Deleted),
            report.count(CleanupState::Pending),
            report.count(CleanupState::Retained),
            report.count(CleanupState::Orphaned),
        ));
        Ok(output)
    }

    /// One status line, e.g. after creating a job or downloading a file.
    pub fn format_message(&self, message: &str, format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
                "status": "ok",
                "message": message,
            }))? + "\n"),
            _ => Ok(format!("{} {message}\n", self.colorize("✓", &Color::Green, true))),
        }
    }

    fn format_jobs_pretty(&self, jobs: &[ImportJob]) -> String {
        if jobs.is_empty() {
            return format!("{}\n", self.colorize("No jobs found", &Color::Yellow, false));
        }

        let mut output = String::new();
        for job in jobs {
            let (validated, executed) = job.progress();
            output.push_str(&format!(
                "{} {} {} {}\n",
                self.colorize(&format!("[{}]", job.id), &Color::Cyan, true),
                self.colorize(or_none(&job.name), &Color::Green, false),
                self.status_colorized(job),
                self.colorize(
                    &format!("validated {validated}% executed {executed}%"),
                    &Color::Blue,
                    false
                ),
            ));
            output.push_str(&format!(
                "    {} {}  {} {}\n",
                self.colorize("created", &Color::Yellow, false),
                job.created.as_deref().unwrap_or(NONE),
                self.colorize("by", &Color::Yellow, false),
                or_none(&job.user_id),
            ));
        }
        output.push_str(&format!("{} job(s)\n", jobs.len()));
        output
    }

    fn format_jobs_table(&self, jobs: &[ImportJob]) -> String {
        #[derive(Tabled)]
        struct JobRow<'a> {
            id: &'a str,
            name: &'a str,
            status: &'a str,
            user: &'a str,
            created: &'a str,
            validated: String,
            executed: String,
            files: String,
        }

        let rows = jobs.iter().map(|job| {
            let (validated, executed) = job.progress();
            JobRow {
                id: &job.id,
                name: &job.name,
                status: &job.status,
                user: &job.user_id,
                created: job.created.as_deref().unwrap_or(NONE),
                validated: format!("{validated}%"),
                executed: format!("{executed}%"),
                files: job.file_names().collect::<Vec<_>>().join(", "),
            }
        });
        format!("{}\n", Table::new(rows).with(Style::modern()))
    }

    fn format_job_pretty(&self, job: &ImportJob) -> String {
        let mut output = String::new();
        output.push_str(&self.colorize(&format!("Job {}", job.id), &Color::Green, true));
        output.push('\n');

        let (validated, executed) = job.progress();
        let fields: [(&str, Cow<'_, str>); 10] = [
            ("Name", Cow::Borrowed(or_none(&job.name))),
            ("Status", Cow::Owned(self.status_colorized(job))),
            ("User", Cow::Borrowed(or_none(&job.user_id))),
            ("Created", Cow::Borrowed(job.created.as_deref().unwrap_or(NONE))),
            ("Last validation", Cow::Borrowed(job.last_validation.as_deref().unwrap_or(NONE))),
            ("Last execution", Cow::Borrowed(job.last_execution.as_deref().unwrap_or(NONE))),
            ("Validation policy", Cow::Owned(job.validation_policy.join(", "))),
            ("Execution policy", Cow::Owned(job.execution_policy.join(", "))),
            ("Progress", Cow::Owned(format!("validated {validated}% executed {executed}%"))),
            ("Files", Cow::Owned(job.file_names().collect::<Vec<_>>().join(", "))),
        ];
        for (name, value) in fields {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize(name, &Color::Yellow, false),
                value
            ));
        }

        if let Some(reason) = job.failure_reason.as_deref().filter(|r| !r.is_empty()) {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize("Failure", &Color::Red, true),
                reason
            ));
        }

        if !job.summary.is_empty() {
            output.push_str(&format!("  {}:\n", self.colorize("Summary", &Color::Yellow, false)));
            for (category, summary) in &job.summary {
                output.push_str(&format!(
                    "    {:<12} parsed {} valid {} invalid {} executed {} errors {}\n",
                    category,
                    summary.parsed,
                    summary.valid,
                    summary.invalid,
                    summary.executed,
                    summary.execution_errors
                ));
            }
        }

        if let Some(operations) = &job.operations {
            output.push_str(&self.format_operations_pretty(operations));
        }
        output
    }

    fn format_job_table(&self, job: &ImportJob) -> String {
        let mut output = self.format_jobs_table(std::slice::from_ref(job));
        let Some(operations) = &job.operations else {
            return output;
        };

        #[derive(Tabled)]
        struct OperationRow<'a> {
            id: &'a str,
            #[tabled(rename = "type")]
            kind: &'a str,
            fdn: &'a str,
            status: &'a str,
            attribute: &'a str,
            value: String,
            current: String,
        }

        let mut rows = Vec::new();
        for op in &operations.operations {
            if op.attributes.is_empty() {
                rows.push(OperationRow {
                    id: &op.id,
                    kind: &op.kind,
                    fdn: &op.fdn,
                    status: &op.status,
                    attribute: "",
                    value: String::new(),
                    current: String::new(),
                });
            }
            for attribute in &op.attributes {
                rows.push(OperationRow {
                    id: &op.id,
                    kind: &op.kind,
                    fdn: &op.fdn,
                    status: &op.status,
                    attribute: &attribute.name,
                    value: attribute.value_text(),
                    current: attribute.current_value_text().unwrap_or_default(),
                });
            }
        }
        output.push_str(&format!(
            "operations {}-{} of {}\n",
            operations.offset + 1,
            operations.offset + operations.operations.len() as u64,
            operations.total_count
        ));
        output.push_str(&format!("{}\n", Table::new(rows).with(Style::modern())));
        output
    }

    fn format_operations_pretty(&self, operations: &ImportOperations) -> String {
        let mut output = format!(
            "  {} ({} of {}):\n",
            self.colorize("Operations", &Color::Yellow, false),
            operations.operations.len(),
            operations.total_count
        );
        for op in &operations.operations {
            output.push_str(&format!(
                "    {} {} {} {}\n",
                self.colorize(&format!("[{}]", op.id), &Color::Cyan, false),
                self.colorize(&op.kind, &Color::Blue, false),
                op.fdn,
                or_none(&op.status)
            ));
            for attribute in &op.attributes {
                output.push_str(&self.format_attribute(attribute));
            }
            for failure in &op.failures {
                output.push_str(&format!(
                    "      {} {}\n",
                    self.colorize("failure:", &Color::Red, false),
                    failure.failure_reason
                ));
            }
        }
        output
    }

    fn format_attribute(&self, attribute: &OperationAttribute) -> String {
        let value = attribute.value_text();
        match attribute.current_value_text() {
            Some(current) if attribute.differs() => format!(
                "      {} = {} {}\n",
                attribute.name,
                value,
                self.colorize(&format!("(current {current})"), &Color::Red, false)
            ),
            Some(_) => format!(
                "      {} = {} {}\n",
                attribute.name,
                value,
                self.colorize("(unchanged)", &Color::Green, false)
            ),
            None => format!("      {} = {}\n", attribute.name, value),
        }
    }

    fn status_colorized(&self, job: &ImportJob) -> String {
        let color = if job.has_errors() {
            Color::Red
        } else if job.is_finished() {
            Color::Green
        } else {
            Color::Yellow
        };
        self.colorize(or_none(&job.status), &color, false)
    }

    fn state_colorized(&self, state: CleanupState) -> String {
        let color = match state {
            CleanupState::Deleted => Color::Green,
            CleanupState::Pending | CleanupState::Retained => Color::Yellow,
            CleanupState::Orphaned => Color::Red,
        };
        self.colorize(state_label(state), &color, false)
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        if !self.colored {
            return text.to_string();
        }
        let colored_text = match color {
            Color::Green => text.green(),
            Color::Yellow => text.yellow(),
            Color::Blue => text.blue(),
            Color::Cyan => text.cyan(),
            Color::Red => text.red(),
        };
        if bold {
            colored_text.bold().to_string()
        } else {
            colored_text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Red,
}

fn state_label(state: CleanupState) -> &'static str {
    match state {
        CleanupState::Pending => "pending",
        CleanupState::Retained => "retained",
        CleanupState::Deleted => "deleted",
        CleanupState::Orphaned => "orphaned",
    }
}

fn or_none(text: &str) -> &str {
    if text.is_empty() { NONE } else { text }
}

pub fn write_output(content: &str, output_file: Option<&std::path::Path>) -> Result<()> {
    match output_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        None => {
            print!("{content}");
            std::io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_import::cleanup::CleanupOutcome;
    use cm_import::job::{ImportOperation, ImportOperations};
    use std::path::PathBuf;

    fn job() -> ImportJob {
        ImportJob {
            id: "42".to_string(),
            name: "night-batch".to_string(),
            status: "executed".to_string(),
            created: Some("2024-05-02T10:00:00.000Z".to_string()),
            user_id: "administrator".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_output_has_no_escape_codes() {
        let output = OutputManager::new(false);
        let text = output.format_jobs(&[job()], &OutputFormat::Pretty).unwrap();
        assert!(text.contains("[42] night-batch executed"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn json_output_is_the_job_list() {
        let output = OutputManager::new(true);
        let text = output.format_jobs(&[job()], &OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["id"], "42");
        assert_eq!(value[0]["userId"], "administrator");
    }

    #[test]
    fn table_lists_every_attribute() {
        let mut job = job();
        job.operations = Some(ImportOperations {
            total_count: 1,
            operations: vec![ImportOperation {
                id: "1".to_string(),
                kind: "update".to_string(),
                fdn: "NetworkElement=LTE01".to_string(),
                attributes: vec![
                    OperationAttribute {
                        name: "userLabel".to_string(),
                        supplied_value: json!("new"),
                        current_value: Some(json!("old")),
                    },
                    OperationAttribute {
                        name: "administrativeState".to_string(),
                        supplied_value: json!("LOCKED"),
                        current_value: None,
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        });

        let text = OutputManager::new(false)
            .format_job(&job, &OutputFormat::Table)
            .unwrap();
        assert!(text.contains("userLabel"));
        assert!(text.contains("administrativeState"));
        assert!(text.contains("operations 1-1 of 1"));
    }

    #[test]
    fn differing_current_value_is_flagged() {
        let attribute = OperationAttribute {
            name: "userLabel".to_string(),
            supplied_value: json!("new"),
            current_value: Some(json!("old")),
        };
        let text = OutputManager::new(false).format_attribute(&attribute);
        assert_eq!(text, "      userLabel = new (current old)\n");
    }

    #[test]
    fn sweep_summary_counts_states() {
        let report = SweepReport {
            outcomes: vec![
                CleanupOutcome {
                    job_id: "1".to_string(),
                    job_file: PathBuf::from("/tmp/a.txt"),
                    state: CleanupState::Deleted,
                },
                CleanupOutcome {
                    job_id: "2".to_string(),
                    job_file: PathBuf::from("/tmp/b.txt"),
                    state: CleanupState::Pending,
                },
            ],
        };
        let text = OutputManager::new(false)
            .format_sweep(&report, &OutputFormat::Pretty)
            .unwrap();
        assert!(text.ends_with("1 deleted, 1 pending, 0 retained, 0 orphaned\n"));
    }
}
