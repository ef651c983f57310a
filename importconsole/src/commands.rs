use crate::{
    cli::{JobsCommand, OutputFormat, UndoCommand},
    config::AppConfig,
    error::{AppError, Result},
    output::{OutputManager, write_output},
};
use chrono::{DateTime, TimeDelta, Utc};
use cm_import::cleanup::FileCleaner;
use cm_import::undo::UndoClient;
use cm_import::{CmImportClient, JobQuery, JobSearch, NbiSession, NewJob, SearchCriteria};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Select, Text};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const MAX_LOGIN_ATTEMPTS: usize = 3;

pub struct CommandExecutor {
    config: AppConfig,
    output: OutputManager,
    format: OutputFormat,
    password: Option<String>,
    session: Option<Arc<NbiSession>>,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, password: Option<String>, format: OutputFormat, colored: bool) -> Self {
        Self {
            config,
            output: OutputManager::new(colored && format != OutputFormat::Json),
            format,
            password,
            session: None,
        }
    }

    pub async fn jobs(&mut self, command: JobsCommand) -> Result<()> {
        let client = CmImportClient::new(self.connect().await?);

        match command {
            JobsCommand::List { limit, offset, user } => {
                let query = JobQuery {
                    offset,
                    limit: limit.unwrap_or(self.config.list_buffer_size),
                    user_id: user,
                    ..Default::default()
                };
                let jobs = client.get_jobs(&query).await?;
                write_output(&self.output.format_jobs(&jobs, &self.format)?, None)
            }

            JobsCommand::Search { from, to, name, user } => {
                let start = parse_date(&from, false)?;
                let end = match to.as_deref() {
                    Some(to) => parse_date(to, true)?,
                    None => Utc::now(),
                };
                self.config.check_search_interval(start, end)?;

                let mut criteria = SearchCriteria::between(start, end)
                    .with_page_size(self.config.search_page_size);
                if let Some(name) = name {
                    criteria = criteria.with_name(name);
                }
                if let Some(user) = user {
                    criteria = criteria.with_user(user);
                }

                let spinner = spinner(format!("Searching jobs created between {start} and {end}..."));
                let found = JobSearch::new(&client).find_jobs(&criteria).await;
                spinner.finish_and_clear();

                let jobs = found?;
                info!(count = jobs.len(), "Search finished");
                write_output(&self.output.format_jobs(&jobs, &self.format)?, None)
            }

            JobsCommand::Show {
                id,
                operations,
                current_values,
                offset,
                limit,
            } => {
                let mut job = client.get_job(&id).await?;
                if operations {
                    let mut page = client.operations(&job, offset, limit).await?;
                    if current_values {
                        if let Some(page) = page.as_mut() {
                            let updated = client.load_current_values(page).await;
                            debug!(job_id = %job.id, updated, "Loaded current values");
                        }
                    }
                    job.set_operations(page);
                }
                write_output(&self.output.format_job(&job, &self.format)?, None)
            }

            JobsCommand::Create {
                name,
                validation_policy,
                execution_policy,
            } => {
                let new_job = self.new_job(name, &validation_policy, &execution_policy)?;
                let job = client.create_job(&new_job).await?;
                write_output(&self.output.format_job(&job, &self.format)?, None)
            }

            JobsCommand::Submit {
                file,
                name,
                flow,
                validation_policy,
                execution_policy,
                keep_file,
            } => {
                let path = match file {
                    Some(file) => self.resolve_import_file(&file)?,
                    None => self.pick_import_file()?,
                };
                let flow = match flow {
                    Some(flow) => self.config.new_job_flow(&flow)?,
                    None => self
                        .config
                        .allowed_new_job_execution_flows
                        .first()
                        .cloned()
                        .ok_or_else(|| AppError::Config("no execution flow allowed for new jobs".to_string()))?,
                };
                let name = name.or_else(|| {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                });
                let new_job = self.new_job(name, &validation_policy, &execution_policy)?;

                let mut job = client.create_job(&new_job).await?;
                client.upload_file(&mut job, &path).await?;
                client
                    .execute(
                        &mut job,
                        &flow,
                        &new_job.validation_policy,
                        &new_job.execution_policy,
                    )
                    .await?;
                info!(job_id = %job.id, file = %path.display(), flow = %flow, "Submitted import job");

                if !keep_file && self.config.file_cleanup_interval > 0 {
                    let cleaner = FileCleaner::new(
                        self.config.work_dir(),
                        Arc::new(client.clone()),
                        self.config.cleaner_config(false),
                    );
                    cleaner.add_file(&job.id, &path).await?;
                }

                write_output(&self.output.format_job(&job, &self.format)?, None)
            }

            JobsCommand::Execute {
                id,
                flow,
                validation_policy,
                execution_policy,
            } => {
                let flow = match flow {
                    Some(flow) => self.config.execution_flow(&flow)?,
                    None => {
                        let labels: Vec<String> = self.config.execution_flows.keys().cloned().collect();
                        let label = Select::new("Execution flow:", labels).prompt()?;
                        self.config.execution_flow(&label)?
                    }
                };
                let policies = self.new_job(None, &validation_policy, &execution_policy)?;

                let mut job = client.get_job(&id).await?;
                client
                    .execute(
                        &mut job,
                        &flow,
                        &policies.validation_policy,
                        &policies.execution_policy,
                    )
                    .await?;
                write_output(&self.output.format_job(&job, &self.format)?, None)
            }
        }
    }

    pub async fn undo(&mut self, command: UndoCommand) -> Result<()> {
        if !self.config.enable_job_undo {
            return Err(AppError::invalid_input(
                "job undo is disabled, set enable_job_undo in the configuration",
            ));
        }
        let undo = UndoClient::new(self.connect().await?);

        match command {
            UndoCommand::List { job } => {
                let jobs = undo.get_jobs(job.as_deref()).await?;
                write_output(&self.output.format_undo_jobs(&jobs, &self.format)?, None)
            }

            UndoCommand::Create { job } => {
                let previous = undo.undo_jobs_for_import(&job).await?;
                if !previous.is_empty() {
                    warn!(import_job = %job, undo_jobs = ?previous, "Import job was already undone");
                }
                let undo_id = undo.undo_import_job(&job).await?;
                let message = format!("Undo job {undo_id} created for import job {job}");
                write_output(&self.output.format_message(&message, &self.format)?, None)
            }

            UndoCommand::Download { id, file } => {
                let job = undo.get_job(&id).await?;
                if !job.is_successful() {
                    warn!(undo_job = %id, status = %job.status, "Undo job did not complete");
                }
                let dest = file.unwrap_or_else(|| self.config.work_dir().join(format!("undo_{id}.txt")));
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }

                let mut writer = tokio::fs::File::create(&dest).await?;
                let written = undo.save_file(&job, &mut writer).await?;
                writer.flush().await?;

                let message = format!("Saved {written} bytes of undo job {id} to {}", dest.display());
                write_output(&self.output.format_message(&message, &self.format)?, None)
            }
        }
    }

    pub async fn cleanup(
        &mut self,
        daemon: bool,
        interval: Option<u64>,
        retention_days: Option<u64>,
    ) -> Result<()> {
        if let Some(interval) = interval {
            self.config.file_cleanup_interval = interval;
        }
        if let Some(days) = retention_days {
            self.config.file_retention_days = days;
        }
        let client = CmImportClient::new(self.connect().await?);
        let work_dir = self.config.work_dir();

        if !daemon {
            let cleaner = FileCleaner::new(&work_dir, Arc::new(client), self.config.cleaner_config(false));
            let report = cleaner.clean_files().await?;
            return write_output(&self.output.format_sweep(&report, &self.format)?, None);
        }

        if self.config.file_cleanup_interval == 0 {
            return Err(AppError::invalid_input(
                "periodic cleanup needs a file_cleanup_interval greater than 0",
            ));
        }
        let cleaner = FileCleaner::new(&work_dir, Arc::new(client), self.config.cleaner_config(true));
        let message = format!(
            "Cleaning up {} every {} seconds, press Ctrl-C to stop",
            work_dir.display(),
            self.config.file_cleanup_interval
        );
        write_output(&self.output.format_message(&message, &self.format)?, None)?;

        tokio::signal::ctrl_c().await?;
        info!("Interrupted, stopping the file cleaner");
        cleaner.shutdown();
        Ok(())
    }

    /// Log out of ENM if a session was opened.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Open the session on first use.
    ///
    /// Without a user name the SSO cookie is tried first; when it is missing,
    /// or the login is refused, the user is prompted for credentials.
    async fn connect(&mut self) -> Result<Arc<NbiSession>> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        let mut username = self.config.username.clone().filter(|u| !u.is_empty());
        let mut password = self.password.clone();
        if username.is_some() && password.is_none() {
            password = Some(prompt_password()?);
        }

        let mut attempts = 0;
        loop {
            let mut session_config = self.config.session_config(password.clone());
            session_config.username = username.clone();
            let session = NbiSession::new(session_config);

            match session.open().await {
                Ok(()) => {
                    let session = Arc::new(session);
                    self.session = Some(session.clone());
                    return Ok(session);
                }
                Err(cm_import::Error::MissingCredentials) if attempts < MAX_LOGIN_ATTEMPTS => {
                    warn!("No SSO session available, please log in");
                }
                Err(cm_import::Error::Login(reason)) if attempts + 1 < MAX_LOGIN_ATTEMPTS => {
                    warn!(%reason, "Login failed");
                }
                Err(e) => return Err(e.into()),
            }

            attempts += 1;
            if username.is_none() {
                username = Some(Text::new("Username:").prompt()?);
            }
            password = Some(prompt_password()?);
        }
    }

    fn new_job(
        &self,
        name: Option<String>,
        validation_policy: &[String],
        execution_policy: &[String],
    ) -> Result<NewJob> {
        Ok(NewJob {
            name,
            validation_policy: validation_policy
                .iter()
                .map(|p| self.config.validation_policy(p))
                .collect::<Result<_>>()?,
            execution_policy: execution_policy
                .iter()
                .map(|p| self.config.execution_policy(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Relative paths that do not exist as given are looked up in the search
    /// path; the result is absolute so the cleanup registry can find it later.
    fn resolve_import_file(&self, file: &Path) -> Result<PathBuf> {
        let candidate = if file.is_relative() && !file.exists() {
            self.config.search_path().join(file)
        } else {
            file.to_path_buf()
        };
        if !candidate.is_file() {
            return Err(AppError::invalid_input(format!(
                "import file not found: {}",
                candidate.display()
            )));
        }
        Ok(std::fs::canonicalize(candidate)?)
    }

    fn pick_import_file(&self) -> Result<PathBuf> {
        let dir = self.config.search_path();
        let files = list_import_files(&dir, &self.config.default_file_filter)?;
        if files.is_empty() {
            return Err(AppError::invalid_input(format!(
                "no import files found in {}",
                dir.display()
            )));
        }
        let choice = Select::new("Import file:", files).prompt()?;
        Ok(std::fs::canonicalize(dir.join(choice))?)
    }
}

fn prompt_password() -> Result<String> {
    Ok(Password::new("Password:").without_confirmation().prompt()?)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪"]),
    );
    pb.set_message(message);
    pb
}

/// Parse a date given on the command line.
///
/// A bare date as the end of an interval covers that whole day.
fn parse_date(input: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let instant = cm_import::parse_timestamp(input)?;
    let bare_date = !input.trim().contains(['T', 't', ' ']);
    if end_of_day && bare_date {
        Ok(instant + TimeDelta::days(1) - TimeDelta::milliseconds(1))
    } else {
        Ok(instant)
    }
}

/// Sorted names of the regular files in `dir` matching the wildcard `filter`.
fn list_import_files(dir: &Path, filter: &str) -> Result<Vec<String>> {
    let pattern = if filter.is_empty() {
        None
    } else {
        Some(wildcard_regex(filter)?)
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern.as_ref().is_none_or(|re| re.is_match(&name)) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Compile a file name filter where `*` matches any run of characters and
/// `?` exactly one.
fn wildcard_regex(filter: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(filter.len() + 2);
    pattern.push('^');
    for c in filter.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| AppError::invalid_input(format!("invalid file filter '{filter}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("*.txt", "import.txt", true)]
    #[case("*.txt", "import.xml", false)]
    #[case("bulk_??.txt", "bulk_01.txt", true)]
    #[case("bulk_??.txt", "bulk_1.txt", false)]
    #[case("*a*b", "xaYYb", true)]
    #[case("*a*b", "xaYYbc", false)]
    #[case("*", "", true)]
    #[case("import[1].txt", "import[1].txt", true)]
    #[case("import[1].txt", "import1.txt", false)]
    #[case("a.b", "axb", false)]
    fn wildcards(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(wildcard_regex(pattern).unwrap().is_match(name), expected);
    }

    #[test]
    fn bare_end_date_covers_the_day() {
        let end = parse_date("2024-03-05", true).unwrap();
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap() + TimeDelta::milliseconds(999)
        );

        let start = parse_date("2024-03-05", false).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());

        let exact = parse_date("2024-03-05T10:00:00Z", true).unwrap();
        assert_eq!(exact, Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap());
    }

    #[test]
    fn lists_only_matching_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub.txt")).unwrap();

        assert_eq!(list_import_files(dir.path(), "*.txt").unwrap(), ["a.txt", "b.txt"]);
        assert_eq!(list_import_files(dir.path(), "").unwrap().len(), 3);
    }

    #[test]
    fn relative_file_falls_back_to_search_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bulk-import-xyz.txt"), "create").unwrap();
        let config = AppConfig {
            search_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let executor = CommandExecutor::new(config, None, OutputFormat::Pretty, false);

        let resolved = executor
            .resolve_import_file(Path::new("bulk-import-xyz.txt"))
            .unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("bulk-import-xyz.txt"));
        assert!(executor.resolve_import_file(Path::new("missing.txt")).is_err());
    }
}
