use crate::error::{AppError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use cm_import::cleanup::CleanerConfig;
use cm_import::job::{
    EXECUTION_MODE_EXECUTE, EXECUTION_MODE_VALIDATE, EXECUTION_MODE_VALIDATE_EXECUTE,
    ON_ERROR_NEXT_NODE, ON_ERROR_NEXT_OPERATION, ON_ERROR_STOP, VALIDATION_INSTANCE_VALIDATION,
    VALIDATION_NO_INSTANCE_VALIDATION,
};
use cm_import::search::DEFAULT_PAGE_SIZE;
use cm_import::session::{DEFAULT_NBI_BASE_URI, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = "importconsole";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// ENM URL; discovered from the scripting VM when unset.
    pub url: Option<String>,
    pub nbi_base_uri: String,
    /// Without a user name the SSO cookie of the scripting VM is used.
    pub username: Option<String>,
    /// Holds the cleanup registry and the log file.
    pub work_dir: Option<PathBuf>,
    /// Where `jobs submit` looks for import files.
    pub search_path: Option<PathBuf>,
    pub default_file_filter: String,
    pub list_buffer_size: u64,
    pub enable_job_undo: bool,
    /// Label to policy value.
    pub validation_policies: BTreeMap<String, String>,
    pub execution_policies: BTreeMap<String, String>,
    pub execution_flows: BTreeMap<String, String>,
    pub allowed_new_job_execution_flows: Vec<String>,
    pub max_days_interval_in_search: i64,
    /// Seconds between cleanup sweeps, 0 disables the periodic cleaner.
    pub file_cleanup_interval: u64,
    pub file_retention_days: u64,
    pub search_page_size: usize,
    pub verify_certificates: bool,
    pub log: Option<LogLevel>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let labelled = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(label, value)| (label.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            url: None,
            nbi_base_uri: DEFAULT_NBI_BASE_URI.to_string(),
            username: None,
            work_dir: None,
            search_path: None,
            default_file_filter: String::new(),
            list_buffer_size: 100,
            enable_job_undo: true,
            validation_policies: labelled(&[
                ("perform MO instance validation", VALIDATION_INSTANCE_VALIDATION),
                ("SKIP MO instance validation", VALIDATION_NO_INSTANCE_VALIDATION),
            ]),
            execution_policies: labelled(&[
                ("stop", ON_ERROR_STOP),
                ("continue next operation", ON_ERROR_NEXT_OPERATION),
                ("continue next node", ON_ERROR_NEXT_NODE),
            ]),
            execution_flows: labelled(&[
                ("execute", EXECUTION_MODE_EXECUTE),
                ("validate", EXECUTION_MODE_VALIDATE),
            ]),
            allowed_new_job_execution_flows: vec![
                EXECUTION_MODE_VALIDATE.to_string(),
                EXECUTION_MODE_VALIDATE_EXECUTE.to_string(),
            ],
            max_days_interval_in_search: 20,
            file_cleanup_interval: 3600,
            file_retention_days: 30,
            search_page_size: DEFAULT_PAGE_SIZE,
            verify_certificates: false,
            log: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load `path`, or the default location; a missing default file yields
    /// the defaults, a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => Ok(Self::default()),
            Err(e) => Err(AppError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Overwrite the configuration file with the defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()
                .ok_or_else(|| AppError::Config("no configuration directory".to_string()))?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn search_path(&self) -> PathBuf {
        self.search_path
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn session_config(&self, password: Option<String>) -> SessionConfig {
        SessionConfig {
            host: self.url.clone().unwrap_or_default(),
            nbi_base_uri: self.nbi_base_uri.clone(),
            username: self.username.clone(),
            password,
            verify_certificates: self.verify_certificates,
            ..Default::default()
        }
    }

    /// Cleaner settings; `periodic` selects the background worker.
    pub fn cleaner_config(&self, periodic: bool) -> CleanerConfig {
        let interval = if periodic {
            Duration::from_secs(self.file_cleanup_interval)
        } else {
            Duration::ZERO
        };
        CleanerConfig::new(interval, self.file_retention_days)
    }

    /// Reject intervals longer than `max_days_interval_in_search`.
    pub fn check_search_interval(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
        if to < from {
            return Err(AppError::invalid_input(
                "the end of the interval is before its start",
            ));
        }
        let max = TimeDelta::days(self.max_days_interval_in_search);
        if to - from > max {
            return Err(AppError::invalid_input(format!(
                "search interval can not exceed {} days",
                self.max_days_interval_in_search
            )));
        }
        Ok(())
    }

    pub fn validation_policy(&self, input: &str) -> Result<String> {
        resolve_choice(&self.validation_policies, input, "validation policy")
    }

    pub fn execution_policy(&self, input: &str) -> Result<String> {
        resolve_choice(&self.execution_policies, input, "execution policy")
    }

    pub fn execution_flow(&self, input: &str) -> Result<String> {
        resolve_choice(&self.execution_flows, input, "execution flow")
    }

    pub fn new_job_flow(&self, input: &str) -> Result<String> {
        if self.allowed_new_job_execution_flows.iter().any(|f| f == input) {
            Ok(input.to_string())
        } else {
            Err(AppError::invalid_input(format!(
                "execution flow '{input}' is not allowed for new jobs, use one of: {}",
                self.allowed_new_job_execution_flows.join(", ")
            )))
        }
    }
}

/// Accept either a label or one of the values of `choices`.
fn resolve_choice(choices: &BTreeMap<String, String>, input: &str, what: &str) -> Result<String> {
    if let Some(value) = choices.get(input) {
        return Ok(value.clone());
    }
    if choices.values().any(|value| value == input) {
        return Ok(input.to_string());
    }
    Err(AppError::invalid_input(format!(
        "unknown {what} '{input}', use one of: {}",
        choices.values().cloned().collect::<Vec<_>>().join(", ")
    )))
}
