use crate::config::LogLevel;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "importconsole",
    about = "Importconsole - CM Import utility for ENM",
    long_about = "Create, execute, search and undo ENM CM Import jobs, and clean up the import files they consumed.",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, env = "IMPORTCONSOLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// ENM's domain URL, e.g. https://enm.example.com
    #[arg(long, global = true, env = "IMPORTCONSOLE_URL")]
    pub url: Option<String>,

    /// User name to authenticate against ENM
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password to authenticate against ENM; prompted for when omitted
    #[arg(short, long, global = true, env = "IMPORTCONSOLE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Work directory holding the cleanup registry and the log file
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// NBI base URI
    #[arg(long, global = true, hide = true)]
    pub nbi_base_uri: Option<String>,

    /// Write a log file to the work directory
    #[arg(long, global = true, value_enum)]
    pub log: Option<LogLevel>,

    /// Enable verbose logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage import jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Manage undo jobs of executed imports
    Undo {
        #[command(subcommand)]
        command: UndoCommand,
    },

    /// Delete import files of finished jobs
    Cleanup {
        /// Keep running and clean up periodically until interrupted
        #[arg(long)]
        daemon: bool,

        /// Seconds between two clean ups in daemon mode
        #[arg(long)]
        interval: Option<u64>,

        /// Days to keep the files of jobs that failed
        #[arg(long)]
        retention_days: Option<u64>,
    },

    /// Show or reset the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List the newest jobs
    List {
        /// Number of jobs, defaults to `list_buffer_size`
        #[arg(short, long)]
        limit: Option<u64>,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Only jobs of this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Search jobs created within a date interval
    Search {
        /// Start of the interval, e.g. 2024-01-10 or 2024-01-10T08:00:00Z
        #[arg(long)]
        from: String,

        /// End of the interval, defaults to now
        #[arg(long)]
        to: Option<String>,

        /// Case-insensitive part of the job name
        #[arg(long)]
        name: Option<String>,

        /// Exact user id
        #[arg(long)]
        user: Option<String>,
    },

    /// Show one job
    Show {
        id: String,

        /// Include the operations of the job
        #[arg(long)]
        operations: bool,

        /// Compare attributes with their current value on the nodes
        #[arg(long, requires = "operations")]
        current_values: bool,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long, default_value_t = 50)]
        limit: u64,
    },

    /// Create an empty job
    Create {
        #[arg(short, long)]
        name: Option<String>,

        /// Validation policy label or value, repeatable
        #[arg(long = "validation-policy")]
        validation_policy: Vec<String>,

        /// Execution policy label or value, repeatable
        #[arg(long = "execution-policy")]
        execution_policy: Vec<String>,
    },

    /// Create a job for a file, upload it and start it
    Submit {
        /// Import file, relative paths resolve against `search_path`; picked
        /// interactively when omitted
        file: Option<PathBuf>,

        #[arg(short, long)]
        name: Option<String>,

        /// Execution flow, one of `allowed_new_job_execution_flows`
        #[arg(long)]
        flow: Option<String>,

        #[arg(long = "validation-policy")]
        validation_policy: Vec<String>,

        #[arg(long = "execution-policy")]
        execution_policy: Vec<String>,

        /// Keep the file after the job finished
        #[arg(long)]
        keep_file: bool,
    },

    /// Run an execution flow on an existing job
    Execute {
        id: String,

        /// Execution flow label or value
        #[arg(long)]
        flow: Option<String>,

        #[arg(long = "validation-policy")]
        validation_policy: Vec<String>,

        #[arg(long = "execution-policy")]
        execution_policy: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum UndoCommand {
    /// List undo jobs
    List {
        /// Only undo jobs of this import job
        #[arg(long)]
        job: Option<String>,
    },

    /// Generate an undo job for an executed import job
    Create { job: String },

    /// Download the undo file of an undo job
    Download {
        id: String,

        /// Destination file, defaults to `undo_<id>.txt` in the work directory
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable text
    Pretty,
    /// Table
    Table,
    /// Pretty-printed JSON
    Json,
}
