mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod output;

use crate::{
    cli::{Args, Commands, OutputFormat},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
    logging::init_logging,
};
use clap::Parser;
use colored::*;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_format = args.output;

    if let Err(e) = run(args).await {
        match output_format {
            OutputFormat::Json => {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{error_json}");
            }
            _ => eprintln!("{} {}", "Error:".red().bold(), e),
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match &args.command {
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        Commands::Config { show, reset } => {
            if *reset {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("✓ Configuration reset to defaults in {}", path.display());
            } else if *show {
                let config = AppConfig::load(args.config.as_deref())?;
                println!("{}", config.show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if args.url.is_some() {
        config.url = args.url;
    }
    if args.username.is_some() {
        config.username = args.username;
    }
    if args.work_dir.is_some() {
        config.work_dir = args.work_dir;
    }
    if let Some(nbi_base_uri) = args.nbi_base_uri {
        config.nbi_base_uri = nbi_base_uri;
    }
    if args.log.is_some() {
        config.log = args.log;
    }

    // flushes the log file when dropped
    let _guard = init_logging(args.verbose, args.quiet, config.log, &config.work_dir())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        work_dir = %config.work_dir().display(),
        "Starting importconsole"
    );

    let mut executor = CommandExecutor::new(config, args.password, args.output, !args.no_color);
    let result = match args.command {
        Commands::Jobs { command } => executor.jobs(command).await,
        Commands::Undo { command } => executor.undo(command).await,
        Commands::Cleanup {
            daemon,
            interval,
            retention_days,
        } => executor.cleanup(daemon, interval, retention_days).await,
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    };
    executor.close().await;

    if let Err(e) = &result {
        error!("Application error: {}", e);
    }
    result
}
