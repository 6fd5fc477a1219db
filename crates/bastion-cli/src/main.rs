//! `bastion`: inspect, verify and repair save directories.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::Result;
use bastion_cli::commands;
use bastion_cli::logging::{LogConfig, LogFormat, init_logging};
use bastion_persistence::VerifyOptions;
use clap::{ColorChoice, Parser};
use serde::Serialize;
use tracing::level_filters::LevelFilter;

mod cli;
mod summary;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.color.write_global();
    if let Err(error) = init_logging(&log_config_from_cli(&cli)) {
        eprintln!("error: failed to initialize logging: {error}");
        return ExitCode::FAILURE;
    }
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "command failed");
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command. `Ok(false)` means it ran but found problems.
fn run(cli: &Cli) -> Result<bool> {
    let orchestrator =
        commands::open(&cli.save_dir, cli.config.as_deref(), cli.app_version.clone())?;

    match &cli.command {
        Command::List => {
            let saves = commands::list(&orchestrator)?;
            emit(cli, saves.as_slice(), summary::print_list)?;
            Ok(saves.iter().all(|s| s.intact))
        }
        Command::Inspect(args) => {
            let info = commands::inspect(&orchestrator, &args.file)?;
            emit(cli, &info, summary::print_info)?;
            Ok(info.intact)
        }
        Command::Verify(args) => {
            let options = VerifyOptions {
                verbose: args.verbose,
                run_validators: !args.no_validators,
                ..VerifyOptions::default()
            };
            let reports = commands::verify(&orchestrator, args.file.as_deref(), options)?;
            emit(cli, reports.as_slice(), |reports| {
                for report in reports {
                    summary::print_verification(report);
                }
            })?;
            Ok(reports.iter().all(|r| r.is_valid()))
        }
        Command::Recover => {
            let report = commands::recover(&orchestrator)?;
            emit(cli, &report, summary::print_recovery)?;
            Ok(report.unrecoverable.is_empty())
        }
        Command::Clean(args) => {
            let cleaned = commands::clean(&orchestrator, args.keep)?;
            emit(cli, &cleaned, summary::print_clean)?;
            Ok(true)
        }
        Command::Backups(args) => {
            let backups = commands::backups(&orchestrator, &args.file)?;
            emit(cli, backups.as_slice(), |backups| {
                summary::print_backups(&args.file, backups);
            })?;
            Ok(true)
        }
        Command::Restore(args) => {
            let result = commands::restore(&orchestrator, &args.file, &args.backup)?;
            emit(cli, &result, summary::print_restore)?;
            Ok(true)
        }
    }
}

/// Print `value` as JSON with `--json`, otherwise with `print`.
fn emit<T, F>(cli: &Cli, value: &T, print: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T),
{
    if cli.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
