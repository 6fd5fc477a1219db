//! CLI argument definitions for the save directory tool.

use std::path::PathBuf;

use bastion_persistence::SaveVersion;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "bastion",
    version,
    about = "Inspect, verify and repair save directories",
    long_about = "Inspect, verify and repair directories of .save files.\n\n\
                  Every command works on the files alone; no application state\n\
                  is loaded or modified except by `recover` and `restore`."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the .save files.
    #[arg(long = "save-dir", value_name = "DIR", default_value = "saves", global = true)]
    pub save_dir: PathBuf,

    /// JSON persistence config; its save_dir is replaced by --save-dir.
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Schema version the application currently writes.
    #[arg(
        long = "app-version",
        value_name = "VERSION",
        default_value = "1.0.0",
        global = true
    )]
    pub app_version: SaveVersion,

    /// Print machine-readable JSON instead of tables.
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List primary saves with their version, size and health.
    List,

    /// Show header, document and backup details of one save.
    Inspect(FileArgs),

    /// Check structure, checksums, migration path and validators.
    Verify(VerifyArgs),

    /// Remove leftover temp files and repair damaged saves from backups.
    Recover,

    /// Delete temp files and all but the newest backups of every save.
    Clean(CleanArgs),

    /// List the backups of one save, newest first.
    Backups(FileArgs),

    /// Replace a save with one of its backups.
    Restore(RestoreArgs),
}

#[derive(Args)]
pub struct FileArgs {
    /// Save name, with or without the .save extension.
    #[arg(value_name = "SAVE")]
    pub file: String,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Save to verify; every save in the directory when omitted.
    #[arg(value_name = "SAVE")]
    pub file: Option<String>,

    /// Include per-stage notes.
    #[arg(long = "verbose")]
    pub verbose: bool,

    /// Skip the document validators.
    #[arg(long = "no-validators")]
    pub no_validators: bool,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Backups to keep per save.
    #[arg(long = "keep", value_name = "N", default_value_t = 3)]
    pub keep: usize,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Save to replace.
    #[arg(value_name = "SAVE")]
    pub file: String,

    /// Backup file name as printed by `backups`.
    #[arg(value_name = "BACKUP")]
    pub backup: String,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
