// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskdock`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdock",
    version,
    about = "Run tasks inside ephemeral Docker containers declared by a YAML project file.",
    long_about = None
)]
pub struct CliArgs {
    /// Name of the task to run.
    pub task: Option<String>,

    /// Additional arguments appended to the task's command.
    #[arg(last = true, value_name = "ARGS")]
    pub task_args: Vec<String>,

    /// Path to the project file (YAML).
    ///
    /// Default: `taskdock.yml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "taskdock.yml")]
    pub config: String,

    /// List the tasks defined in the project file and exit.
    #[arg(long)]
    pub list_tasks: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDOCK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
