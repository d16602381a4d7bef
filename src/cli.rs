// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `taskgate`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskgate",
    version,
    about = "Run the pre/post/error task chains of file-transfer rules.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskgate.toml` in the current working directory.
    #[arg(long, global = true, value_name = "PATH", default_value = "Taskgate.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKGATE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load and validate the configuration, then validate every task of
    /// every rule. Nothing is executed.
    Check,

    /// Run one chain of a rule against a transfer described in a TOML file.
    Run {
        /// Rule name.
        #[arg(long, value_name = "NAME")]
        rule: String,

        /// Rule direction, needed when the name is used by both a send and
        /// a receive rule.
        #[arg(long, value_name = "DIR")]
        direction: Option<crate::types::Direction>,

        /// Chain to run.
        #[arg(long, value_enum, default_value = "pre")]
        chain: ChainArg,

        /// Transfer description (TOML).
        #[arg(long, value_name = "PATH")]
        transfer: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ChainArg {
    Pre,
    Post,
    Error,
}

impl From<ChainArg> for crate::types::Chain {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Pre => crate::types::Chain::Pre,
            ChainArg::Post => crate::types::Chain::Post,
            ChainArg::Error => crate::types::Chain::Error,
        }
    }
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
