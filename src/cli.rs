//! Command-line interface for the `systemctl` binary.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::ipc::{ControlRequest, Operation};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// systemd-compatible control tool and supervisor daemon.
#[derive(Parser, Debug)]
#[command(name = "systemctl", author, disable_version_flag = true)]
#[command(about = "Minimal service supervisor speaking a systemctl-like command line", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the daemon configuration file.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<String>,

    /// Print the systemd compatibility banner and exit.
    #[arg(long)]
    pub version: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start a service at every daemon boot.
    Enable {
        /// Service name, with or without the `.service` suffix.
        service: String,
    },
    /// Stop starting a service at boot.
    Disable { service: String },
    /// Start a service, restarting it if it is already running.
    Start { service: String },
    /// Stop a running service.
    Stop { service: String },
    /// Restart a service with a fresh restart budget.
    Restart { service: String },
    /// Print `running` or `exited`.
    Status { service: String },
    /// Run the supervisor daemon in the foreground.
    Domain,
}

impl Commands {
    /// The socket request for client commands; `None` for `domain`.
    pub fn request(&self) -> Option<ControlRequest> {
        let (operation, service) = match self {
            Commands::Enable { service } => (Operation::Enable, service),
            Commands::Disable { service } => (Operation::Disable, service),
            Commands::Start { service } => (Operation::Start, service),
            Commands::Stop { service } => (Operation::Stop, service),
            Commands::Restart { service } => (Operation::Restart, service),
            Commands::Status { service } => (Operation::Status, service),
            Commands::Domain => return None,
        };
        Some(ControlRequest::new(operation, service.as_str()))
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
