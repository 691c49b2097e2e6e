//! Error handling for unitd.
use thiserror::Error;

/// Defines all possible errors raised by a supervision operation.
///
/// The `Display` text of every variant is what a client sees on the control socket.
#[derive(Debug, Error)]
pub enum UnitError {
    /// No `<name>.service` exists in any unit directory.
    #[error("no service found")]
    UnitNotFound(String),

    /// `stop` was requested for a service without a registry entry.
    #[error("service is not run")]
    NotRunning(String),

    /// `disable` was requested for a service without an enablement symlink.
    #[error("service '{0}' is not enabled")]
    NotEnabled(String),

    /// `enable` was requested for a service that already has a symlink.
    #[error("service '{0}' is already enabled")]
    AlreadyEnabled(String),

    /// The unit file text could not be deserialized.
    #[error("failed to parse service file: line {line}: {reason}")]
    UnitParse {
        /// One-based line number of the offending line.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// `ExecStart` is missing or resolves to no tokens.
    #[error("ExecStart not found")]
    MissingExecStart(String),

    /// The service executable could not be spawned.
    #[error("Failed to start service '{service}': {source}")]
    LaunchFailure {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A termination or kill signal could not be delivered.
    #[error("Failed to signal service '{service}': {source}")]
    SignalFailure {
        /// The service that was being signalled.
        service: String,
        /// The underlying errno.
        #[source]
        source: nix::errno::Errno,
    },

    /// Filesystem error while reading units or maintaining symlinks.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Invalid daemon configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid YAML in the daemon configuration file.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),
}
