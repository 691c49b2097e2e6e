//! Configuration management for unitd.
//!
//! Every setting has a built-in default matching the conventional systemd
//! layout, so the configuration file is optional. When present it is YAML and
//! may reference environment variables as `$VAR` or `${VAR}`.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::{constants, error::UnitError};

/// Daemon configuration as read from disk.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Searched second for `<name>.service`.
    pub system_unit_dir: PathBuf,
    /// Searched first for `<name>.service`.
    pub user_unit_dir: PathBuf,
    /// Directory of enablement symlinks.
    pub enablement_dir: PathBuf,
    /// Control socket path.
    pub socket_path: PathBuf,
    /// Working directory for units that do not set `WorkingDirectory`.
    pub default_working_directory: PathBuf,
    /// Grace period before a stop escalates to SIGKILL (e.g. "5s").
    pub stop_timeout: String,
    /// Delay before each restart attempt (e.g. "5s").
    pub restart_delay: String,
    /// Restart budget granted to each externally requested start.
    pub restart_attempts: u32,
    /// Reaper polling interval (e.g. "1s").
    pub reaper_interval: String,
    /// Enabled units that are never started at boot.
    pub boot_skip: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_unit_dir: PathBuf::from(constants::SYSTEM_UNIT_DIR),
            user_unit_dir: PathBuf::from(constants::USER_UNIT_DIR),
            enablement_dir: PathBuf::from(constants::ENABLEMENT_DIR),
            socket_path: PathBuf::from(constants::SOCKET_PATH),
            default_working_directory: PathBuf::from(constants::DEFAULT_WORKING_DIRECTORY),
            stop_timeout: format_secs(constants::STOP_TIMEOUT),
            restart_delay: format_secs(constants::RESTART_DELAY),
            restart_attempts: constants::RESTART_ATTEMPTS,
            reaper_interval: format_secs(constants::REAPER_INTERVAL),
            boot_skip: constants::BOOT_SKIP_UNITS
                .iter()
                .map(|unit| unit.to_string())
                .collect(),
        }
    }
}

fn format_secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Timings derived from a [`Config`], validated once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub stop_timeout: Duration,
    pub restart_delay: Duration,
    pub restart_attempts: u32,
    pub reaper_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_timeout: constants::STOP_TIMEOUT,
            restart_delay: constants::RESTART_DELAY,
            restart_attempts: constants::RESTART_ATTEMPTS,
            reaper_interval: constants::REAPER_INTERVAL,
        }
    }
}

impl Config {
    /// Parses the duration fields.
    pub fn timings(&self) -> Result<Timings, UnitError> {
        Ok(Timings {
            stop_timeout: parse_duration(&self.stop_timeout)?,
            restart_delay: parse_duration(&self.restart_delay)?,
            restart_attempts: self.restart_attempts,
            reaper_interval: parse_duration(&self.reaper_interval)?,
        })
    }

    /// Rebases every directory under `root`. Used to run against a scratch tree.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        let rebase = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));
        Self {
            system_unit_dir: rebase(&defaults.system_unit_dir),
            user_unit_dir: rebase(&defaults.user_unit_dir),
            enablement_dir: rebase(&defaults.enablement_dir),
            socket_path: rebase(&defaults.socket_path),
            default_working_directory: rebase(&defaults.default_working_directory),
            ..defaults
        }
    }
}

/// Parses a duration string in the format `<number>[ms|s|m|h]`. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, UnitError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(UnitError::Config("Duration value cannot be empty".into()));
    }

    let invalid = || UnitError::Config(format!("Invalid duration value: '{raw}'"));

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, UnitError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| UnitError::Config(err.to_string()))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(UnitError::Config(format!(
            "Missing environment variable: {var_name}"
        ))),
        None => Ok(result.into_owned()),
    }
}

/// Picks the configuration file to read, if any.
///
/// An explicit path wins, then `UNITD_CONFIG`, then the default location when it exists.
pub fn config_location(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(path) = env::var(constants::CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let default = Path::new(constants::DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

/// Loads the configuration, falling back to defaults when no file is configured.
pub fn load_config(config_path: Option<&str>) -> Result<Config, UnitError> {
    let Some(path) = config_location(config_path) else {
        debug!("No configuration file found; using built-in defaults");
        return Ok(Config::default());
    };

    let content = fs::read_to_string(&path).map_err(|e| {
        UnitError::Io(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let config: Config = if expanded.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&expanded)?
    };

    config.timings()?;
    debug!("Loaded configuration from {:?}", path);
    Ok(config)
}
