//! Service definitions resolved from unit files on disk.
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use strum_macros::{AsRefStr, EnumString};
use tracing::debug;

use crate::{
    constants::{
        ENV_REFERENCE_SIGIL, EXEC_START_KEY, RESTART_KEY, SERVICE_SECTION, UNIT_SUFFIX,
        WORKING_DIRECTORY_KEY,
    },
    error::UnitError,
    unit::{OptionSource, UnitFile},
};

/// When a service is relaunched after its process exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RestartPolicy {
    /// Relaunch regardless of exit code.
    Always,
    /// Relaunch unless the process exited with code 0.
    OnFailure,
    /// No policy configured.
    #[default]
    Never,
}

impl RestartPolicy {
    /// Interprets a `Restart=` value. Unknown or missing values fall back to the default.
    pub fn from_option(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or_default()
    }
}

/// Everything needed to launch one service, built fresh on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub executable: String,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub restart_policy: RestartPolicy,
}

impl ServiceDefinition {
    /// Extracts a definition from parsed unit options.
    ///
    /// `lookup` resolves `$VAR` references inside `ExecStart`; references to unset
    /// or empty variables are dropped from the command line.
    pub fn from_options<S, F>(
        service: &str,
        unit: &S,
        default_working_directory: &Path,
        lookup: F,
    ) -> Result<Self, UnitError>
    where
        S: OptionSource + ?Sized,
        F: Fn(&str) -> Option<String>,
    {
        let exec_start = unit
            .option(SERVICE_SECTION, EXEC_START_KEY)
            .ok_or_else(|| UnitError::MissingExecStart(service.to_string()))?;

        let mut tokens = exec_start
            .split_whitespace()
            .filter_map(|token| substitute_token(token, &lookup));

        let executable = tokens
            .next()
            .ok_or_else(|| UnitError::MissingExecStart(service.to_string()))?;
        let arguments = tokens.collect();

        let working_directory = unit
            .option(SERVICE_SECTION, WORKING_DIRECTORY_KEY)
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_working_directory.to_path_buf());

        let restart_policy = RestartPolicy::from_option(unit.option(SERVICE_SECTION, RESTART_KEY));

        Ok(Self {
            executable,
            arguments,
            working_directory,
            restart_policy,
        })
    }

    /// Human readable command line, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Replaces a `$VAR` or `${VAR}` token with the variable's value.
fn substitute_token<F>(token: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(reference) = token.strip_prefix(ENV_REFERENCE_SIGIL) else {
        return Some(token.to_string());
    };

    let name = reference
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(reference);

    lookup(name).filter(|value| !value.is_empty())
}

/// Finds unit files and loads them into [`ServiceDefinition`]s.
#[derive(Debug, Clone)]
pub struct UnitResolver {
    user_dir: PathBuf,
    system_dir: PathBuf,
    default_working_directory: PathBuf,
}

impl UnitResolver {
    pub fn new(
        user_dir: impl Into<PathBuf>,
        system_dir: impl Into<PathBuf>,
        default_working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user_dir: user_dir.into(),
            system_dir: system_dir.into(),
            default_working_directory: default_working_directory.into(),
        }
    }

    /// Locates `<name>.service`, preferring the user directory over the system one.
    pub fn resolve(&self, service: &str) -> Option<PathBuf> {
        if service.is_empty() || service.contains('/') || service.contains('\0') {
            return None;
        }

        let file_name = format!("{service}{UNIT_SUFFIX}");
        [&self.user_dir, &self.system_dir]
            .into_iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.exists())
    }

    /// Reads a unit file and builds its definition from the current environment.
    pub fn load_path(&self, service: &str, path: &Path) -> Result<ServiceDefinition, UnitError> {
        let content = fs::read_to_string(path)?;
        let unit = UnitFile::parse(&content)?;
        ServiceDefinition::from_options(service, &unit, &self.default_working_directory, |name| {
            env::var(name).ok()
        })
    }

    /// Resolves and loads a service in one step.
    pub fn load(&self, service: &str) -> Result<(PathBuf, ServiceDefinition), UnitError> {
        let path = self
            .resolve(service)
            .ok_or_else(|| UnitError::UnitNotFound(service.to_string()))?;
        debug!("Loading unit for '{service}' from {:?}", path);
        let definition = self.load_path(service, &path)?;
        Ok((path, definition))
    }
}
