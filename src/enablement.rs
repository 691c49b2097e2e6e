//! Enablement store: one symlink per service that should start at boot.
use std::{
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{constants::UNIT_SUFFIX, error::UnitError};

/// Symlink directory recording which services are enabled.
#[derive(Debug, Clone)]
pub struct EnablementStore {
    dir: PathBuf,
}

impl EnablementStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the symlink for `service`.
    pub fn link_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}{UNIT_SUFFIX}"))
    }

    /// Links `unit_path` into the enablement directory.
    pub fn enable(&self, service: &str, unit_path: &Path) -> Result<PathBuf, UnitError> {
        if !is_plain_name(service) {
            return Err(UnitError::UnitNotFound(service.to_string()));
        }

        fs::create_dir_all(&self.dir)?;
        let link = self.link_path(service);
        match symlink(unit_path, &link) {
            Ok(()) => {
                info!("Enabled {service}: {:?} -> {:?}", link, unit_path);
                Ok(link)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(UnitError::AlreadyEnabled(service.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the symlink for `service`.
    pub fn disable(&self, service: &str) -> Result<(), UnitError> {
        if !is_plain_name(service) {
            return Err(UnitError::NotEnabled(service.to_string()));
        }

        let link = self.link_path(service);
        match fs::remove_file(&link) {
            Ok(()) => {
                info!("Disabled {service}: removed {:?}", link);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(UnitError::NotEnabled(service.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a symlink (even a dangling one) exists for `service`.
    pub fn is_enabled(&self, service: &str) -> bool {
        is_plain_name(service) && fs::symlink_metadata(self.link_path(service)).is_ok()
    }

    /// Names of enabled services, sorted, excluding `skip`.
    ///
    /// A missing directory is an empty set.
    pub fn enabled_services(&self, skip: &[String]) -> Result<Vec<String>, UnitError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("Enablement directory {:?} does not exist", self.dir);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut services = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(service) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(UNIT_SUFFIX))
                .filter(|name| !name.is_empty())
            else {
                continue;
            };

            if skip.iter().any(|skipped| skipped == service) {
                debug!("Skipping reserved unit '{service}' at boot");
                continue;
            }

            services.push(service.to_string());
        }

        services.sort();
        Ok(services)
    }
}

fn is_plain_name(service: &str) -> bool {
    !service.is_empty() && !service.contains('/') && !service.contains('\0')
}
