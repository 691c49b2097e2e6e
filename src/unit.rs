//! Unit file deserialization.
//!
//! Turns systemd unit text into a flat list of `(section, name, value)` options.
//! Nothing here knows what the options mean; the supervisor only ever asks for a
//! value through [`OptionSource`].

use std::io::{BufRead, BufReader, Read};

use crate::error::UnitError;

/// Read-only access to the options of a parsed unit.
pub trait OptionSource {
    /// Returns the value of `section.key`, or `None` if the unit does not set it.
    fn option(&self, section: &str, key: &str) -> Option<&str>;
}

/// A single `Key=Value` assignment and the section it appeared in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOption {
    pub section: String,
    pub name: String,
    pub value: String,
}

/// All options of one unit file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFile {
    options: Vec<UnitOption>,
}

impl UnitFile {
    /// Parses unit text from any reader.
    pub fn deserialize<R: Read>(reader: R) -> Result<Self, UnitError> {
        let reader = BufReader::new(reader);
        let mut options = Vec::new();
        let mut section: Option<String> = None;
        let mut pending: Option<(usize, String)> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;

            // Continuation lines are glued onto the assignment that started them.
            let (start, logical) = match pending.take() {
                Some((start, mut buffered)) => {
                    buffered.push(' ');
                    buffered.push_str(line.trim());
                    (start, buffered)
                }
                None => (number, line.trim().to_string()),
            };

            if let Some(stripped) = logical.strip_suffix('\\') {
                pending = Some((start, stripped.trim_end().to_string()));
                continue;
            }

            if logical.is_empty() || logical.starts_with('#') || logical.starts_with(';') {
                continue;
            }

            if logical.starts_with('[') {
                let name = logical
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| UnitError::UnitParse {
                        line: start,
                        reason: format!("malformed section header '{logical}'"),
                    })?;
                section = Some(name.to_string());
                continue;
            }

            let Some(current) = section.as_ref() else {
                return Err(UnitError::UnitParse {
                    line: start,
                    reason: "assignment outside of any section".into(),
                });
            };

            let Some((key, value)) = logical.split_once('=') else {
                return Err(UnitError::UnitParse {
                    line: start,
                    reason: format!("expected 'Key=Value', found '{logical}'"),
                });
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(UnitError::UnitParse {
                    line: start,
                    reason: "empty option name".into(),
                });
            }

            options.push(UnitOption {
                section: current.clone(),
                name: key.to_string(),
                value: value.trim().to_string(),
            });
        }

        if let Some((start, _)) = pending {
            return Err(UnitError::UnitParse {
                line: start,
                reason: "line continuation at end of file".into(),
            });
        }

        Ok(Self { options })
    }

    /// Parses unit text held in memory.
    pub fn parse(content: &str) -> Result<Self, UnitError> {
        Self::deserialize(content.as_bytes())
    }

    /// Every option in file order.
    pub fn options(&self) -> &[UnitOption] {
        &self.options
    }
}

impl OptionSource for UnitFile {
    /// The first assignment wins when a key is repeated.
    fn option(&self, section: &str, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|option| option.section == section && option.name == key)
            .map(|option| option.value.as_str())
    }
}
