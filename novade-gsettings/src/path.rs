//! Storage path validation and resolution.
//!
//! A fixed schema names its storage path in the compiled `.path` entry; a
//! relocatable schema leaves it out and every instance supplies one. Exactly
//! one of the two must be present.

use crate::error::{Result, SettingsError};
use crate::schema::SchemaTable;

/// Checks the shape of an instance path: non-empty, starts and ends with
/// `/`, no empty segments.
pub fn validate_path(path: &str) -> Result<()> {
    let problem = if path.is_empty() {
        Some("path must not be empty")
    } else if !path.starts_with('/') {
        Some("path must start with '/'")
    } else if !path.ends_with('/') {
        Some("path must end with '/'")
    } else if path.contains("//") {
        Some("path must not contain '//'")
    } else {
        None
    };
    match problem {
        Some(reason) => Err(SettingsError::InvalidConfiguration(format!(
            "Invalid path '{path}': {reason}"
        ))),
        None => Ok(()),
    }
}

/// The absolute path under which `table`'s keys are stored.
pub fn resolve_path(table: &SchemaTable, instance_path: Option<&str>) -> Result<String> {
    match (table.path()?, instance_path) {
        (Some(fixed), None) => Ok(fixed),
        (None, Some(path)) => Ok(path.to_string()),
        (Some(fixed), Some(path)) => Err(SettingsError::InvalidConfiguration(format!(
            "Schema '{}' has the fixed path '{fixed}' but the path '{path}' was given",
            table.id()
        ))),
        (None, None) => Err(SettingsError::InvalidConfiguration(format!(
            "Schema '{}' is relocatable and requires a path",
            table.id()
        ))),
    }
}
