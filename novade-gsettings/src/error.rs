//! Error handling for the settings engine.
//!
//! [`SettingsError`] is the single error type returned by every public
//! operation of this crate. Failures that originate in the value codec are
//! reported as [`VariantError`] and wrapped by [`SettingsError::Variant`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use novade_gsettings::{Settings, SettingsError};
//!
//! match settings.get("font-name").await {
//!     Ok(value) => println!("{value}"),
//!     Err(SettingsError::UnknownKey { schema, key }) => eprintln!("{schema} has no {key}"),
//!     Err(e) => return Err(e),
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors produced while resolving, reading or writing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No scanned schema directory provides a table for this schema id.
    #[error("Schema '{0}' is not installed")]
    SchemaNotInstalled(String),

    /// The schema exists but does not declare the requested key.
    #[error("Schema '{schema}' does not contain a key named '{key}'")]
    UnknownKey { schema: String, key: String },

    /// A malformed instance path, or a path that conflicts with the schema's
    /// own `.path` declaration (or is missing for a relocatable schema).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backend was closed and can no longer serve requests.
    #[error("The settings backend has been closed")]
    BackendClosed,

    /// A value written for a key does not have the type of its default.
    #[error("Value for key '{key}' has type '{actual}', expected '{expected}'")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// A value written for a key lies outside the schema's declared range.
    #[error("Value {value} for key '{key}' is outside the range {minimum}..={maximum}")]
    OutOfRange {
        key: String,
        value: String,
        minimum: String,
        maximum: String,
    },

    /// A database file exists but its contents cannot be interpreted.
    #[error("Corrupt database {path:?}: {reason}")]
    CorruptDatabase { path: PathBuf, reason: String },

    /// Filesystem failure while reading or writing a settings artifact.
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure of the D-Bus backed backend.
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    /// Value encoding or decoding failure.
    #[error("Variant error: {0}")]
    Variant(#[from] VariantError),
}

impl SettingsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SettingsError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SettingsError::CorruptDatabase {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while encoding, decoding or parsing GVariant values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariantError {
    /// A type string could not be parsed.
    #[error("Invalid type signature '{0}'")]
    InvalidSignature(String),

    /// Serialized data or a container does not agree with its declared type.
    #[error("Encoding error: {0}")]
    Encoding(#[from] zvariant::Error),

    /// A text-format value could not be parsed.
    #[error("Parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// A value does not have the type the caller asked for.
    #[error("Expected a value of type '{expected}', found '{actual}'")]
    TypeMismatch { expected: String, actual: String },
}
