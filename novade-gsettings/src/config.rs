//! Environment-derived configuration.
//!
//! Every input the engine takes from the process environment is captured
//! once in an [`EnvironmentConfig`] and shared as `Arc<EnvironmentConfig>`.
//! Library code never consults `std::env` directly, so tests can build a
//! configuration from a plain map with [`EnvironmentConfig::from_lookup`].
//!
//! | Variable               | Field                  |
//! |------------------------|------------------------|
//! | `GSETTINGS_SCHEMA_DIR` | `schema_dir_overrides` |
//! | `XDG_DATA_DIRS`        | `data_dirs`            |
//! | `XDG_DATA_HOME`        | `data_home`            |
//! | `XDG_CONFIG_HOME`      | `config_home`          |
//! | `GSETTINGS_BACKEND`    | `backend`              |
//! | `XDG_CURRENT_DESKTOP`  | `current_desktops`     |

use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_DATA_DIRS: &str = "/usr/local/share:/usr/share";

/// Snapshot of the settings-related environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentConfig {
    /// Directories scanned before any data directory.
    pub schema_dir_overrides: Vec<PathBuf>,
    /// System data directories, each searched under `glib-2.0/schemas`.
    pub data_dirs: Vec<PathBuf>,
    /// User data directory, always searched last.
    pub data_home: PathBuf,
    /// Root of the keyfile and dconf user database.
    pub config_home: PathBuf,
    /// Requested backend name, if any.
    pub backend: Option<String>,
    /// Desktop identifiers in preference order.
    pub current_desktops: Vec<String>,
}

impl EnvironmentConfig {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup. Empty
    /// values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let home = var("HOME").map(PathBuf::from).or_else(dirs::home_dir).unwrap_or_default();

        let data_dirs = var("XDG_DATA_DIRS").unwrap_or_else(|| DEFAULT_DATA_DIRS.to_string());

        EnvironmentConfig {
            schema_dir_overrides: var("GSETTINGS_SCHEMA_DIR")
                .map(|dirs| split_paths(&dirs))
                .unwrap_or_default(),
            data_dirs: split_paths(&data_dirs),
            data_home: var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".local").join("share")),
            config_home: var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".config")),
            backend: var("GSETTINGS_BACKEND"),
            current_desktops: var("XDG_CURRENT_DESKTOP")
                .map(|desktops| {
                    desktops
                        .split(':')
                        .filter(|d| !d.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Location of the keyfile backend's storage.
    pub fn keyfile_path(&self) -> PathBuf {
        self.config_home
            .join("glib-2.0")
            .join("settings")
            .join("keyfile")
    }

    /// Location of the dconf user database.
    pub fn dconf_user_db(&self) -> PathBuf {
        self.config_home.join("dconf").join("user")
    }
}

fn split_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Logging settings for the command-line front end.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error` (case-insensitive).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
