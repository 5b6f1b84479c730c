//! Storage backends.
//!
//! A backend is a flat key-space from absolute key paths
//! (`/org/novade/editor/font`) to values. The engine only ever talks to the
//! [`SettingsBackend`] trait; which implementation sits behind it is decided
//! once per settings object by [`select_backend`].
//!
//! - [`MemoryBackend`]: process-local map, nothing persisted.
//! - [`KeyfileBackend`]: GLib keyfile under `XDG_CONFIG_HOME`.
//! - [`DconfBackend`]: dconf user database plus the `dconf-service` writer
//!   on the session bus. This is the default.

pub mod dconf;
pub mod keyfile;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use dconf::DconfBackend;
pub use keyfile::KeyfileBackend;
pub use memory::MemoryBackend;

use crate::config::EnvironmentConfig;
use crate::error::{Result, SettingsError};
use crate::variant::Variant;

/// A batch of writes: `Some` stores a value, `None` resets the key.
pub type Changeset = BTreeMap<String, Option<Variant>>;

/// Capacity of every backend's change channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Storage capability used by [`crate::Settings`].
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The stored value at the absolute key path, `None` if unset.
    async fn get(&self, key: &str) -> Result<Option<Variant>>;

    /// Applies a whole batch.
    async fn set(&self, changes: Changeset) -> Result<()>;

    /// A receiver of change batches, each a list of absolute key paths.
    async fn subscribe(&self) -> Result<broadcast::Receiver<Vec<String>>>;

    /// Releases the backend. Idempotent; later calls of the other
    /// operations fail with `BackendClosed`.
    async fn close(&self) -> Result<()>;
}

/// The closed set of backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Keyfile,
    Dconf,
}

impl BackendKind {
    /// Parses a backend name as accepted in `GSETTINGS_BACKEND`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "keyfile" => Some(Self::Keyfile),
            "dconf" => Some(Self::Dconf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Keyfile => "keyfile",
            Self::Dconf => "dconf",
        }
    }

    /// Instantiates a fresh backend of this kind.
    pub fn create(&self, config: &EnvironmentConfig) -> Arc<dyn SettingsBackend> {
        match self {
            Self::Memory => Arc::new(MemoryBackend::new()),
            Self::Keyfile => Arc::new(KeyfileBackend::new(config.keyfile_path())),
            Self::Dconf => Arc::new(DconfBackend::new(config.dconf_user_db())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the backend for a new settings object: an explicit backend wins,
/// then `GSETTINGS_BACKEND`, then dconf. Unrecognized names are logged and
/// ignored.
pub fn select_backend(
    explicit: Option<Arc<dyn SettingsBackend>>,
    config: &EnvironmentConfig,
) -> Arc<dyn SettingsBackend> {
    if let Some(backend) = explicit {
        debug!("Using explicitly supplied {} backend", backend.kind());
        return backend;
    }
    let kind = match config.backend.as_deref() {
        Some(name) => BackendKind::from_name(name).unwrap_or_else(|| {
            warn!(
                "Unrecognized GSETTINGS_BACKEND '{}', falling back to {}",
                name,
                BackendKind::Dconf
            );
            BackendKind::Dconf
        }),
        None => BackendKind::Dconf,
    };
    debug!("Selected {} backend", kind);
    kind.create(config)
}

/// Shared open/closed state of a backend.
#[derive(Debug, Default)]
pub(crate) struct CloseState {
    closed: AtomicBool,
}

impl CloseState {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SettingsError::BackendClosed)
        } else {
            Ok(())
        }
    }

    /// Marks the backend closed; `true` only for the first call.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config_with_backend(name: Option<&str>) -> EnvironmentConfig {
        EnvironmentConfig {
            backend: name.map(str::to_string),
            config_home: "/nonexistent/config".into(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(Some("memory"), BackendKind::Memory)]
    #[case(Some("KEYFILE"), BackendKind::Keyfile)]
    #[case(Some("dconf"), BackendKind::Dconf)]
    #[case(Some("registry"), BackendKind::Dconf)]
    #[case(None, BackendKind::Dconf)]
    fn test_selection_by_environment(#[case] name: Option<&str>, #[case] expected: BackendKind) {
        let backend = select_backend(None, &config_with_backend(name));
        assert_eq!(backend.kind(), expected);
    }

    #[test]
    fn test_explicit_backend_wins() {
        let explicit: Arc<dyn SettingsBackend> = Arc::new(MemoryBackend::new());
        let backend = select_backend(Some(explicit.clone()), &config_with_backend(Some("keyfile")));
        assert!(Arc::ptr_eq(&backend, &explicit));
    }

    #[test]
    fn test_close_state_reports_first_close_only() {
        let state = CloseState::default();
        assert!(state.ensure_open().is_ok());
        assert!(state.close());
        assert!(!state.close());
        assert!(matches!(state.ensure_open(), Err(SettingsError::BackendClosed)));
    }
}
