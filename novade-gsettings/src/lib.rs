//! # NovaDE GSettings (`novade-gsettings`)
//!
//! Client-side resolution of GSettings keys: given a schema id and a key,
//! find the key's compiled metadata, compute its default (including
//! desktop-specific overrides), and read or write its value through a
//! pluggable storage backend.
//!
//! ## Layout
//!
//! - [`variant`]: GVariant values (zvariant) with the serialized form used
//!   by compiled databases and a text format parser.
//! - [`gvdb`]: reader for the GVDB container used by `gschemas.compiled` and
//!   the dconf user database.
//! - [`schema`]: schema lookup across the schema directories and decoding of
//!   compiled key entries.
//! - [`path`]: validation and resolution of storage paths.
//! - [`backend`]: the [`SettingsBackend`] trait with memory, keyfile and
//!   dconf implementations.
//! - [`settings`]: the [`Settings`] engine tying the above together.
//! - [`config`], [`logging`], [`error`]: ambient support.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use novade_gsettings::{EnvironmentConfig, Settings, Variant};
//!
//! let config = Arc::new(EnvironmentConfig::from_env());
//! let settings = Settings::new(config, "org.gnome.desktop.interface", None, None)?;
//! let font = settings.get("font-name").await?;
//! settings.set("clock-show-seconds", Variant::from(true)).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod gvdb;
pub mod logging;
pub mod path;
pub mod schema;
pub mod settings;
pub mod variant;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{select_backend, BackendKind, Changeset, SettingsBackend};
pub use config::{EnvironmentConfig, LoggingConfig};
pub use error::{Result, SettingsError, VariantError};
pub use schema::{SchemaEntry, SchemaLocator, SchemaTable};
pub use settings::{ChangeSubscription, Settings};
pub use variant::{Signature, Variant};
