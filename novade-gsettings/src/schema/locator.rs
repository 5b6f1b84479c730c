//! Finding compiled schemas on disk.
//!
//! Directories are scanned in a fixed order, recomputed on every call:
//!
//! 1. every `GSETTINGS_SCHEMA_DIR` entry,
//! 2. `<dir>/glib-2.0/schemas` for each `XDG_DATA_DIRS` entry that holds a
//!    `gschemas.compiled`,
//! 3. `<XDG_DATA_HOME>/glib-2.0/schemas`.
//!
//! Each directory's database is opened fresh. A directory without a
//! database is skipped; any other failure aborts the scan.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::SchemaTable;
use crate::config::EnvironmentConfig;
use crate::error::{Result, SettingsError};
use crate::gvdb::{GvdbFile, GvdbTable};

const COMPILED_SCHEMAS: &str = "gschemas.compiled";

/// Resolves schema ids to their compiled tables.
#[derive(Debug, Clone)]
pub struct SchemaLocator {
    config: Arc<EnvironmentConfig>,
}

impl SchemaLocator {
    pub fn new(config: Arc<EnvironmentConfig>) -> Self {
        SchemaLocator { config }
    }

    /// The directories to scan, in priority order.
    pub async fn candidate_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.config.schema_dir_overrides.clone();
        for data_dir in &self.config.data_dirs {
            let dir = data_dir.join("glib-2.0").join("schemas");
            if has_database(&dir).await {
                dirs.push(dir);
            }
        }
        dirs.push(self.config.data_home.join("glib-2.0").join("schemas"));
        dirs
    }

    async fn open_roots(&self) -> Result<Vec<GvdbTable>> {
        let mut roots = Vec::new();
        for dir in self.candidate_dirs().await {
            if let Some(file) = GvdbFile::open(&dir.join(COMPILED_SCHEMAS)).await? {
                roots.push(file.root()?);
            }
        }
        Ok(roots)
    }

    /// Returns the table of the first directory providing `schema_id`.
    ///
    /// # Errors
    ///
    /// `SchemaNotInstalled` when no directory provides it; I/O and format
    /// errors of any database encountered on the way.
    pub async fn locate(&self, schema_id: &str) -> Result<SchemaTable> {
        for dir in self.candidate_dirs().await {
            let Some(file) = GvdbFile::open(&dir.join(COMPILED_SCHEMAS)).await? else {
                continue;
            };
            if let Some(table) = file.root()?.get_table(schema_id)? {
                debug!("Schema '{}' found in {:?}", schema_id, dir);
                return Ok(SchemaTable::new(schema_id, table));
            }
        }
        Err(SettingsError::SchemaNotInstalled(schema_id.to_string()))
    }

    /// All installed schema ids, sorted and without duplicates.
    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        for root in self.open_roots().await? {
            ids.extend(root.names()?);
        }
        Ok(ids.into_iter().collect())
    }

    /// Installed schemas without a fixed path.
    pub async fn list_relocatable_schemas(&self) -> Result<Vec<String>> {
        self.list_by_path(false).await
    }

    /// Installed schemas that declare a fixed path.
    pub async fn list_fixed_schemas(&self) -> Result<Vec<String>> {
        self.list_by_path(true).await
    }

    async fn list_by_path(&self, fixed: bool) -> Result<Vec<String>> {
        let roots = self.open_roots().await?;
        let mut seen = BTreeSet::new();
        let mut selected = Vec::new();
        for root in &roots {
            for id in root.names()? {
                if !seen.insert(id.clone()) {
                    continue;
                }
                let Some(table) = root.get_table(&id)? else {
                    continue;
                };
                if SchemaTable::new(id.as_str(), table).path()?.is_some() == fixed {
                    selected.push(id);
                }
            }
        }
        selected.sort();
        Ok(selected)
    }
}

async fn has_database(dir: &Path) -> bool {
    tokio::fs::metadata(dir.join(COMPILED_SCHEMAS))
        .await
        .is_ok_and(|meta| meta.is_file())
}
