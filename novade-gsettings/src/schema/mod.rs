//! Compiled schema access.
//!
//! A compiled schema database (`gschemas.compiled`) is a GVDB file whose
//! root table maps schema ids to per-schema tables. A per-schema table maps
//! key names to encoded [`SchemaEntry`] tuples, plus a few pseudo-entries
//! such as `.path` (names starting with `.`) and child schema references
//! (names ending with `/`).

pub mod entry;
pub mod locator;

use std::path::Path;

use zvariant::Value;

pub use entry::{Localization, LocalizationCategory, SchemaEntry, WordsKind};
pub use locator::SchemaLocator;

use crate::error::{Result, SettingsError};
use crate::gvdb::GvdbTable;
use crate::variant::Variant;

const PATH_ENTRY: &str = ".path";

/// Read-only view of one schema's compiled entries.
#[derive(Debug, Clone)]
pub struct SchemaTable {
    id: String,
    table: GvdbTable,
}

impl SchemaTable {
    pub(crate) fn new(id: impl Into<String>, table: GvdbTable) -> Self {
        SchemaTable { id: id.into(), table }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The database file this table was read from.
    pub fn source(&self) -> &Path {
        self.table.file_path()
    }

    /// The fixed storage path declared by the schema, if any.
    pub fn path(&self) -> Result<Option<String>> {
        match self.table.get_value(PATH_ENTRY)? {
            None => Ok(None),
            Some(Value::Str(path)) => Ok(Some(path.to_string())),
            Some(other) => Err(SettingsError::corrupt(
                self.source(),
                format!(
                    "'.path' of schema '{}' has type '{}'",
                    self.id,
                    other.value_signature()
                ),
            )),
        }
    }

    /// The raw encoded entry for `key`. Names that are not plain `v` items
    /// (parent lists, pseudo-entries, child references) have none.
    pub fn lookup(&self, key: &str) -> Result<Option<Variant>> {
        if is_pseudo_entry(key) {
            return Ok(None);
        }
        self.table.get_value(key)
    }

    /// Declared key names, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .table
            .names()?
            .into_iter()
            .filter(|name| !is_pseudo_entry(name))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn is_pseudo_entry(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('/')
}
