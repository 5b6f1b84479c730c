//! Fixture writers shared by the unit tests.
//!
//! [`GvdbBuilder`] emits GVDB files laid out the way GLib writes them: keys
//! chained to parent `L` list items (the unnamed root list for schema ids
//! and key names, `/`-terminated directories for dconf paths), items
//! grouped by hash bucket, and no bloom filter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use zvariant::Value;

use crate::config::EnvironmentConfig;
use crate::gvdb::hash_key;
use crate::variant::{self, Variant};

pub(crate) enum GvdbEntry {
    Value(Variant),
    Table(GvdbBuilder),
}

#[derive(Default)]
pub(crate) struct GvdbBuilder {
    entries: BTreeMap<String, GvdbEntry>,
}

/// The name an item is chained to, as `gvdb_item_set_parent` is used by
/// `glib-compile-schemas` and dconf.
fn parent_of(name: &str) -> Option<String> {
    if name.is_empty() || name == "/" || name.starts_with('.') {
        return None;
    }
    if !name.starts_with('/') {
        return Some(String::new());
    }
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    trimmed.rfind('/').map(|cut| name[..=cut].to_string())
}

impl GvdbBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: &str, entry: GvdbEntry) -> &mut Self {
        self.entries.insert(key.to_string(), entry);
        self
    }

    pub(crate) fn insert_value(&mut self, key: &str, value: Variant) -> &mut Self {
        self.insert(key, GvdbEntry::Value(value))
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(b"GVariant");
        out.extend_from_slice(&[0u8; 16]);
        let (start, end) = self.write_table(&mut out);
        out[16..20].copy_from_slice(&(start as u32).to_le_bytes());
        out[20..24].copy_from_slice(&(end as u32).to_le_bytes());
        out
    }

    fn write_table(&self, out: &mut Vec<u8>) -> (usize, usize) {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for key in self.entries.keys() {
            let mut current = Some(key.clone());
            while let Some(name) = current {
                current = parent_of(&name);
                if !names.insert(name) {
                    break;
                }
            }
        }

        let n_buckets = names.len().max(1);
        let bucket_of = |name: &str| hash_key(name) as usize % n_buckets;
        let mut ordered: Vec<String> = names.into_iter().collect();
        ordered.sort_by_key(|name| bucket_of(name));
        let index_of: BTreeMap<&str, u32> = ordered
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index as u32))
            .collect();

        let mut items = Vec::new();
        for name in &ordered {
            let parent = parent_of(name);
            let suffix = &name[parent.as_ref().map_or(0, String::len)..];
            let key_start = out.len();
            out.extend_from_slice(suffix.as_bytes());
            let (kind, value) = match self.entries.get(name) {
                Some(GvdbEntry::Value(value)) => {
                    align(out, 8);
                    let start = out.len();
                    let bytes = variant::to_gvariant_bytes(value).expect("fixture value serializes");
                    out.extend_from_slice(&bytes);
                    (b'v', (start, out.len()))
                }
                Some(GvdbEntry::Table(table)) => (b'H', table.write_table(out)),
                None => {
                    align(out, 4);
                    let start = out.len();
                    for child in ordered.iter().filter(|child| parent_of(child).as_deref() == Some(name.as_str())) {
                        out.extend_from_slice(&index_of[child.as_str()].to_le_bytes());
                    }
                    (b'L', (start, out.len()))
                }
            };
            let parent = parent.map_or(u32::MAX, |parent| index_of[parent.as_str()]);
            items.push((hash_key(name), parent, key_start, suffix.len(), kind, value));
        }

        align(out, 4);
        let start = out.len();
        out.extend_from_slice(&(5u32 << 27).to_le_bytes());
        out.extend_from_slice(&(n_buckets as u32).to_le_bytes());
        for bucket in 0..n_buckets {
            let first = ordered.iter().take_while(|name| bucket_of(name) < bucket).count();
            out.extend_from_slice(&(first as u32).to_le_bytes());
        }
        for (hash, parent, key_start, key_size, kind, (value_start, value_end)) in items {
            out.extend_from_slice(&hash.to_le_bytes());
            out.extend_from_slice(&parent.to_le_bytes());
            out.extend_from_slice(&(key_start as u32).to_le_bytes());
            out.extend_from_slice(&(key_size as u16).to_le_bytes());
            out.push(kind);
            out.push(0);
            out.extend_from_slice(&(value_start as u32).to_le_bytes());
            out.extend_from_slice(&(value_end as u32).to_le_bytes());
        }
        (start, out.len())
    }
}

fn align(out: &mut Vec<u8>, alignment: usize) {
    while out.len() % alignment != 0 {
        out.push(0);
    }
}

/// A compiled schema key: the default followed by `(y payload)` blocks.
pub(crate) fn key_entry(default: Variant, metadata: Vec<(u8, Variant)>) -> Variant {
    let mut members = vec![default];
    members.extend(
        metadata
            .into_iter()
            .map(|(tag, payload)| variant::tuple(vec![Value::U8(tag), payload])),
    );
    variant::tuple(members)
}

/// A schema table with an optional fixed `.path`.
pub(crate) fn schema_table(path: Option<&str>, keys: Vec<(&str, Variant)>) -> GvdbBuilder {
    let mut table = GvdbBuilder::new();
    if let Some(path) = path {
        table.insert_value(".path", Value::from(path.to_string()));
    }
    for (name, entry) in keys {
        table.insert_value(name, entry);
    }
    table
}

/// Writes `<dir>/gschemas.compiled` holding the given schemas.
pub(crate) fn write_schemas(dir: &Path, schemas: Vec<(&str, GvdbBuilder)>) {
    std::fs::create_dir_all(dir).unwrap();
    let mut root = GvdbBuilder::new();
    for (id, table) in schemas {
        root.insert(id, GvdbEntry::Table(table));
    }
    std::fs::write(dir.join("gschemas.compiled"), root.to_bytes()).unwrap();
}

/// Writes a dconf-style database mapping absolute keys to values.
pub(crate) fn write_dconf_db(path: &Path, values: Vec<(&str, Variant)>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut root = GvdbBuilder::new();
    for (key, value) in values {
        root.insert_value(key, value);
    }
    std::fs::write(path, root.to_bytes()).unwrap();
}

/// A configuration rooted in a scratch directory: schemas are read from
/// `<root>/schemas` only, user files live under `<root>/config`.
pub(crate) fn scratch_config(root: &Path, desktops: &str) -> Arc<EnvironmentConfig> {
    let vars: BTreeMap<&str, String> = BTreeMap::from([
        ("GSETTINGS_SCHEMA_DIR", root.join("schemas").display().to_string()),
        ("XDG_DATA_DIRS", root.join("system").display().to_string()),
        ("XDG_DATA_HOME", root.join("data").display().to_string()),
        ("XDG_CONFIG_HOME", root.join("config").display().to_string()),
        ("XDG_CURRENT_DESKTOP", desktops.to_string()),
    ]);
    Arc::new(EnvironmentConfig::from_lookup(|name| vars.get(name).cloned()))
}
