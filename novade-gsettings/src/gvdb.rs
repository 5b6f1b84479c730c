//! Read-only access to GVDB files.
//!
//! GVDB is the hash-table container behind `gschemas.compiled` and the
//! dconf user database. A file starts with a 24 byte header whose last
//! eight bytes point at the root hash table. Each table is laid out as
//!
//! ```text
//! u32 bloom header | u32 n_buckets | bloom words | buckets | items (24 bytes each)
//! ```
//!
//! and each item carries its key hash, a parent item index (keys are stored
//! as suffixes of their parent's key), a one byte type tag (`v` value, `H`
//! nested table, `L` list of child indices) and a pointer to its data.
//! `L` items only exist to chain names together; lookups and listings see
//! `v` and `H` items only. Only little-endian files are supported.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LE};
use tracing::{debug, trace};

use crate::error::{Result, SettingsError};
use crate::variant::{self, Variant};

const SIGNATURE: &[u8; 8] = b"GVariant";
const HEADER_SIZE: usize = 24;
const ITEM_SIZE: usize = 24;
const NO_PARENT: u32 = u32::MAX;
const KIND_VALUE: u8 = b'v';
const KIND_TABLE: u8 = b'H';

/// An opened GVDB file held fully in memory.
#[derive(Debug, Clone)]
pub struct GvdbFile {
    inner: Arc<FileData>,
}

#[derive(Debug)]
struct FileData {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl GvdbFile {
    /// Reads `path`; a missing file yields `Ok(None)`.
    pub async fn open(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_bytes(path, bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No database at {:?}", path);
                Ok(None)
            }
            Err(e) => Err(SettingsError::io(path, e)),
        }
    }

    /// Validates the header of an in-memory file. `path` is used for error
    /// reporting only.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self> {
        let path = path.into();
        if bytes.len() < HEADER_SIZE {
            return Err(SettingsError::corrupt(path, "file shorter than the GVDB header"));
        }
        if &bytes[..8] != SIGNATURE {
            return Err(SettingsError::corrupt(path, "missing GVDB signature"));
        }
        let version = read_u32(&bytes, 8);
        if version != 0 {
            return Err(SettingsError::corrupt(path, format!("unsupported GVDB version {version}")));
        }
        Ok(GvdbFile {
            inner: Arc::new(FileData { path, bytes }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The root hash table.
    pub fn root(&self) -> Result<GvdbTable> {
        let bytes = &self.inner.bytes;
        let start = read_u32(bytes, 16) as usize;
        let end = read_u32(bytes, 20) as usize;
        GvdbTable::new(self.clone(), start..end)
    }

    fn corrupt(&self, reason: impl Into<String>) -> SettingsError {
        SettingsError::corrupt(self.inner.path.clone(), reason)
    }

    fn slice(&self, range: Range<usize>) -> Result<&[u8]> {
        if range.start > range.end {
            return Err(self.corrupt(format!("inverted pointer {}..{}", range.start, range.end)));
        }
        self.inner
            .bytes
            .get(range.clone())
            .ok_or_else(|| self.corrupt(format!("pointer {}..{} outside the file", range.start, range.end)))
    }
}

/// One hash table inside a [`GvdbFile`].
#[derive(Debug, Clone)]
pub struct GvdbTable {
    file: GvdbFile,
    bloom_shift: u32,
    bloom: Range<usize>,
    buckets: Range<usize>,
    items: Range<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Item {
    hash: u32,
    parent: u32,
    key_start: usize,
    key_size: usize,
    kind: u8,
    value: (usize, usize),
}

impl GvdbTable {
    fn new(file: GvdbFile, range: Range<usize>) -> Result<Self> {
        if range.start % 4 != 0 {
            return Err(file.corrupt("misaligned hash table"));
        }
        let data = file.slice(range.clone())?;
        if data.len() < 8 {
            return Err(file.corrupt("hash table shorter than its header"));
        }
        let bloom_header = read_u32(data, 0);
        let n_bloom = (bloom_header & ((1 << 27) - 1)) as usize;
        let n_buckets = read_u32(data, 4) as usize;

        let bloom_start = range.start + 8;
        let buckets_start = n_bloom
            .checked_mul(4)
            .map(|size| bloom_start + size)
            .filter(|end| *end <= range.end)
            .ok_or_else(|| file.corrupt("bloom filter exceeds its table"))?;
        let items_start = n_buckets
            .checked_mul(4)
            .map(|size| buckets_start + size)
            .filter(|end| *end <= range.end)
            .ok_or_else(|| file.corrupt("bucket array exceeds its table"))?;
        if (range.end - items_start) % ITEM_SIZE != 0 {
            return Err(file.corrupt("item array has a partial entry"));
        }

        Ok(GvdbTable {
            file,
            bloom_shift: bloom_header >> 27,
            bloom: bloom_start..buckets_start,
            buckets: buckets_start..items_start,
            items: items_start..range.end,
        })
    }

    fn bytes(&self) -> &[u8] {
        &self.file.inner.bytes
    }

    /// Path of the file this table was read from.
    pub fn file_path(&self) -> &Path {
        self.file.path()
    }

    fn n_items(&self) -> usize {
        self.items.len() / ITEM_SIZE
    }

    fn n_buckets(&self) -> usize {
        self.buckets.len() / 4
    }

    fn item(&self, index: usize) -> Item {
        let data = &self.bytes()[self.items.start + index * ITEM_SIZE..][..ITEM_SIZE];
        Item {
            hash: read_u32(data, 0),
            parent: read_u32(data, 4),
            key_start: read_u32(data, 8) as usize,
            key_size: usize::from(LE::read_u16(&data[12..14])),
            kind: data[14],
            value: (read_u32(data, 16) as usize, read_u32(data, 20) as usize),
        }
    }

    fn key_of(&self, item: &Item) -> Result<&[u8]> {
        self.file.slice(item.key_start..item.key_start + item.key_size)
    }

    fn bloom_allows(&self, hash: u32) -> bool {
        let n_bloom = self.bloom.len() / 4;
        if n_bloom == 0 {
            return true;
        }
        let word = read_u32(self.bytes(), self.bloom.start + ((hash / 32) as usize % n_bloom) * 4);
        let mask = (1u32 << (hash & 31)) | (1u32 << ((hash >> self.bloom_shift) & 31));
        word & mask == mask
    }

    /// Checks that the chain of parent suffixes spells exactly `key`.
    fn name_matches(&self, item: &Item, key: &[u8], depth: usize) -> Result<bool> {
        let suffix = self.key_of(item)?;
        let Some(prefix) = key.strip_suffix(suffix) else {
            return Ok(false);
        };
        if item.parent == NO_PARENT {
            return Ok(prefix.is_empty());
        }
        let parent = item.parent as usize;
        if parent >= self.n_items() || depth > self.n_items() {
            return Err(self.file.corrupt("invalid parent reference"));
        }
        self.name_matches(&self.item(parent), prefix, depth + 1)
    }

    fn find(&self, key: &str) -> Result<Option<Item>> {
        let n_buckets = self.n_buckets();
        let n_items = self.n_items();
        if n_buckets == 0 || n_items == 0 {
            return Ok(None);
        }
        let hash = hash_key(key);
        if !self.bloom_allows(hash) {
            return Ok(None);
        }
        let bucket = hash as usize % n_buckets;
        let first = read_u32(self.bytes(), self.buckets.start + bucket * 4) as usize;
        let last = if bucket + 1 == n_buckets {
            n_items
        } else {
            (read_u32(self.bytes(), self.buckets.start + (bucket + 1) * 4) as usize).min(n_items)
        };
        for index in first..last {
            let item = self.item(index);
            if item.hash == hash && self.name_matches(&item, key.as_bytes(), 0)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Finds `key` only if its item has type tag `kind`. Any other item
    /// under that name (a directory list, say) means the key is absent.
    fn find_kind(&self, key: &str, kind: u8) -> Result<Option<Item>> {
        match self.find(key)? {
            Some(item) if item.kind == kind => Ok(Some(item)),
            Some(item) => {
                trace!("Item '{}' has type '{}', not '{}'", key, char::from(item.kind), char::from(kind));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Looks up a `v` item and returns the value inside its box.
    pub fn get_value(&self, key: &str) -> Result<Option<Variant>> {
        let Some(item) = self.find_kind(key, KIND_VALUE)? else {
            return Ok(None);
        };
        let data = self.file.slice(item.value.0..item.value.1)?;
        variant::from_gvariant_bytes(data)
            .map(Some)
            .map_err(|e| self.file.corrupt(format!("value of '{key}': {e}")))
    }

    /// Looks up an `H` item.
    pub fn get_table(&self, key: &str) -> Result<Option<GvdbTable>> {
        let Some(item) = self.find_kind(key, KIND_TABLE)? else {
            return Ok(None);
        };
        GvdbTable::new(self.file.clone(), item.value.0..item.value.1).map(Some)
    }

    /// Whether `key` names a value or a nested table.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self
            .find(key)?
            .is_some_and(|item| item.kind == KIND_VALUE || item.kind == KIND_TABLE))
    }

    /// Full names of the value and table items, in item order. Parent list
    /// items (including the unnamed root list) are not reported.
    pub fn names(&self) -> Result<Vec<String>> {
        let n_items = self.n_items();
        let mut resolved: BTreeMap<usize, String> = BTreeMap::new();
        for index in 0..n_items {
            let mut chain = Vec::new();
            let mut current = index;
            let prefix = loop {
                if let Some(known) = resolved.get(&current) {
                    break known.clone();
                }
                if chain.len() > n_items {
                    return Err(self.file.corrupt("cyclic parent references"));
                }
                chain.push(current);
                let item = self.item(current);
                if item.parent == NO_PARENT {
                    break String::new();
                }
                current = item.parent as usize;
                if current >= n_items {
                    return Err(self.file.corrupt("invalid parent reference"));
                }
            };
            let mut name = prefix;
            for &link in chain.iter().rev() {
                let item = self.item(link);
                let suffix = std::str::from_utf8(self.key_of(&item)?)
                    .map_err(|_| self.file.corrupt("key is not valid UTF-8"))?;
                name.push_str(suffix);
                resolved.insert(link, name.clone());
            }
        }
        Ok(resolved
            .into_iter()
            .filter(|(index, name)| {
                let kind = self.item(*index).kind;
                !name.is_empty() && (kind == KIND_VALUE || kind == KIND_TABLE)
            })
            .map(|(_, name)| name)
            .collect())
    }
}

/// The djb2 variant used by GVDB, over signed bytes.
pub(crate) fn hash_key(key: &str) -> u32 {
    key.bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(byte as i8 as u32))
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    LE::read_u32(&data[offset..offset + 4])
}
