//! GLib keyfile storage.
//!
//! Keys are grouped by their parent path: `/org/novade/editor/font` is
//! stored as `font=<value>` in the `[org/novade/editor]` group, keys directly
//! under `/` in the `[/]` group. Values use the GVariant text format.
//!
//! The file is re-read on every access so that edits by other processes
//! are picked up; writes replace it atomically via a temporary file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::{BackendKind, Changeset, CloseState, SettingsBackend, CHANGE_CHANNEL_CAPACITY};
use crate::error::{Result, SettingsError};
use crate::variant::{self, Variant};

type Groups = BTreeMap<String, BTreeMap<String, String>>;

pub struct KeyfileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
    event_sender: broadcast::Sender<Vec<String>>,
    state: CloseState,
}

impl KeyfileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (event_sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            event_sender,
            state: CloseState::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Groups> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_keyfile(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Groups::new()),
            Err(e) => Err(SettingsError::io(&self.path, e)),
        }
    }

    async fn store(&self, groups: &Groups) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SettingsError::io(parent, e))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", std::process::id()));
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, render_keyfile(groups))
            .await
            .map_err(|e| SettingsError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SettingsError::io(&self.path, e))
    }
}

/// Splits an absolute key into its keyfile group and key name.
fn split_key(key: &str) -> Option<(String, &str)> {
    let (parent, name) = key.rsplit_once('/')?;
    if name.is_empty() || !key.starts_with('/') {
        return None;
    }
    let group = parent.trim_start_matches('/');
    let group = if group.is_empty() { "/".to_string() } else { group.to_string() };
    Some((group, name))
}

fn parse_keyfile(content: &str) -> Groups {
    let mut groups = Groups::new();
    let mut current: Option<String> = None;
    for line in content.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(group) = line.strip_prefix('[').and_then(|l| l.trim_end().strip_suffix(']')) {
            groups.entry(group.to_string()).or_default();
            current = Some(group.to_string());
            continue;
        }
        let (Some(group), Some((key, value))) = (&current, line.split_once('=')) else {
            continue;
        };
        groups
            .entry(group.clone())
            .or_default()
            .insert(key.trim_end().to_string(), value.trim_start().to_string());
    }
    groups
}

fn render_keyfile(groups: &Groups) -> String {
    let mut out = String::new();
    for (group, entries) in groups.iter().filter(|(_, entries)| !entries.is_empty()) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("[{group}]\n"));
        for (key, value) in entries {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

#[async_trait]
impl SettingsBackend for KeyfileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyfile
    }

    async fn get(&self, key: &str) -> Result<Option<Variant>> {
        self.state.ensure_open()?;
        let Some((group, name)) = split_key(key) else {
            return Ok(None);
        };
        let groups = self.load().await?;
        let Some(text) = groups.get(&group).and_then(|entries| entries.get(name)) else {
            return Ok(None);
        };
        match variant::text::parse(text, None) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unparsable value for {} in {:?}: {}", key, self.path, e);
                Ok(None)
            }
        }
    }

    async fn set(&self, changes: Changeset) -> Result<()> {
        self.state.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let mut groups = self.load().await?;
        let mut changed = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            let Some((group, name)) = split_key(&key) else {
                return Err(SettingsError::InvalidConfiguration(format!(
                    "'{key}' is not an absolute key path"
                )));
            };
            let entries = groups.entry(group).or_default();
            match value {
                Some(value) => {
                    entries.insert(name.to_string(), value.to_string());
                }
                None => {
                    entries.remove(name);
                }
            }
            changed.push(key);
        }
        self.store(&groups).await?;
        debug!("Wrote {} key(s) to {:?}", changed.len(), self.path);
        if !changed.is_empty() {
            let _ = self.event_sender.send(changed);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<Vec<String>>> {
        self.state.ensure_open()?;
        Ok(self.event_sender.subscribe())
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}
