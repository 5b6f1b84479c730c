//! In-process storage.
//!
//! Values live in a map owned by the backend and vanish with it or on
//! [`close`](SettingsBackend::close). Each `set` publishes the changed keys
//! as one batch, including keys that were reset.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{BackendKind, Changeset, CloseState, SettingsBackend, CHANGE_CHANNEL_CAPACITY};
use crate::error::Result;
use crate::variant::Variant;

/// Non-persistent backend; values live as long as the backend object.
pub struct MemoryBackend {
    values: RwLock<HashMap<String, Variant>>,
    event_sender: broadcast::Sender<Vec<String>>,
    state: CloseState,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            event_sender,
            state: CloseState::default(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<Variant>> {
        self.state.ensure_open()?;
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, changes: Changeset) -> Result<()> {
        self.state.ensure_open()?;
        let keys: Vec<String> = changes.keys().cloned().collect();
        {
            let mut values = self.values.write().await;
            for (key, value) in changes {
                match value {
                    Some(value) => values.insert(key, value),
                    None => values.remove(&key),
                };
            }
        }
        if !keys.is_empty() {
            debug!("Memory backend changed {} key(s)", keys.len());
            // No receivers is not an error.
            let _ = self.event_sender.send(keys);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<Vec<String>>> {
        self.state.ensure_open()?;
        Ok(self.event_sender.subscribe())
    }

    async fn close(&self) -> Result<()> {
        if self.state.close() {
            self.values.write().await.clear();
        }
        Ok(())
    }
}
