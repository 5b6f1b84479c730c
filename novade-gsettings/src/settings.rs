//! The settings resolution engine.
//!
//! A [`Settings`] object is bound to one schema id and, for relocatable
//! schemas, one storage path. Every operation looks the schema up again,
//! so schema installs and updates are picked up without restarting.
//!
//! # Change notification
//!
//! Backends publish batches of absolute key paths. The first call to
//! [`Settings::subscribe`] spawns a forwarding task that keeps only the keys
//! under this object's path, strips the path, and rebroadcasts non-empty
//! batches. All [`ChangeSubscription`]s share that task through an `Arc`
//! guard; dropping the last subscription aborts it, and the next
//! `subscribe` starts a new one.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{select_backend, BackendKind, Changeset, SettingsBackend, CHANGE_CHANNEL_CAPACITY};
use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::path::{resolve_path, validate_path};
use crate::schema::{SchemaEntry, SchemaLocator, SchemaTable};
use crate::variant::Variant;

/// Typed access to the keys of one schema instance.
pub struct Settings {
    schema_id: String,
    path: Option<String>,
    config: Arc<EnvironmentConfig>,
    locator: SchemaLocator,
    backend: Arc<dyn SettingsBackend>,
    forwarder: Mutex<Weak<ForwarderGuard>>,
}

impl Settings {
    /// Creates a settings object. Nothing is read until the first operation.
    ///
    /// `path` is required for relocatable schemas and must be omitted for
    /// schemas with a fixed path; that is checked when the schema is first
    /// resolved. `backend` overrides the environment's backend selection.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `path` is malformed.
    pub fn new(
        config: Arc<EnvironmentConfig>,
        schema_id: impl Into<String>,
        path: Option<&str>,
        backend: Option<Arc<dyn SettingsBackend>>,
    ) -> Result<Self> {
        if let Some(path) = path {
            validate_path(path)?;
        }
        let backend = select_backend(backend, &config);
        Ok(Settings {
            schema_id: schema_id.into(),
            path: path.map(str::to_string),
            locator: SchemaLocator::new(config.clone()),
            config,
            backend,
            forwarder: Mutex::new(Weak::new()),
        })
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// The instance path given at construction, if any.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    async fn table(&self) -> Result<SchemaTable> {
        self.locator.locate(&self.schema_id).await
    }

    async fn resolve(&self, key: &str) -> Result<(SchemaEntry, String)> {
        let table = self.table().await?;
        let entry = SchemaEntry::decode(&table, key)?;
        let path = resolve_path(&table, self.path.as_deref())?;
        Ok((entry, path))
    }

    /// Declared key names, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.table().await?.keys()
    }

    /// The decoded schema metadata of `key`.
    pub async fn describe(&self, key: &str) -> Result<SchemaEntry> {
        SchemaEntry::decode(&self.table().await?, key)
    }

    /// The default of `key` for the configured desktops. Never consults the
    /// backend.
    pub async fn get_default(&self, key: &str) -> Result<Variant> {
        let entry = self.describe(key).await?;
        Ok(entry.resolve_default(&self.config.current_desktops).clone())
    }

    /// The stored value of `key`, or its default when unset.
    pub async fn get(&self, key: &str) -> Result<Variant> {
        let (entry, path) = self.resolve(key).await?;
        let full_key = format!("{path}{key}");
        if let Some(value) = self.backend.get(&full_key).await? {
            let expected = entry.value_type();
            let actual = value.value_signature();
            if actual.as_str() == expected.as_str() {
                return Ok(value);
            }
            warn!(
                "Ignoring stored value of type '{}' for {}, expected '{}'",
                actual, full_key, expected
            );
        }
        Ok(entry.resolve_default(&self.config.current_desktops).clone())
    }

    /// Whether the backend holds a value for `key`.
    pub async fn is_set(&self, key: &str) -> Result<bool> {
        let (_, path) = self.resolve(key).await?;
        Ok(self.backend.get(&format!("{path}{key}")).await?.is_some())
    }

    /// Stores `value` for `key`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` or `OutOfRange` if the value violates the schema.
    pub async fn set(&self, key: &str, value: Variant) -> Result<()> {
        self.set_all(BTreeMap::from([(key.to_string(), Some(value))])).await
    }

    /// Removes the stored value of `key` so its default applies again.
    pub async fn unset(&self, key: &str) -> Result<()> {
        self.set_all(BTreeMap::from([(key.to_string(), None)])).await
    }

    /// Applies several writes and resets in one backend batch. `None`
    /// resets a key. Every key is resolved and every value checked first;
    /// if any fails, nothing is written.
    pub async fn set_all(&self, values: BTreeMap<String, Option<Variant>>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let table = self.table().await?;
        let path = resolve_path(&table, self.path.as_deref())?;
        let mut changes = Changeset::new();
        for (key, value) in values {
            let entry = SchemaEntry::decode(&table, &key)?;
            if let Some(value) = &value {
                entry.check_value(&key, value)?;
            }
            changes.insert(format!("{path}{key}"), value);
        }
        debug!("Writing {} key(s) under {}", changes.len(), path);
        self.backend.set(changes).await
    }

    /// Subscribes to changes of this object's keys. Batches carry key names
    /// relative to the storage path.
    pub async fn subscribe(&self) -> Result<ChangeSubscription> {
        let mut slot = self.forwarder.lock().await;
        if let Some(guard) = slot.upgrade() {
            let receiver = guard.template.resubscribe();
            return Ok(ChangeSubscription { receiver, _guard: guard });
        }

        let table = self.table().await?;
        let path = resolve_path(&table, self.path.as_deref())?;
        let mut raw = self.backend.subscribe().await?;
        let (sender, receiver) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let template = receiver.resubscribe();

        debug!("Starting change forwarding for {}", path);
        let task = tokio::spawn(async move {
            loop {
                match raw.recv().await {
                    Ok(batch) => {
                        let keys = filter_batch(&path, &batch);
                        if !keys.is_empty() {
                            let _ = sender.send(keys);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Change forwarding for {} skipped {} batch(es)", path, skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Backend change channel closed for {}", path);
                        break;
                    }
                }
            }
        });

        let guard = Arc::new(ForwarderGuard { template, task });
        *slot = Arc::downgrade(&guard);
        Ok(ChangeSubscription { receiver, _guard: guard })
    }

    /// Stops change forwarding and closes the backend.
    pub async fn close(&self) -> Result<()> {
        if let Some(guard) = self.forwarder.lock().await.upgrade() {
            guard.task.abort();
        }
        self.backend.close().await
    }
}

/// Keeps the keys under `path`, relative to it.
pub(crate) fn filter_batch(path: &str, batch: &[String]) -> Vec<String> {
    batch
        .iter()
        .filter_map(|key| key.strip_prefix(path))
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

struct ForwarderGuard {
    template: broadcast::Receiver<Vec<String>>,
    task: JoinHandle<()>,
}

impl Drop for ForwarderGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A live subscription to one settings object's changes.
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<Vec<String>>,
    _guard: Arc<ForwarderGuard>,
}

impl ChangeSubscription {
    /// The next batch of changed keys; `None` once forwarding has stopped.
    pub async fn recv(&mut self) -> Option<Vec<String>> {
        loop {
            match self.receiver.recv().await {
                Ok(batch) => return Some(batch),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change subscriber lagged, {} batch(es) dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<String>> + Send {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|batch| (batch, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::SettingsError;
    use crate::testutil::{key_entry, schema_table, scratch_config, write_schemas};
    use crate::variant;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use zvariant::Value;

    const FIXED: &str = "org.novade.fixed";
    const RELOCATABLE: &str = "org.novade.relocatable";
    const CONFLICT: &str = "org.novade.conflict";

    fn install_schemas(root: &Path) {
        let overrides = variant::string_dict(
            "v",
            [
                ("GNOME".to_string(), Value::Value(Box::new(Value::from("A")))),
                ("KDE".to_string(), Value::Value(Box::new(Value::from("B")))),
            ],
        )
        .unwrap();
        write_schemas(
            &root.join("schemas"),
            vec![
                (
                    FIXED,
                    schema_table(
                        Some("/org/app/a/"),
                        vec![
                            ("key1", key_entry(Value::I32(1), vec![])),
                            (
                                "level",
                                key_entry(
                                    Value::I32(5),
                                    vec![(b'r', variant::tuple(vec![Value::I32(0), Value::I32(10)]))],
                                ),
                            ),
                            ("theme", key_entry(Value::from("default"), vec![(b'd', overrides)])),
                        ],
                    ),
                ),
                (
                    RELOCATABLE,
                    schema_table(None, vec![("enabled", key_entry(Value::from(false), vec![]))]),
                ),
                (
                    CONFLICT,
                    schema_table(Some("/x/"), vec![("k", key_entry(Value::I32(0), vec![]))]),
                ),
            ],
        );
    }

    fn setup(desktops: &str) -> (TempDir, Arc<EnvironmentConfig>) {
        let root = tempfile::tempdir().unwrap();
        install_schemas(root.path());
        let config = scratch_config(root.path(), desktops);
        (root, config)
    }

    fn memory() -> Option<Arc<dyn SettingsBackend>> {
        Some(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_unknown_schema_fails_every_operation() {
        let (_root, config) = setup("");
        let settings = Settings::new(config, "org.novade.missing", None, memory()).unwrap();
        let is_not_installed = |r: Result<()>| matches!(r, Err(SettingsError::SchemaNotInstalled(_)));

        assert!(is_not_installed(settings.list().await.map(drop)));
        assert!(is_not_installed(settings.get("k").await.map(drop)));
        assert!(is_not_installed(settings.get_default("k").await.map(drop)));
        assert!(is_not_installed(settings.is_set("k").await.map(drop)));
        assert!(is_not_installed(settings.set("k", Value::I32(1)).await));
        assert!(is_not_installed(settings.unset("k").await));
        assert!(is_not_installed(settings.subscribe().await.map(drop)));
    }

    #[tokio::test]
    async fn test_set_get_unset_cycle() {
        let (_root, config) = setup("");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();

        assert_eq!(settings.list().await.unwrap(), vec!["key1", "level", "theme"]);
        assert_eq!(settings.get("key1").await.unwrap(), Value::I32(1));
        assert!(!settings.is_set("key1").await.unwrap());

        settings.set("key1", Value::I32(42)).await.unwrap();
        let value = settings.get("key1").await.unwrap();
        assert_eq!(value, Value::I32(42));
        assert_eq!(value.value_signature().as_str(), "i");
        assert!(settings.is_set("key1").await.unwrap());
        assert_eq!(settings.get_default("key1").await.unwrap(), Value::I32(1));

        settings.unset("key1").await.unwrap();
        settings.unset("key1").await.unwrap();
        assert!(!settings.is_set("key1").await.unwrap());
        assert_eq!(settings.get("key1").await.unwrap(), Value::I32(1));
    }

    #[tokio::test]
    async fn test_desktop_override_follows_desktop_order() {
        let (_root, config) = setup("KDE:GNOME");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();
        assert_eq!(settings.get_default("theme").await.unwrap(), Value::from("B"));
        assert_eq!(settings.get("theme").await.unwrap(), Value::from("B"));

        let (_root, config) = setup("XFCE");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();
        assert_eq!(settings.get_default("theme").await.unwrap(), Value::from("default"));
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected_atomically() {
        let (_root, config) = setup("");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();

        assert!(matches!(
            settings.set("key1", Value::from("text")).await,
            Err(SettingsError::TypeMismatch { .. })
        ));
        assert!(matches!(
            settings.set("level", Value::I32(11)).await,
            Err(SettingsError::OutOfRange { .. })
        ));

        let batch = BTreeMap::from([
            ("key1".to_string(), Some(Value::I32(7))),
            ("level".to_string(), Some(Value::I32(-1))),
        ]);
        assert!(settings.set_all(batch).await.is_err());
        assert!(!settings.is_set("key1").await.unwrap());

        assert!(matches!(
            settings.set("nope", Value::I32(1)).await,
            Err(SettingsError::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_mixes_writes_and_resets() {
        let (_root, config) = setup("");
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn SettingsBackend> = backend.clone();
        let settings = Settings::new(config, FIXED, None, Some(shared)).unwrap();
        settings.set("theme", Value::from("dark")).await.unwrap();

        let mut receiver = backend.subscribe().await.unwrap();
        let batch = BTreeMap::from([
            ("key1".to_string(), Some(Value::I32(4))),
            ("theme".to_string(), None),
        ]);
        settings.set_all(batch).await.unwrap();

        assert_eq!(settings.get("key1").await.unwrap(), Value::I32(4));
        assert!(!settings.is_set("theme").await.unwrap());
        assert_eq!(settings.get("theme").await.unwrap(), Value::from("default"));
        assert_eq!(
            receiver.recv().await.unwrap(),
            vec!["/org/app/a/key1", "/org/app/a/theme"]
        );

        let rejected = BTreeMap::from([
            ("key1".to_string(), None),
            ("level".to_string(), Some(Value::from("high"))),
        ]);
        assert!(matches!(
            settings.set_all(rejected).await,
            Err(SettingsError::TypeMismatch { .. })
        ));
        assert!(settings.is_set("key1").await.unwrap());

        let unknown_reset = BTreeMap::from([("nope".to_string(), None)]);
        assert!(matches!(
            settings.set_all(unknown_reset).await,
            Err(SettingsError::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_typed_stored_value_falls_back_to_default() {
        let (_root, config) = setup("");
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(Changeset::from([("/org/app/a/key1".to_string(), Some(Value::from("junk")))]))
            .await
            .unwrap();
        let settings = Settings::new(config, FIXED, None, Some(backend as Arc<dyn SettingsBackend>)).unwrap();
        assert_eq!(settings.get("key1").await.unwrap(), Value::I32(1));
        assert!(settings.is_set("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_relocatable_schema_stores_under_instance_path() {
        let (_root, config) = setup("");
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn SettingsBackend> = backend.clone();
        let settings = Settings::new(config, RELOCATABLE, Some("/org/app/plugins/p1/"), Some(shared)).unwrap();
        settings.set("enabled", Value::from(true)).await.unwrap();
        assert_eq!(
            backend.get("/org/app/plugins/p1/enabled").await.unwrap(),
            Some(Value::from(true))
        );
    }

    #[tokio::test]
    async fn test_path_rules() {
        let (_root, config) = setup("");
        for bad in ["no-slash", "/a//b/"] {
            assert!(matches!(
                Settings::new(config.clone(), RELOCATABLE, Some(bad), memory()),
                Err(SettingsError::InvalidConfiguration(_))
            ));
        }
        assert!(Settings::new(config.clone(), RELOCATABLE, Some("/a/b/"), memory()).is_ok());

        let conflicting = Settings::new(config.clone(), CONFLICT, Some("/y/"), memory()).unwrap();
        assert!(matches!(
            conflicting.get("k").await,
            Err(SettingsError::InvalidConfiguration(_))
        ));

        let pathless = Settings::new(config, RELOCATABLE, None, memory()).unwrap();
        assert!(matches!(
            pathless.get("enabled").await,
            Err(SettingsError::InvalidConfiguration(_))
        ));
        assert_eq!(pathless.get_default("enabled").await.unwrap(), Value::from(false));
    }

    #[test]
    fn test_filter_batch_strips_path() {
        let batch = vec!["/org/app/a/key1".to_string(), "/org/other/b/key2".to_string()];
        assert_eq!(filter_batch("/org/app/a/", &batch), vec!["key1"]);
        assert!(filter_batch("/org/app/a/", &["/org/app/a/".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn test_subscription_receives_relative_keys() {
        let (_root, config) = setup("");
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn SettingsBackend> = backend.clone();
        let settings = Settings::new(config, FIXED, None, Some(shared)).unwrap();
        let mut subscription = settings.subscribe().await.unwrap();

        backend
            .set(Changeset::from([
                ("/org/app/a/key1".to_string(), Some(Value::I32(2))),
                ("/org/other/b/key2".to_string(), Some(Value::I32(3))),
            ]))
            .await
            .unwrap();
        backend
            .set(Changeset::from([("/org/other/only".to_string(), None)]))
            .await
            .unwrap();
        settings.set("level", Value::I32(3)).await.unwrap();

        assert_eq!(subscription.recv().await.unwrap(), vec!["key1"]);
        assert_eq!(subscription.recv().await.unwrap(), vec!["level"]);
    }

    #[tokio::test]
    async fn test_forwarder_is_shared_and_restarted() {
        let (_root, config) = setup("");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();

        let first = settings.subscribe().await.unwrap();
        let second = settings.subscribe().await.unwrap();
        assert!(Arc::ptr_eq(&first._guard, &second._guard));
        drop(first);
        drop(second);
        assert!(settings.forwarder.lock().await.upgrade().is_none());

        let stream = settings.subscribe().await.unwrap().into_stream();
        tokio::pin!(stream);
        settings.set("key1", Value::I32(9)).await.unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert_eq!(batch, Some(vec!["key1".to_string()]));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_and_backend() {
        let (_root, config) = setup("");
        let settings = Settings::new(config, FIXED, None, memory()).unwrap();
        let mut subscription = settings.subscribe().await.unwrap();
        settings.close().await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap();
        assert_eq!(next, None);
        assert!(matches!(
            settings.get("key1").await,
            Err(SettingsError::BackendClosed)
        ));
    }
}
