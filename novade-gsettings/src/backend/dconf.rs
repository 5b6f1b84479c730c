//! dconf storage.
//!
//! Reads go straight to the user database (`$XDG_CONFIG_HOME/dconf/user`), a
//! GVDB file mapping absolute keys to values that `dconf-service` rewrites
//! on every change. Writes and change notification go through the
//! `ca.desrt.dconf.Writer` interface on the session bus:
//!
//! - `Change(ay blob) -> s tag`, where `blob` is a serialized `a{smv}`
//!   (`nothing` resets a key),
//! - `Notify(s prefix, as changes, s tag)`, where each changed key is
//!   `prefix + change`.
//!
//! The bus connection is only opened on the first write or subscription,
//! so read-only users never need a session bus.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};
use zbus::{dbus_proxy, Connection};

use super::{BackendKind, Changeset, CloseState, SettingsBackend, CHANGE_CHANNEL_CAPACITY};
use crate::error::{Result, VariantError};
use crate::gvdb::GvdbFile;
use crate::variant::{self, Variant};

/// Well-known bus name of `dconf-service`.
pub const DCONF_SERVICE: &str = "ca.desrt.dconf";
/// Writer object for the `user` database.
pub const DCONF_USER_WRITER_PATH: &str = "/ca/desrt/dconf/Writer/user";

#[dbus_proxy(
    interface = "ca.desrt.dconf.Writer",
    default_service = "ca.desrt.dconf",
    default_path = "/ca/desrt/dconf/Writer/user"
)]
trait DconfWriter {
    /// Applies a serialized `a{smv}` changeset, returning its tag.
    async fn change(&self, blob: &[u8]) -> zbus::Result<String>;

    #[dbus_proxy(signal)]
    async fn notify(&self, prefix: String, changes: Vec<String>, tag: String) -> zbus::Result<()>;
}

pub struct DconfBackend {
    database: PathBuf,
    proxy: OnceCell<DconfWriterProxy<'static>>,
    event_sender: broadcast::Sender<Vec<String>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
    state: CloseState,
}

impl DconfBackend {
    /// `database` is the user database written by `dconf-service`.
    pub fn new(database: impl Into<PathBuf>) -> Self {
        let (event_sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            database: database.into(),
            proxy: OnceCell::new(),
            event_sender,
            signal_task: Mutex::new(None),
            state: CloseState::default(),
        }
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    async fn writer(&self) -> Result<&DconfWriterProxy<'static>> {
        let proxy = self
            .proxy
            .get_or_try_init(|| async {
                debug!("Connecting to {} on the session bus", DCONF_SERVICE);
                let connection = Connection::session().await?;
                DconfWriterProxy::builder(&connection)
                    .destination(DCONF_SERVICE)?
                    .path(DCONF_USER_WRITER_PATH)?
                    .build()
                    .await
            })
            .await?;
        Ok(proxy)
    }
}

/// Serializes a batch as the `a{smv}` blob expected by `Change`.
pub(crate) fn encode_changeset(changes: &Changeset) -> std::result::Result<Vec<u8>, VariantError> {
    let entries: BTreeMap<&str, Option<&Variant>> = changes
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_ref()))
        .collect();
    Ok(zvariant::to_bytes(variant::gvariant_context(), &entries)?)
}

/// Expands a `Notify` signal into absolute keys.
pub(crate) fn notify_keys(prefix: &str, changes: &[String]) -> Vec<String> {
    if changes.is_empty() {
        return vec![prefix.to_string()];
    }
    changes.iter().map(|change| format!("{prefix}{change}")).collect()
}

#[async_trait]
impl SettingsBackend for DconfBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dconf
    }

    async fn get(&self, key: &str) -> Result<Option<Variant>> {
        self.state.ensure_open()?;
        match GvdbFile::open(&self.database).await? {
            Some(file) => file.root()?.get_value(key),
            None => Ok(None),
        }
    }

    async fn set(&self, changes: Changeset) -> Result<()> {
        self.state.ensure_open()?;
        if changes.is_empty() {
            return Ok(());
        }
        let blob = encode_changeset(&changes)?;
        let tag = self.writer().await?.change(&blob).await?;
        debug!("dconf accepted {} change(s) with tag {}", changes.len(), tag);
        Ok(())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<Vec<String>>> {
        self.state.ensure_open()?;
        let receiver = self.event_sender.subscribe();
        let mut task = self.signal_task.lock().await;
        if task.is_none() {
            let mut signals = self.writer().await?.receive_notify().await?;
            let sender = self.event_sender.clone();
            *task = Some(tokio::spawn(async move {
                while let Some(signal) = signals.next().await {
                    let args = match signal.args() {
                        Ok(args) => args,
                        Err(e) => {
                            error!("Malformed dconf Notify signal: {}", e);
                            continue;
                        }
                    };
                    let keys = notify_keys(args.prefix(), args.changes());
                    trace!("dconf notify {:?} (tag {})", keys, args.tag());
                    let _ = sender.send(keys);
                }
                debug!("dconf Notify stream ended");
            }));
        }
        Ok(receiver)
    }

    async fn close(&self) -> Result<()> {
        if self.state.close() {
            if let Some(task) = self.signal_task.lock().await.take() {
                task.abort();
            }
        }
        Ok(())
    }
}
