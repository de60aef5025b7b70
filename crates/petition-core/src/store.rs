//! Signature record store.
//!
//! Holds the ordered list of signatures shown on the page. The list is backed
//! by exactly one of:
//!
//! - **Local cache**: a key-scoped string store, read once at open and
//!   rewritten in full on every append.
//! - **Remote row store**: a shared table. Loads replace the whole list;
//!   appends are prepended only after the insert is confirmed.
//!
//! # Ordering
//!
//! Remote loads keep the order the row store returns (newest first). Appends
//! carry the current time and go to the front.
//!
//! # Stale loads
//!
//! Every load and every append bumps a generation counter while holding the
//! write lock. A load whose fetch completes after the generation moved on is
//! discarded, so an older fetch can never erase a confirmed append or a newer
//! load.

use crate::error::{Error, Result};
use crate::record::SignatureRecord;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Key under which the local snapshot is cached.
pub const CACHE_KEY: &str = "tokyo-petition-signatures";

/// Maximum number of rows fetched from the remote store.
pub const REMOTE_FETCH_LIMIT: usize = 120;

const EVENT_CAPACITY: usize = 64;

/// Key-scoped persisted string store.
pub trait LocalCache: Send + Sync {
    /// Read the value under `key`.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`.
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Remote table of signature rows.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch up to `limit` rows, newest first.
    async fn select_recent(&self, limit: usize) -> Result<Vec<SignatureRecord>>;

    /// Insert one row.
    async fn insert(&self, record: &SignatureRecord) -> Result<()>;
}

enum Backend {
    Local(Arc<dyn LocalCache>),
    Remote(Arc<dyn RowStore>),
}

/// Change notification for observers of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A load replaced the whole list.
    Replaced { count: usize },
    /// A record was prepended.
    Appended(SignatureRecord),
}

/// Result of [`SignatureStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Local mode; the snapshot was read at open.
    Local,
    /// The list was replaced with this many records.
    Replaced(usize),
    /// A later load or append superseded this load; nothing changed.
    Stale,
}

/// Ordered in-memory signature list with its persistence backend.
pub struct SignatureStore {
    backend: Backend,
    records: RwLock<Vec<SignatureRecord>>,
    generation: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl SignatureStore {
    /// Open a local-only store.
    ///
    /// Reads the cached snapshot; absent or unreadable content falls back to
    /// `seeds`.
    pub fn local(cache: Arc<dyn LocalCache>, seeds: Vec<SignatureRecord>) -> Self {
        let records = match cache.read(CACHE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<SignatureRecord>>(&raw) {
                Ok(records) => {
                    info!(count = records.len(), "restored signatures from local cache");
                    records
                }
                Err(e) => {
                    let err = Error::LocalParse(e.to_string());
                    warn!(error = %err, "falling back to seed signatures");
                    seeds
                }
            },
            Ok(None) => seeds,
            Err(e) => {
                warn!(error = %e, "local cache read failed, falling back to seed signatures");
                seeds
            }
        };

        Self::with_backend(Backend::Local(cache), records)
    }

    /// Open a store backed by a remote row store.
    ///
    /// `initial` is shown until the first successful [`load`](Self::load).
    pub fn remote(rows: Arc<dyn RowStore>, initial: Vec<SignatureRecord>) -> Self {
        Self::with_backend(Backend::Remote(rows), initial)
    }

    fn with_backend(backend: Backend, records: Vec<SignatureRecord>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            records: RwLock::new(records),
            generation: AtomicU64::new(0),
            events,
        }
    }

    /// Whether this store writes to a shared remote store.
    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote(_))
    }

    /// Subscribe to store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current list, newest first.
    pub async fn records(&self) -> Vec<SignatureRecord> {
        self.records.read().await.clone()
    }

    /// Number of records in the list.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the list is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Whether any record carries `user_id`.
    pub async fn has_signed(&self, user_id: &str) -> bool {
        self.records.read().await.iter().any(|r| r.signed_by(user_id))
    }

    /// Fetch the most recent rows and replace the list.
    ///
    /// On failure the list is left as it was.
    pub async fn load(&self) -> Result<LoadOutcome> {
        let rows = match &self.backend {
            Backend::Remote(rows) => Arc::clone(rows),
            Backend::Local(_) => return Ok(LoadOutcome::Local),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let fetched = rows
            .select_recent(REMOTE_FETCH_LIMIT)
            .await
            .map_err(|e| {
                let err = into_read_error(e);
                warn!(error = %err, "failed to load signatures");
                err
            })?;

        let mut records = self.records.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding stale signature load");
            return Ok(LoadOutcome::Stale);
        }

        *records = unique_by_id(fetched, REMOTE_FETCH_LIMIT);
        let count = records.len();
        drop(records);

        info!(count, "loaded signatures from remote store");
        let _ = self.events.send(StoreEvent::Replaced { count });
        Ok(LoadOutcome::Replaced(count))
    }

    /// Persist `record` and put it at the front of the list.
    ///
    /// Remote: the list changes only after the insert is confirmed.
    /// Local: the full new list is written to the cache before it becomes
    /// visible. Either way a failure leaves the list untouched.
    pub async fn append(&self, record: SignatureRecord) -> Result<()> {
        match &self.backend {
            Backend::Remote(rows) => {
                rows.insert(&record).await.map_err(|e| {
                    let err = into_write_error(e);
                    warn!(error = %err, id = %record.id, "failed to save signature");
                    err
                })?;

                let mut records = self.records.write().await;
                self.generation.fetch_add(1, Ordering::SeqCst);
                // A load that ran while the insert was in flight may already
                // carry the row.
                if records.iter().any(|r| r.id == record.id) {
                    debug!(id = %record.id, "signature already loaded");
                    return Ok(());
                }
                records.insert(0, record.clone());
            }
            Backend::Local(cache) => {
                let mut records = self.records.write().await;

                let mut next = Vec::with_capacity(records.len() + 1);
                next.push(record.clone());
                next.extend(records.iter().cloned());

                let raw = serde_json::to_string(&next)?;
                cache.write(CACHE_KEY, &raw).map_err(|e| {
                    let err = into_cache_error(e);
                    warn!(error = %err, id = %record.id, "failed to persist signatures");
                    err
                })?;

                self.generation.fetch_add(1, Ordering::SeqCst);
                *records = next;
            }
        }

        debug!(id = %record.id, "signature appended");
        let _ = self.events.send(StoreEvent::Appended(record));
        Ok(())
    }
}

/// Keep the first occurrence of each id, up to `limit` records.
fn unique_by_id(records: Vec<SignatureRecord>, limit: usize) -> Vec<SignatureRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .take(limit)
        .collect()
}

fn into_read_error(e: Error) -> Error {
    match e {
        Error::RemoteRead(_) => e,
        other => Error::RemoteRead(other.to_string()),
    }
}

fn into_write_error(e: Error) -> Error {
    match e {
        Error::RemoteWrite(_) => e,
        other => Error::RemoteWrite(other.to_string()),
    }
}

fn into_cache_error(e: Error) -> Error {
    match e {
        Error::Cache(_) => e,
        other => Error::Cache(other.to_string()),
    }
}
