//! In-memory collaborators for tests.
//!
//! Enabled for this crate's unit tests and, through the `testing` feature, for
//! downstream test crates.

use crate::error::{Error, Result};
use crate::identity::UserProfile;
use crate::provider::{IdentityProvider, LoginFailure, LoginOptions};
use crate::record::SignatureRecord;
use crate::store::{LocalCache, RowStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`LocalCache`] kept in a map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl LocalCache for MemoryCache {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Cache("write refused".into()));
        }
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// [`RowStore`] kept in a vector, with failure injection and a way to hold a
/// select in flight.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    rows: Mutex<Vec<SignatureRecord>>,
    fail_selects: AtomicBool,
    fail_inserts: AtomicBool,
    held_select: Mutex<Option<oneshot::Receiver<()>>>,
    select_held: Notify,
    held_insert: Mutex<Option<oneshot::Receiver<()>>>,
    insert_held: Notify,
    inserts: AtomicUsize,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<SignatureRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// All stored rows in insertion order.
    pub fn rows(&self) -> Vec<SignatureRecord> {
        lock(&self.rows).clone()
    }

    /// Add a row as if another client inserted it.
    pub fn push_row(&self, record: SignatureRecord) {
        lock(&self.rows).push(record);
    }

    pub fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of successful inserts.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Hold the next select after it has read the rows, until the returned
    /// sender fires.
    pub fn hold_next_select(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.held_select) = Some(rx);
        tx
    }

    /// Wait until a held select is parked.
    pub async fn wait_for_held_select(&self) {
        self.select_held.notified().await;
    }

    /// Hold the next insert after the row is committed, until the returned
    /// sender fires.
    pub fn hold_next_insert(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.held_insert) = Some(rx);
        tx
    }

    /// Wait until a held insert is parked.
    pub async fn wait_for_held_insert(&self) {
        self.insert_held.notified().await;
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select_recent(&self, limit: usize) -> Result<Vec<SignatureRecord>> {
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(Error::RemoteRead("select refused".into()));
        }

        let mut rows = self.rows();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);

        let held = lock(&self.held_select).take();
        if let Some(release) = held {
            self.select_held.notify_one();
            let _ = release.await;
        }
        Ok(rows)
    }

    async fn insert(&self, record: &SignatureRecord) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::RemoteWrite("insert refused".into()));
        }
        lock(&self.rows).push(record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);

        let held = lock(&self.held_insert).take();
        if let Some(release) = held {
            self.insert_held.notify_one();
            let _ = release.await;
        }
        Ok(())
    }
}

/// [`IdentityProvider`] with scripted state and login result.
#[derive(Debug)]
pub struct ScriptedProvider {
    ready: AtomicBool,
    user: Mutex<Option<UserProfile>>,
    next_login: Mutex<Option<std::result::Result<UserProfile, LoginFailure>>>,
    logins: Mutex<Vec<LoginOptions>>,
}

impl ScriptedProvider {
    /// A ready provider with nobody signed in.
    pub fn ready() -> Self {
        Self {
            ready: AtomicBool::new(true),
            user: Mutex::new(None),
            next_login: Mutex::new(None),
            logins: Mutex::new(Vec::new()),
        }
    }

    /// A provider that has not finished initializing.
    pub fn booting() -> Self {
        let provider = Self::ready();
        provider.ready.store(false, Ordering::SeqCst);
        provider
    }

    /// A ready provider with `user` signed in.
    pub fn signed_in(user: UserProfile) -> Self {
        let provider = Self::ready();
        *lock(&provider.user) = Some(user);
        provider
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Result of the next login call. Without one, login fails.
    pub fn script_login(&self, result: std::result::Result<UserProfile, LoginFailure>) {
        *lock(&self.next_login) = Some(result);
    }

    /// Options of every login call so far.
    pub fn logins(&self) -> Vec<LoginOptions> {
        lock(&self.logins).clone()
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn authenticated(&self) -> bool {
        lock(&self.user).is_some()
    }

    fn user(&self) -> Option<UserProfile> {
        lock(&self.user).clone()
    }

    async fn login(&self, options: &LoginOptions) -> std::result::Result<UserProfile, LoginFailure> {
        lock(&self.logins).push(options.clone());
        let result = lock(&self.next_login)
            .take()
            .unwrap_or_else(|| Err(LoginFailure::new("login closed")));
        if let Ok(user) = &result {
            *lock(&self.user) = Some(user.clone());
        }
        result
    }

    async fn logout(&self) {
        *lock(&self.user) = None;
    }
}
