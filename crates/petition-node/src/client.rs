//! Per-visitor sessions.
//!
//! Every browser gets its own identity provider session, sign gate and
//! notification slot, addressed by an opaque token the page sends back in the
//! `x-petition-session` header. All gates share the one signature store and
//! one single-flight lock, so eligibility is still decided store-wide.

use crate::session::SessionProvider;
use crate::shell::{NoticeSlot, NOTICE_TTL};
use petition_core::{SignGate, SignatureStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Request and response header carrying the session token.
pub const SESSION_HEADER: &str = "x-petition-session";

/// Sessions untouched for this long are dropped.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One visitor's session.
pub struct ClientSession {
    pub token: String,
    pub provider: Arc<SessionProvider>,
    pub gate: SignGate,
    pub notices: NoticeSlot,
    last_seen: Mutex<Instant>,
}

impl ClientSession {
    fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*lock(&self.last_seen))
    }
}

/// Token-keyed sessions sharing one store and one readiness flag.
pub struct ClientRegistry {
    template: SignGate,
    ready: Arc<AtomicBool>,
    login_timeout: Duration,
    idle_ttl: Duration,
    notice_ttl: Duration,
    clients: Mutex<HashMap<String, Arc<ClientSession>>>,
}

impl ClientRegistry {
    pub fn new(app_id: Option<String>, store: Arc<SignatureStore>, login_timeout: Duration) -> Self {
        let ready = Arc::new(AtomicBool::new(false));
        // Never handed a login; answers status for visitors without a session.
        let anonymous = Arc::new(SessionProvider::with_ready_flag(login_timeout, ready.clone()));
        Self {
            template: SignGate::new(app_id, anonymous, store),
            ready,
            login_timeout,
            idle_ttl: SESSION_IDLE_TTL,
            notice_ttl: NOTICE_TTL,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Override how long an untouched session survives.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Override how long a session's notices stay visible.
    pub fn with_notice_ttl(mut self, notice_ttl: Duration) -> Self {
        self.notice_ttl = notice_ttl;
        self
    }

    /// Mark every provider, current and future, as initialized.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("identity provider ready");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Gate for a visitor that has no session.
    pub fn anonymous_gate(&self) -> &SignGate {
        &self.template
    }

    /// Look up a live session and mark it as used.
    pub fn get(&self, token: &str) -> Option<Arc<ClientSession>> {
        let client = lock(&self.clients).get(token).cloned()?;
        client.touch();
        Some(client)
    }

    /// Start a new session with a fresh token.
    pub fn open(&self) -> Arc<ClientSession> {
        let token = Uuid::new_v4().simple().to_string();
        let provider = Arc::new(SessionProvider::with_ready_flag(
            self.login_timeout,
            self.ready.clone(),
        ));
        let client = Arc::new(ClientSession {
            token: token.clone(),
            gate: self.template.with_provider(provider.clone()),
            provider,
            notices: NoticeSlot::new(self.notice_ttl),
            last_seen: Mutex::new(Instant::now()),
        });

        let mut clients = lock(&self.clients);
        let now = Instant::now();
        let before = clients.len();
        clients.retain(|_, c| c.idle_for(now) < self.idle_ttl);
        if clients.len() < before {
            debug!(dropped = before - clients.len(), "dropped idle sessions");
        }
        clients.insert(token, Arc::clone(&client));
        debug!(sessions = clients.len(), "session opened");
        client
    }

    /// The session for `token`, or a new one when it is missing or unknown.
    pub fn resolve(&self, token: Option<&str>) -> Arc<ClientSession> {
        match token.and_then(|t| self.get(t)) {
            Some(client) => client,
            None => self.open(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
