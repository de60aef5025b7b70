//! Session-backed identity provider.
//!
//! The provider's own SDK runs in the page. The node only sees its results:
//! the page posts the signed-in profile (or the failure reason) back, and a
//! [`login`](IdentityProvider::login) waiting for that handoff resolves.
//!
//! Each visitor has its own provider (see [`crate::client`]). At most one
//! login is pending per provider. Starting another one supersedes the first,
//! whose caller gets a failure.

use async_trait::async_trait;
use petition_core::{now_millis, IdentityProvider, LoginFailure, LoginOptions, UserProfile};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

type LoginReply = Result<UserProfile, LoginFailure>;

/// A login waiting for the page to finish the provider flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub id: u64,
    pub options: LoginOptions,
    pub started_at: u64,
}

struct PendingLogin {
    request: LoginRequest,
    reply: oneshot::Sender<LoginReply>,
}

/// Identity provider fed by the page's login handoff.
pub struct SessionProvider {
    ready: Arc<AtomicBool>,
    user: Mutex<Option<UserProfile>>,
    pending: Mutex<Option<PendingLogin>>,
    next_request: AtomicU64,
    login_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionProvider {
    /// Create a provider that is not ready yet.
    pub fn new(login_timeout: Duration) -> Self {
        Self::with_ready_flag(login_timeout, Arc::new(AtomicBool::new(false)))
    }

    /// Create a provider whose readiness follows `ready`.
    pub fn with_ready_flag(login_timeout: Duration, ready: Arc<AtomicBool>) -> Self {
        Self {
            ready,
            user: Mutex::new(None),
            pending: Mutex::new(None),
            next_request: AtomicU64::new(1),
            login_timeout,
        }
    }

    /// Mark initialization as finished.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// The pending login, if any.
    pub fn pending_request(&self) -> Option<LoginRequest> {
        lock(&self.pending).as_ref().map(|p| p.request.clone())
    }

    /// Adopt `profile` as the signed-in user.
    ///
    /// Resolves the pending login if there is one; returns whether it did. A
    /// handoff without a pending login restores an existing session.
    pub fn complete_login(&self, profile: UserProfile) -> bool {
        *lock(&self.user) = Some(profile.clone());
        match lock(&self.pending).take() {
            Some(pending) => {
                debug!(request = pending.request.id, "login handoff received");
                pending.reply.send(Ok(profile)).is_ok()
            }
            None => {
                info!(user_id = ?profile.id, "session restored");
                false
            }
        }
    }

    /// Fail the pending login with the provider's reason.
    pub fn fail_login(&self, reason: impl Into<String>) -> bool {
        match lock(&self.pending).take() {
            Some(pending) => pending.reply.send(Err(LoginFailure::new(reason))).is_ok(),
            None => false,
        }
    }

    fn clear_pending(&self, id: u64) {
        let mut pending = lock(&self.pending);
        if pending.as_ref().map(|p| p.request.id) == Some(id) {
            *pending = None;
        }
    }
}

#[async_trait]
impl IdentityProvider for SessionProvider {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn authenticated(&self) -> bool {
        lock(&self.user).is_some()
    }

    fn user(&self) -> Option<UserProfile> {
        lock(&self.user).clone()
    }

    async fn login(&self, options: &LoginOptions) -> Result<UserProfile, LoginFailure> {
        let (reply, handoff) = oneshot::channel();
        let request = LoginRequest {
            id: self.next_request.fetch_add(1, Ordering::SeqCst),
            options: options.clone(),
            started_at: now_millis(),
        };
        let id = request.id;

        // Replacing drops the previous sender, which fails its waiter.
        *lock(&self.pending) = Some(PendingLogin { request, reply });
        info!(request = id, "login requested, waiting for provider handoff");

        match tokio::time::timeout(self.login_timeout, handoff).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LoginFailure::new("login superseded by a newer attempt")),
            Err(_) => {
                self.clear_pending(id);
                Err(LoginFailure::new("login timed out waiting for the provider"))
            }
        }
    }

    async fn logout(&self) {
        *lock(&self.user) = None;
        if let Some(pending) = lock(&self.pending).take() {
            let _ = pending.reply.send(Err(LoginFailure::new("logged out")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    async fn wait_for_pending(provider: &SessionProvider) -> LoginRequest {
        loop {
            if let Some(request) = provider.pending_request() {
                return request;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn handoff_completes_login() {
        let provider = Arc::new(SessionProvider::new(Duration::from_secs(5)));
        provider.mark_ready();
        assert!(!provider.authenticated());

        let login = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.login(&LoginOptions::default()).await })
        };

        let request = wait_for_pending(&provider).await;
        assert_eq!(request.options, LoginOptions::default());

        assert!(provider.complete_login(profile("u1")));
        assert_eq!(login.await.unwrap().unwrap().id.as_deref(), Some("u1"));
        assert!(provider.authenticated());
        assert!(provider.pending_request().is_none());
    }

    #[tokio::test]
    async fn failure_handoff_fails_login() {
        let provider = Arc::new(SessionProvider::new(Duration::from_secs(5)));
        let login = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.login(&LoginOptions::default()).await })
        };
        wait_for_pending(&provider).await;

        assert!(provider.fail_login("twitter not enabled"));
        let failure = login.await.unwrap().unwrap_err();
        assert_eq!(failure.reason, "twitter not enabled");
        assert!(!provider.authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn login_times_out() {
        let provider = SessionProvider::new(Duration::from_secs(30));
        let failure = provider.login(&LoginOptions::default()).await.unwrap_err();
        assert!(failure.reason.contains("timed out"));
        assert!(provider.pending_request().is_none());
    }

    #[tokio::test]
    async fn newer_login_supersedes_older() {
        let provider = Arc::new(SessionProvider::new(Duration::from_secs(5)));
        let first = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.login(&LoginOptions::default()).await })
        };
        let first_id = wait_for_pending(&provider).await.id;

        let second = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.login(&LoginOptions::default()).await })
        };
        loop {
            if provider.pending_request().map(|r| r.id) != Some(first_id) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(first.await.unwrap().unwrap_err().reason.contains("superseded"));
        provider.complete_login(profile("u2"));
        assert!(second.await.unwrap().is_ok());
    }

    #[test]
    fn shared_ready_flag() {
        let ready = Arc::new(AtomicBool::new(false));
        let a = SessionProvider::with_ready_flag(Duration::from_secs(5), ready.clone());
        let b = SessionProvider::with_ready_flag(Duration::from_secs(5), ready);
        assert!(!b.ready());

        a.mark_ready();
        assert!(b.ready());
    }

    #[tokio::test]
    async fn restore_and_logout() {
        let provider = SessionProvider::new(Duration::from_secs(5));
        assert!(!provider.complete_login(profile("u1")));
        assert!(provider.authenticated());

        provider.logout().await;
        assert!(provider.user().is_none());
    }
}
