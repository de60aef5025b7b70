//! Sign gate - eligibility checks and orchestration of the sign action.
//!
//! Every sign attempt walks four checks in strict order and stops at the
//! first one that fails:
//!
//! 1. **Configured**: an identity provider app id is present.
//! 2. **Ready**: the provider finished initializing.
//! 3. **Authenticated**: otherwise the provider's login flow is started and
//!    the attempt ends there. Signing needs a second, explicit attempt.
//! 4. **Eligible**: no record in the store carries the signer's user id.
//!
//! Only then is a record derived from the identity snapshot and appended.
//! Step 4 and the append run under one lock, so two rapid attempts by the
//! same identity cannot both pass the eligibility check.

use crate::error::Error;
use crate::identity::IdentitySnapshot;
use crate::notice::Notice;
use crate::provider::{IdentityProvider, LoginOptions};
use crate::record::{now_millis, SignatureRecord};
use crate::store::SignatureStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Standing status shown while sign-in is impossible.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "Sign-in is unavailable: no Privy app id is configured for this site.";

/// Result of one sign attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// No identity provider app id.
    NotConfigured,
    /// The provider is still initializing.
    ProviderBooting,
    /// The login flow completed; the user can sign now.
    LoginCompleted { user_id: Option<String> },
    /// The login flow failed.
    LoginFailed { message: String },
    /// This identity already has a signature.
    AlreadySigned,
    /// The signature was recorded.
    Signed {
        record: SignatureRecord,
        /// Saved to the shared remote store rather than only locally
        shared: bool,
    },
    /// Persisting the signature failed; nothing was recorded.
    AppendFailed {
        message: String,
        /// The failed write went to the shared remote store
        shared: bool,
    },
}

impl SignOutcome {
    /// Whether a signature was recorded.
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Signed { .. })
    }

    /// Notice to show for this outcome.
    pub fn notice(&self) -> Notice {
        match self {
            Self::NotConfigured => Notice::error(NOT_CONFIGURED_MESSAGE),
            Self::ProviderBooting => Notice::info("Privy is still booting. Try again in a moment."),
            Self::LoginCompleted { .. } => Notice::info("Signed in. Press sign to add your name."),
            Self::LoginFailed { message } => Notice::error(message.clone()),
            Self::AlreadySigned => Notice::info("You already signed this petition."),
            Self::Signed { shared: true, .. } => {
                Notice::success("Signature saved to the shared petition.")
            }
            Self::Signed { shared: false, .. } => {
                Notice::success("Signature saved locally (no shared store configured).")
            }
            Self::AppendFailed { message, .. } => Notice::error(message.clone()),
        }
    }

    /// The error behind a failed attempt.
    ///
    /// `None` for outcomes that are not failures, including
    /// [`AlreadySigned`](Self::AlreadySigned).
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::NotConfigured => Some(Error::Configuration(NOT_CONFIGURED_MESSAGE.to_string())),
            Self::ProviderBooting => Some(Error::ProviderNotReady),
            Self::LoginFailed { message } => Some(Error::Auth(message.clone())),
            Self::AppendFailed { message, shared: true } => Some(Error::RemoteWrite(message.clone())),
            Self::AppendFailed { message, shared: false } => Some(Error::Cache(message.clone())),
            Self::LoginCompleted { .. } | Self::AlreadySigned | Self::Signed { .. } => None,
        }
    }
}

/// Standing status of the gate for the page header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub configured: bool,
    pub ready: bool,
    pub authenticated: bool,
    pub already_signed: bool,
    pub display_name: Option<String>,
    pub message: String,
}

/// Drives the sign action against a provider and a store.
pub struct SignGate {
    app_id: Option<String>,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SignatureStore>,
    login_options: LoginOptions,
    sign_lock: Arc<Mutex<()>>,
}

impl SignGate {
    /// Create a gate. An empty `app_id` counts as missing.
    pub fn new(
        app_id: Option<String>,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SignatureStore>,
    ) -> Self {
        Self {
            app_id: app_id.filter(|id| !id.trim().is_empty()),
            provider,
            store,
            login_options: LoginOptions::default(),
            sign_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A gate for another visitor's provider.
    ///
    /// Shares the store and the single-flight lock with `self`, so
    /// eligibility stays exclusive across every gate derived this way.
    pub fn with_provider(&self, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            app_id: self.app_id.clone(),
            provider,
            store: Arc::clone(&self.store),
            login_options: self.login_options.clone(),
            sign_lock: Arc::clone(&self.sign_lock),
        }
    }

    /// Override the options passed to the provider's login flow.
    pub fn with_login_options(mut self, options: LoginOptions) -> Self {
        self.login_options = options;
        self
    }

    /// The store this gate appends to.
    pub fn store(&self) -> &Arc<SignatureStore> {
        &self.store
    }

    /// Whether an identity provider app id is configured.
    pub fn is_configured(&self) -> bool {
        self.app_id.is_some()
    }

    /// Run one sign attempt.
    pub async fn sign(&self) -> SignOutcome {
        if !self.is_configured() {
            return SignOutcome::NotConfigured;
        }

        if !self.provider.ready() {
            return SignOutcome::ProviderBooting;
        }

        let user = match self.provider.user().filter(|_| self.provider.authenticated()) {
            Some(user) => user,
            None => return self.login().await,
        };

        let snapshot = IdentitySnapshot::from_profile(&user);

        let _guard = self.sign_lock.lock().await;

        if let Some(user_id) = snapshot.user_id.as_deref() {
            if self.store.has_signed(user_id).await {
                return SignOutcome::AlreadySigned;
            }
        }

        let record = snapshot.into_record(SignatureRecord::generate_id(), now_millis());
        match self.store.append(record.clone()).await {
            Ok(()) => {
                let shared = self.store.is_remote();
                info!(id = %record.id, shared, "signature recorded");
                SignOutcome::Signed { record, shared }
            }
            Err(e) => {
                error!(error = %e, "failed to record signature");
                SignOutcome::AppendFailed {
                    message: "Could not save your signature. Please try again.".to_string(),
                    shared: self.store.is_remote(),
                }
            }
        }
    }

    async fn login(&self) -> SignOutcome {
        info!(methods = ?self.login_options.methods, "starting login flow");
        match self.provider.login(&self.login_options).await {
            Ok(user) => {
                info!(user_id = ?user.id, "login completed");
                SignOutcome::LoginCompleted { user_id: user.id }
            }
            Err(failure) => {
                warn!(reason = %failure.reason, "login failed");
                SignOutcome::LoginFailed {
                    message: login_failure_message(&failure.reason),
                }
            }
        }
    }

    /// End the provider session.
    pub async fn logout(&self) {
        self.provider.logout().await;
        info!("signed out");
    }

    /// Current standing status.
    pub async fn status(&self) -> GateStatus {
        let configured = self.is_configured();
        let ready = configured && self.provider.ready();
        let user = self
            .provider
            .user()
            .filter(|_| ready && self.provider.authenticated());

        let (already_signed, display_name) = match &user {
            Some(user) => {
                let snapshot = IdentitySnapshot::from_profile(user);
                let signed = match snapshot.user_id.as_deref() {
                    Some(id) => self.store.has_signed(id).await,
                    None => false,
                };
                (signed, Some(snapshot.display_name))
            }
            None => (false, None),
        };

        let message = match (&display_name, already_signed) {
            _ if !configured => NOT_CONFIGURED_MESSAGE.to_string(),
            _ if !ready => "Booting Privy...".to_string(),
            (Some(name), true) => format!("Signed in as {}. You already signed.", name),
            (Some(name), false) => format!("Signed in as {}.", name),
            (None, _) => "Sign in with a wallet or Twitter to add your signature.".to_string(),
        };

        GateStatus {
            configured,
            ready,
            authenticated: display_name.is_some(),
            already_signed,
            display_name,
            message,
        }
    }
}

/// User-facing text for a failed login.
///
/// Twitter failures usually mean the social login is not enabled for the app.
pub fn login_failure_message(reason: &str) -> String {
    if reason.to_ascii_lowercase().contains("twitter") {
        "Twitter login failed. Twitter may not be enabled for this app yet; try a wallet instead."
            .to_string()
    } else {
        "Login failed. Please try again.".to_string()
    }
}
