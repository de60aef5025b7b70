//! Identity provider contract.
//!
//! Authentication itself is delegated: the provider owns the login flow and
//! reports readiness, session state and the signed-in user.

use crate::identity::UserProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Login methods offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Wallet,
    Twitter,
}

/// When the provider should create an embedded wallet on login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddedWalletPolicy {
    Off,
    UsersWithoutWallets,
    AllUsers,
}

/// Options passed to [`IdentityProvider::login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOptions {
    pub methods: Vec<LoginMethod>,
    pub create_embedded_wallet: EmbeddedWalletPolicy,
}

impl Default for LoginOptions {
    /// Wallet first, then Twitter; embedded wallet for users without one.
    fn default() -> Self {
        Self {
            methods: vec![LoginMethod::Wallet, LoginMethod::Twitter],
            create_embedded_wallet: EmbeddedWalletPolicy::UsersWithoutWallets,
        }
    }
}

/// Login flow failure as reported by the provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("login failed: {reason}")]
pub struct LoginFailure {
    pub reason: String,
}

impl LoginFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A third-party identity provider (wallet or social login).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether the provider finished initializing.
    fn ready(&self) -> bool;

    /// Whether a user is signed in.
    fn authenticated(&self) -> bool;

    /// The signed-in user, if any.
    fn user(&self) -> Option<UserProfile>;

    /// Run the provider's login flow to completion.
    async fn login(&self, options: &LoginOptions) -> Result<UserProfile, LoginFailure>;

    /// End the current session.
    async fn logout(&self);
}
