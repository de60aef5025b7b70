//! Error types for petition-core.

use thiserror::Error;

/// Result type for petition-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, storing or signing.
///
/// Expected rejections (an identity that already signed) are not errors;
/// see [`crate::gate::SignOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration value is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The identity provider has not finished initializing.
    #[error("identity provider is not ready")]
    ProviderNotReady,

    /// The login flow failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Fetching rows from the remote store failed.
    #[error("remote read failed: {0}")]
    RemoteRead(String),

    /// Inserting a row into the remote store failed.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// Cached data could not be parsed.
    #[error("local cache unreadable: {0}")]
    LocalParse(String),

    /// The local cache backend failed.
    #[error("local cache error: {0}")]
    Cache(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
