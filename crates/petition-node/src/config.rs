//! Node configuration from the environment.
//!
//! | variable | default |
//! |----------|---------|
//! | `PETITION_DATA_DIR` | `./petition-data` |
//! | `PETITION_API_ADDR` | `0.0.0.0:8080` |
//! | `PETITION_PRIVY_APP_ID` | unset: sign-in disabled |
//! | `PETITION_SUPABASE_URL` | unset: local-only |
//! | `PETITION_SUPABASE_KEY` | unset: local-only |
//! | `PETITION_SUPABASE_TABLE` | `signatures` |
//! | `PETITION_LOGIN_TIMEOUT_SECS` | `120` |
//! | `PETITION_STATIC_DIR` | unset: API only |

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the shared row store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,

    /// Anonymous access key
    pub api_key: String,

    /// Table holding signature rows
    pub table: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: "signatures".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Configuration for a petition node.
#[derive(Debug, Clone)]
pub struct PetitionConfig {
    /// Data directory for the local cache
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Identity provider app id; `None` disables sign-in
    pub privy_app_id: Option<String>,

    /// Shared row store; `None` runs local-only
    pub remote: Option<RemoteConfig>,

    /// How long a login waits for the provider handoff
    pub login_timeout: Duration,

    /// Directory with the page's static assets
    pub static_dir: Option<PathBuf>,
}

impl Default for PetitionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./petition-data"),
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            privy_app_id: None,
            remote: None,
            login_timeout: Duration::from_secs(120),
            static_dir: None,
        }
    }
}

impl PetitionConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let data_dir = var("PETITION_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let api_addr = match var("PETITION_API_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|e| Error::Config(format!("PETITION_API_ADDR {:?}: {}", addr, e)))?,
            None => defaults.api_addr,
        };

        let remote = match (var("PETITION_SUPABASE_URL"), var("PETITION_SUPABASE_KEY")) {
            (Some(url), Some(key)) => {
                let mut remote = RemoteConfig::new(url, key);
                if let Some(table) = var("PETITION_SUPABASE_TABLE") {
                    remote.table = table;
                }
                Some(remote)
            }
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("only one of PETITION_SUPABASE_URL / PETITION_SUPABASE_KEY is set, running local-only");
                None
            }
            (None, None) => None,
        };

        let login_timeout = match var("PETITION_LOGIN_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|e| {
                Error::Config(format!("PETITION_LOGIN_TIMEOUT_SECS {:?}: {}", secs, e))
            })?),
            None => defaults.login_timeout,
        };

        Ok(Self {
            data_dir,
            api_addr,
            privy_app_id: var("PETITION_PRIVY_APP_ID"),
            remote,
            login_timeout,
            static_dir: var("PETITION_STATIC_DIR").map(PathBuf::from),
        })
    }
}
