//! Petition Core - signatures, eligibility and identity
//!
//! The state behind a single-page petition: who signed, whether the current
//! user may sign, and how a provider profile turns into a signature.
//!
//! # Architecture
//!
//! - **Identity**: provider profile → display name and proof string (pure)
//! - **Store**: ordered signature list over a local cache or a remote row store
//! - **Gate**: the sign action's checks (configured, ready, authenticated,
//!   not yet signed) and the append that follows
//!
//! Collaborators are traits ([`IdentityProvider`], [`RowStore`],
//! [`LocalCache`]) injected at construction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use petition_core::{SignGate, SignatureRecord, SignatureStore, now_millis};
//! # use petition_core::{IdentityProvider, LocalCache};
//! # async fn run(cache: Arc<dyn LocalCache>, provider: Arc<dyn IdentityProvider>) {
//! let store = Arc::new(SignatureStore::local(cache, SignatureRecord::seeds(now_millis())));
//! let gate = SignGate::new(Some("app-id".into()), provider, store);
//! let outcome = gate.sign().await;
//! println!("{}", outcome.notice().message);
//! # }
//! ```

pub mod error;
pub mod gate;
pub mod identity;
pub mod notice;
pub mod provider;
pub mod record;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use gate::{GateStatus, SignGate, SignOutcome};
pub use identity::{
    shorten_address, ChainType, IdentitySnapshot, LinkedWallet, TwitterAccount, UserProfile,
    WalletInfo,
};
pub use notice::{Notice, NoticeKind};
pub use provider::{EmbeddedWalletPolicy, IdentityProvider, LoginFailure, LoginMethod, LoginOptions};
pub use record::{format_ago, now_millis, SignatureRecord};
pub use store::{LoadOutcome, LocalCache, RowStore, SignatureStore, StoreEvent};
