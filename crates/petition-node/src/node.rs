//! Petition Node - the main application entry point.
//!
//! Architecture:
//! - One signature store, local (RocksDB) or remote (row store over HTTP)
//! - One session per visitor, fed by the page's identity provider SDK
//! - HTTP API + WebSocket feed for the page

use crate::api;
use crate::client::ClientRegistry;
use crate::config::PetitionConfig;
use crate::error::Result;
use crate::remote::RestRowStore;
use crate::shell::{IntroOverlay, NoticeSlot, INTRO_TTL};
use crate::storage::Storage;
use petition_core::gate::NOT_CONFIGURED_MESSAGE;
use petition_core::{now_millis, Notice, SignatureRecord, SignatureStore};
use std::sync::Arc;

/// Shared state for the node - one store, one session per visitor.
pub struct PetitionState {
    pub config: PetitionConfig,
    pub store: Arc<SignatureStore>,
    pub sessions: ClientRegistry,
    /// Site-wide notices, such as a failed load
    pub notices: NoticeSlot,
    pub intro: IntroOverlay,
}

impl PetitionState {
    /// Wire visitor sessions over `store`.
    pub fn new(config: PetitionConfig, store: Arc<SignatureStore>) -> Self {
        let sessions = ClientRegistry::new(
            config.privy_app_id.clone(),
            store.clone(),
            config.login_timeout,
        );
        Self::with_sessions(config, store, sessions)
    }

    /// Use a prepared session registry; it must share `store`.
    pub fn with_sessions(
        config: PetitionConfig,
        store: Arc<SignatureStore>,
        sessions: ClientRegistry,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            notices: NoticeSlot::default(),
            intro: IntroOverlay::new(),
        }
    }

    /// Reload from the remote store, surfacing failures as a notice.
    pub async fn refresh(&self) -> petition_core::Result<petition_core::LoadOutcome> {
        let outcome = self.store.load().await;
        if outcome.is_err() {
            self.notices
                .show(Notice::error("Could not load signatures from the shared store."));
        }
        outcome
    }
}

/// A petition node instance.
pub struct PetitionNode {
    state: Arc<PetitionState>,
    config: PetitionConfig,
}

impl PetitionNode {
    /// Create a new node, opening the store selected by `config`.
    pub async fn new(config: PetitionConfig) -> Result<Self> {
        let seeds = SignatureRecord::seeds(now_millis());

        let store = match &config.remote {
            Some(remote) => {
                tracing::info!(url = %remote.url, table = %remote.table, "using shared row store");
                let rows = RestRowStore::new(remote.clone())?;
                SignatureStore::remote(Arc::new(rows), seeds)
            }
            None => {
                tracing::info!("no shared store configured, signatures stay local");
                std::fs::create_dir_all(&config.data_dir)?;
                let storage = Storage::open(&config.data_dir)?;
                SignatureStore::local(Arc::new(storage), seeds)
            }
        };

        if config.privy_app_id.is_none() {
            tracing::warn!("{}", NOT_CONFIGURED_MESSAGE);
        }

        let state = Arc::new(PetitionState::new(config.clone(), Arc::new(store)));

        Ok(Self { state, config })
    }

    /// Get the shared state (for API handlers).
    pub fn state(&self) -> Arc<PetitionState> {
        Arc::clone(&self.state)
    }

    /// Run the node: initial load, then serve the HTTP API.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Petition node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!("  Remote: {}", self.state.store.is_remote());

        if let Err(e) = self.state.refresh().await {
            tracing::error!("Initial signature load failed: {}", e);
        }

        self.state.sessions.mark_ready();
        self.state.intro.show_for(INTRO_TTL);

        let app = api::build_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
