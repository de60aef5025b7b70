//! Petition Node binary
//!
//! Hosts the petition page's API, signature feed and local cache.

use petition_node::{PetitionConfig, PetitionNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "petition_node=info,petition_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Petition Node");

    let config = PetitionConfig::from_env()?;

    let node = PetitionNode::new(config).await?;
    node.run().await?;

    Ok(())
}
