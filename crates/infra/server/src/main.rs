//! Freightline server binary.

use freightline_server::{FreightlineServer, load_from_env};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = load_from_env(std::env::args())?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create and run server
    let server = FreightlineServer::new(config).await;
    server.run().await?;

    Ok(())
}
