//! # Freightline Server
//!
//! Wires the event bus, the webhook engine and the assignment manager into
//! one process and exposes them over HTTP.

mod config;
mod error;
pub mod routes;

pub use config::{
    AssignmentSettings, BackoffKind, CarrierConfig, ConfigError, FreightlineConfig, ServerConfig,
    WebhookSettings, load_config, load_from_env, parse_config, CONFIG_ENV,
};
pub use error::{ApiError, ServerError};

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use freightline_assignments::{AssignmentManager, InMemoryAssignmentStore, StaticCarrierRanking};
use freightline_events::EventBus;
use freightline_webhooks::WebhookSystem;

/// How often old delivery records are purged.
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub webhooks: Arc<WebhookSystem>,
    pub assignments: Arc<AssignmentManager>,
}

/// The Freightline process.
pub struct FreightlineServer {
    /// Server configuration.
    pub config: FreightlineConfig,
    state: AppState,
}

impl FreightlineServer {
    /// Builds every component with in-memory storage and connects them.
    ///
    /// Assignment events published by the manager reach webhook
    /// subscribers through the shared bus.
    pub async fn new(config: FreightlineConfig) -> Self {
        let bus = Arc::new(EventBus::new());

        let webhooks = Arc::new(WebhookSystem::new(config.webhooks.to_config()));
        webhooks.clone().connect_to_events(&bus).await;

        let assignments = AssignmentManager::builder(
            Arc::new(InMemoryAssignmentStore::new()),
            Arc::new(StaticCarrierRanking::new(config.carrier_ids())),
        )
        .event_bus(bus.clone())
        .config(config.assignments.to_config())
        .build();

        Self {
            config,
            state: AppState {
                bus,
                webhooks,
                assignments,
            },
        }
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The HTTP router.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Starts the webhook sweeper, the assignment sweeper and the retention loop.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let webhooks = self.state.webhooks.clone();
        let retention_days = self.config.webhooks.retention_days;
        let retention = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = webhooks.cleanup_events(retention_days).await {
                    tracing::error!("Delivery cleanup error: {}", e);
                }
            }
        });

        vec![
            self.state.webhooks.spawn_sweeper(),
            self.state.assignments.spawn_sweeper(),
            retention,
        ]
    }

    /// Starts the server and runs until interrupted.
    pub async fn run(&self) -> Result<(), ServerError> {
        let restored = self.state.assignments.restore_timers().await?;
        tracing::info!(restored, "Assignment timers restored");

        let background = self.spawn_background();

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Starting Freightline server on {}", addr);
        tracing::info!("Known carriers: {:?}", self.config.carrier_ids());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

        tracing::info!("Shutting down");
        for handle in background {
            handle.abort();
        }
        self.state.assignments.shutdown().await;
        Ok(())
    }
}
