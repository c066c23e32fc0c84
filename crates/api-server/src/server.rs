//! HTTP server wiring: routes, middleware, and the metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use mailflow_core::config::AppConfig;
use mailflow_orchestrator::Orchestrator;
use mailflow_tracking::WebhookProcessor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: Arc<AppConfig>,
    orchestrator: Arc<Orchestrator>,
    webhooks: Arc<WebhookProcessor>,
}

impl ApiServer {
    pub fn new(
        config: Arc<AppConfig>,
        orchestrator: Arc<Orchestrator>,
        webhooks: Arc<WebhookProcessor>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            webhooks,
        }
    }

    /// Start the HTTP server and serve until the process exits.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            orchestrator: Arc::clone(&self.orchestrator),
            registry: Arc::clone(self.orchestrator.registry()),
            webhooks: Arc::clone(&self.webhooks),
            config: Arc::clone(&self.config),
            start_time: Instant::now(),
        };

        let app = Router::new()
            // Campaign lifecycle
            .route(
                "/v1/campaigns",
                post(rest::create_campaign).get(rest::list_campaigns),
            )
            .route("/v1/campaigns/:id", get(rest::get_campaign))
            .route("/v1/campaigns/:id/cancel", post(rest::cancel_campaign))
            .route("/v1/campaigns/:id/report", get(rest::get_report))
            // Delivery vendor callbacks
            .route("/webhook/sendgrid", post(rest::sendgrid_webhook))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::new(
            self.config.api.host.parse()?,
            self.config.api.http_port,
        );

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus exporter on the metrics port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.api.metrics_port,
            ))
            .install_recorder()?;

        info!(port = self.config.api.metrics_port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
