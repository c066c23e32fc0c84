//! REST API handlers for campaign management and the delivery webhook.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mailflow_audience::load_audience;
use mailflow_core::config::AppConfig;
use mailflow_core::types::{CampaignRecord, CampaignReport, CampaignStatus};
use mailflow_core::MailflowError;
use mailflow_orchestrator::{CampaignRegistry, Orchestrator};
use mailflow_tracking::{SendGridEvent, WebhookProcessor, WebhookSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Maximum campaign name length.
const MAX_NAME_LEN: usize = 120;

/// Maximum brief length.
const MAX_BRIEF_LEN: usize = 8_000;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<CampaignRegistry>,
    pub webhooks: Arc<WebhookProcessor>,
    pub config: Arc<AppConfig>,
    pub start_time: Instant,
}

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub brief: String,
}

#[derive(Serialize)]
pub struct CreateCampaignResponse {
    pub campaign_id: String,
    pub status: CampaignStatus,
}

#[derive(Serialize)]
pub struct CampaignSummary {
    pub campaign_id: String,
    pub name: String,
    pub stage: String,
    pub status: CampaignStatus,
}

/// Validate a campaign creation request at the API boundary.
fn validate_create(request: &CreateCampaignRequest) -> Result<(), &'static str> {
    if request.name.trim().is_empty() {
        return Err("campaign 'name' must not be empty");
    }
    if request.name.len() > MAX_NAME_LEN {
        return Err("campaign 'name' exceeds maximum length");
    }
    if request.brief.trim().is_empty() {
        return Err("campaign 'brief' must not be empty");
    }
    if request.brief.len() > MAX_BRIEF_LEN {
        return Err("campaign 'brief' exceeds maximum length");
    }
    Ok(())
}

/// POST /v1/campaigns — create a campaign and start it in the background.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), (StatusCode, Json<ErrorResponse>)> {
    if let Err(msg) = validate_create(&request) {
        warn!(error = msg, "Campaign creation rejected");
        metrics::counter!("api.validation_errors").increment(1);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_campaign_request".to_string(),
                message: msg.to_string(),
            }),
        ));
    }

    let record = state
        .orchestrator
        .create(request.name.trim(), request.brief.trim());
    let campaign_id = record.campaign_id.clone();

    let orchestrator = Arc::clone(&state.orchestrator);
    let registry = Arc::clone(&state.registry);
    let config = Arc::clone(&state.config);
    let id = campaign_id.clone();
    tokio::spawn(async move {
        let audience =
            match load_audience(&config.audience.file, config.audience.on_malformed_row) {
                Ok(audience) => audience,
                Err(e) => {
                    error!(campaign_id = %id, error = %e, "Audience load failed");
                    if let Ok(entry) = registry.get(&id) {
                        entry.record.write().set_error(e.to_string());
                    }
                    return;
                }
            };
        if let Err(e) = orchestrator.run(&id, audience).await {
            error!(campaign_id = %id, error = %e, "Campaign run failed to start");
        }
    });

    info!(campaign_id = %campaign_id, "Campaign accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateCampaignResponse {
            campaign_id,
            status: CampaignStatus::Pending,
        }),
    ))
}

/// GET /v1/campaigns — summaries of all known campaigns, newest first.
pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<CampaignSummary>> {
    let summaries = state
        .registry
        .list()
        .into_iter()
        .map(|r| CampaignSummary {
            campaign_id: r.campaign_id,
            name: r.name,
            stage: r.stage.as_str().to_string(),
            status: r.status,
        })
        .collect();
    Json(summaries)
}

/// GET /v1/campaigns/:id — full current state of one campaign.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CampaignRecord>, (StatusCode, Json<ErrorResponse>)> {
    state.registry.snapshot(&id).map(Json).map_err(not_found)
}

/// POST /v1/campaigns/:id/cancel — request cancellation of a running campaign.
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.registry.cancel(&id).map_err(not_found)?;
    info!(campaign_id = %id, "Cancellation requested");
    Ok(StatusCode::ACCEPTED)
}

/// GET /v1/campaigns/:id/report — the final report, 404 until it exists.
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CampaignReport>, (StatusCode, Json<ErrorResponse>)> {
    let record = state.registry.snapshot(&id).map_err(not_found)?;
    match record.report {
        Some(report) => Ok(Json(report)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "report_not_ready".to_string(),
                message: format!("campaign '{id}' has not produced a report yet"),
            }),
        )),
    }
}

/// POST /webhook/sendgrid — inbound engagement events.
///
/// Always returns 200: the vendor retries on any non-2xx, and a malformed
/// or unresolvable event is not worth a redelivery storm.
pub async fn sendgrid_webhook(
    State(state): State<AppState>,
    Json(events): Json<Vec<SendGridEvent>>,
) -> Json<WebhookSummary> {
    let summary = state.webhooks.process(events);
    info!(
        received = summary.received,
        recorded = summary.recorded,
        dropped = summary.dropped,
        "Webhook batch processed"
    );
    Json(summary)
}

/// GET /health — health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

fn not_found(e: MailflowError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_string(),
            message: e.to_string(),
        }),
    )
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
