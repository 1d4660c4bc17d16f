use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use validator::Validate;

use crate::{
    clients::{health::HealthChecker, queue::QueueClient},
    models::{
        complaint::ComplaintSubmission,
        health::{HealthCheckResponse, HealthStatus},
        response::{Accepted, ApiResponse},
    },
    policy::ResiliencePolicy,
};

pub struct AppState {
    pub queue: Arc<dyn QueueClient>,
    pub ingest_policy: ResiliencePolicy,
    pub health_checker: HealthChecker,
}

/// Ingestion front door plus health, served by the `api` role.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/complaints", post(submit_complaint))
        .route("/health", get(app_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health only, served next to the workers.
pub fn health_router(health_checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(worker_health))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(health_checker))
}

pub async fn serve(app: Router, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

async fn submit_complaint(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ComplaintSubmission>, JsonRejection>,
) -> Response {
    let Json(submission) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed complaint request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<Accepted>::error(
                    "invalid_json".to_string(),
                    rejection.body_text(),
                )),
            )
                .into_response();
        }
    };

    if let Err(errors) = submission.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Accepted>::validation(&errors)),
        )
            .into_response();
    }

    match enqueue(&state, &submission).await {
        Ok(message_id) => {
            info!(
                message_id = %message_id,
                complaint_type = %submission.complaint_type,
                "Complaint accepted"
            );
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(
                    Accepted { message_id },
                    "Complaint accepted for processing".to_string(),
                )),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to enqueue complaint");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Accepted>::error(
                    "internal_error".to_string(),
                    "The complaint could not be accepted, please try again later".to_string(),
                )),
            )
                .into_response()
        }
    }
}

async fn enqueue(state: &AppState, submission: &ComplaintSubmission) -> Result<String, Error> {
    let body = serde_json::to_string(submission)?;
    let message_id = state
        .ingest_policy
        .execute(|| state.queue.send(&body))
        .await?;
    Ok(message_id)
}

async fn app_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    health_response(&state.health_checker).await
}

async fn worker_health(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    health_response(&checker).await
}

async fn health_response(checker: &HealthChecker) -> (StatusCode, Json<HealthCheckResponse>) {
    let health = checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
