/**
 * API REST NETBENCH - Surface de contrôle des expériences
 *
 * RÔLE :
 * Expose l'orchestrateur en HTTP/JSON : démarrer, arrêter, observer une
 * expérience et relire le journal de résultats.
 *
 * FONCTIONNEMENT :
 * - Routeur Axum, une route par opération, sérialisation JSON automatique
 * - Erreurs métier -> ApiError -> code HTTP + corps {"error": "..."}
 * - Tout ce qui se passe après le 202 est asynchrone et visible uniquement
 *   dans les logs et via /experiment_status
 *
 * SÉCURITÉ :
 * - Si NETBENCH_API_KEY est défini, header x-api-key obligatoire sauf /health
 */

use crate::health::{ControllerHealth, HealthTracker};
use crate::hosts::StartRequest;
use crate::models::ThroughputResult;
use crate::orchestrator::{ExperimentError, Orchestrator};
use crate::state::ExperimentSnapshot;
use crate::store::StoreError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("experiment already running")]
    Conflict,
    #[error("no experiment running")]
    NotRunning,
    #[error("result log unreadable: {0}")]
    Storage(#[from] StoreError),
}

impl From<ExperimentError> for ApiError {
    fn from(e: ExperimentError) -> Self {
        match e {
            ExperimentError::Validation(msg) => ApiError::Validation(msg),
            ExperimentError::Conflict => ApiError::Conflict,
            ExperimentError::NotRunning => ApiError::NotRunning,
            ExperimentError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::NotRunning => StatusCode::BAD_REQUEST,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Storage(e) => {
                error!(error = %e, "result log read failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub health_tracker: HealthTracker,
    /// `None` leaves the API open
    pub api_key: Option<String>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!(path = %req.uri().path(), "request rejected: missing or invalid x-api-key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start_experiment", post(start_experiment))
        .route("/stop_experiment", post(stop_experiment))
        .route("/experiment_status", get(experiment_status))
        .route("/results", get(results))
        .route("/results/current", get(current_results))
        .route("/hosts", get(hosts))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

// GET /health
async fn health(State(app): State<AppState>) -> Json<ControllerHealth> {
    Json(app.health_tracker.get_health())
}

// POST /start_experiment
async fn start_experiment(
    State(app): State<AppState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    // le conflit prime sur un corps invalide
    if !app.orchestrator.state().is_idle() {
        return Err(ApiError::Conflict);
    }
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let experiment_id = app.orchestrator.start(&request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "experiment_id": experiment_id })),
    ))
}

// POST /stop_experiment
async fn stop_experiment(State(app): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    app.orchestrator.stop().await?;
    Ok(Json(json!({ "status": "stopped" })))
}

// GET /experiment_status
async fn experiment_status(State(app): State<AppState>) -> Json<ExperimentSnapshot> {
    Json(app.orchestrator.snapshot())
}

#[derive(Debug, Deserialize)]
struct ResultsParams {
    experiment_id: Option<String>,
}

// GET /results?experiment_id=
async fn results(
    State(app): State<AppState>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<Vec<ThroughputResult>>, ApiError> {
    let results = app.orchestrator.query_results(params.experiment_id.as_deref()).await?;
    Ok(Json(results))
}

#[derive(Debug, Serialize)]
struct CurrentResults {
    experiment_id: Option<String>,
    results: Vec<ThroughputResult>,
}

// GET /results/current
async fn current_results(State(app): State<AppState>) -> Json<CurrentResults> {
    let (experiment_id, results) = app.orchestrator.current_results();
    Json(CurrentResults { experiment_id, results })
}

#[derive(Debug, Serialize)]
struct HostsView {
    hosts: BTreeMap<String, String>,
    excluded: Vec<String>,
}

// GET /hosts
async fn hosts(State(app): State<AppState>) -> Json<HostsView> {
    let table = app.orchestrator.hosts();
    Json(HostsView {
        hosts: table.available(),
        excluded: table.excluded(),
    })
}
