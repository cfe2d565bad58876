//! JSON API over a shared [`RefreshController`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::adapters::SourceType;
use crate::controller::{RefreshController, RefreshError, RefreshStatus};
use crate::dataset::{TableSummary, TableSummaryTransformer};
use crate::orchestrator::{HealthMap, SourceError};

pub type Controller = RefreshController<TableSummaryTransformer>;

#[derive(Debug, Deserialize)]
pub struct CohortRequest {
    pub cohort: String,
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub source: SourceType,
}

#[derive(Debug, Serialize)]
pub struct DatasetResponse {
    pub source: SourceType,
    pub dataset: TableSummary,
}

pub struct ApiError(RefreshError);

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match &self.0 {
            RefreshError::Source(SourceError::UnknownAdapter(_)) => {
                (StatusCode::NOT_FOUND, json!({ "error": message }))
            }
            RefreshError::Source(SourceError::Exhausted { cohort, attempts }) => {
                let attempts: Vec<_> = attempts
                    .iter()
                    .map(|a| json!({ "source": a.source, "outcome": a.outcome.to_string() }))
                    .collect();
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": message, "cohort": cohort, "attempts": attempts }),
                )
            }
            RefreshError::Transform(_) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message })),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/dataset", get(selected_dataset))
        .route("/cohorts/:cohort/dataset", get(cohort_dataset))
        .route("/cohort", put(set_cohort))
        .route("/source", put(switch_source))
        .route("/health", get(last_health).post(check_health))
        .route("/status", get(status))
        .with_state(controller)
}

fn respond(controller: &Controller, dataset: Arc<TableSummary>) -> Json<DatasetResponse> {
    Json(DatasetResponse {
        source: controller.current_source(),
        dataset: (*dataset).clone(),
    })
}

async fn selected_dataset(State(controller): State<Arc<Controller>>) -> Result<Json<DatasetResponse>, ApiError> {
    let cohort = controller.selected_cohort();
    let dataset = controller.refresh(&cohort).await?;
    Ok(respond(&controller, dataset))
}

async fn cohort_dataset(
    State(controller): State<Arc<Controller>>,
    Path(cohort): Path<String>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = controller.refresh(&cohort).await?;
    Ok(respond(&controller, dataset))
}

async fn set_cohort(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<CohortRequest>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = controller.set_cohort(&req.cohort).await?;
    Ok(respond(&controller, dataset))
}

async fn switch_source(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<SourceRequest>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = controller.switch_adapter(req.source).await?;
    Ok(respond(&controller, dataset))
}

async fn last_health(State(controller): State<Arc<Controller>>) -> Json<HealthMap> {
    Json(controller.health())
}

async fn check_health(State(controller): State<Arc<Controller>>) -> Json<HealthMap> {
    Json(controller.check_health().await)
}

async fn status(State(controller): State<Arc<Controller>>) -> Json<RefreshStatus> {
    Json(controller.status())
}
