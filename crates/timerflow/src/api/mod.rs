use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, NOT_JSON};
use crate::api::models::TimerResponse;
use crate::metrics::{MetricsRepo, MetricsSnapshot};
use crate::service::TimerService;

pub mod error;
pub mod models;
pub mod validation;

#[derive(Clone)]
pub struct ApiState {
    pub timers: TimerService,
    /// Only wired when running against Postgres.
    pub metrics: Option<MetricsRepo>,
}

pub fn router(state: ApiState) -> Router {
    let mut router = Router::new()
        .route("/timer", post(create_timer))
        .route("/timer/", post(create_timer))
        .route("/timer/:id", get(get_timer))
        .route("/health", get(health));

    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

pub async fn create_timer(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<TimerResponse>), ApiError> {
    if !is_json(&headers) {
        return Err(ApiError::BadRequest(NOT_JSON));
    }

    let req = validation::parse_timer_request(&body).map_err(ApiError::Validation)?;
    let view = state.timers.create_timer(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(TimerResponse {
            id: view.id,
            time_left: view.time_left,
        }),
    ))
}

pub async fn get_timer(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TimerResponse>, ApiError> {
    let view = state.timers.time_left(&id).await?;
    Ok(Json(TimerResponse {
        id: view.id,
        time_left: view.time_left,
    }))
}

pub async fn metrics(State(state): State<ApiState>) -> Result<Json<MetricsSnapshot>, ApiError> {
    let Some(repo) = state.metrics.as_ref() else {
        return Err(ApiError::NotFound);
    };
    repo.snapshot().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "metrics snapshot failed");
        ApiError::Internal
    })
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
