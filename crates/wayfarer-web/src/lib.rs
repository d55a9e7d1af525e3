//! Axum JSON API over the Wayfarer dashboard.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use wayfarer_core::{Destination, DEFAULT_MOOD, MOOD_CATEGORIES};
use wayfarer_recommend::{
    dashboard_from_config, AppConfig, Dashboard, DashboardSnapshot, EnvValidation,
};
use wayfarer_storage::{ManualRetryGate, RetryBlocked};

pub const CRATE_NAME: &str = "wayfarer-web";

pub struct AppState {
    pub dashboard: Dashboard,
    pub env_status: EnvValidation,
    retry_gate: Mutex<ManualRetryGate>,
}

impl AppState {
    pub fn new(dashboard: Dashboard, env_status: EnvValidation) -> Self {
        Self {
            dashboard,
            env_status,
            retry_gate: Mutex::new(ManualRetryGate::default()),
        }
    }

    async fn record_outcome(&self, snapshot: &DashboardSnapshot) {
        let mut gate = self.retry_gate.lock().await;
        if snapshot.error.is_some() {
            gate.record_failure(Instant::now());
        } else {
            gate.record_success();
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct MoodQuery {
    mood: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageQuery {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WeatherQuery {
    city: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageLookup {
    name: String,
    image_url: String,
}

#[derive(Debug, Serialize)]
struct FavoriteToggle {
    favorite: bool,
    favorites: Vec<Destination>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/moods", get(moods_handler))
        .route("/api/destinations", get(destinations_handler))
        .route("/api/moods/{mood}/select", post(select_mood_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/retry", post(retry_handler))
        .route("/api/error", delete(clear_error_handler))
        .route("/api/favorites", get(favorites_handler))
        .route("/api/favorites/toggle", post(toggle_favorite_handler))
        .route("/api/images", get(image_handler))
        .route("/api/weather", get(weather_handler))
        .route("/api/config/status", get(config_status_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    serve(config).await
}

pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let env_status = config.env_status.clone();
    if !env_status.is_valid {
        info!(missing = ?env_status.missing_keys, "running with degraded services");
    }
    let dashboard = dashboard_from_config(&config).await?;
    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, "wayfarer web listening");
    axum::serve(listener, app(AppState::new(dashboard, env_status))).await?;
    Ok(())
}

async fn moods_handler() -> Response {
    Json(MOOD_CATEGORIES).into_response()
}

async fn destinations_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MoodQuery>,
) -> Response {
    let mood = non_blank(query.mood).unwrap_or_else(|| DEFAULT_MOOD.to_string());
    let destinations = state.dashboard.services().recommend(&mood, true).await;
    Json(destinations).into_response()
}

async fn select_mood_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(mood): AxumPath<String>,
) -> Response {
    select_in_background(state, mood).await
}

/// Runs the selection and records its gate outcome in a spawned task, so a
/// disconnected client cannot leave the gate pending.
async fn select_in_background(state: Arc<AppState>, mood: String) -> Response {
    let task = tokio::spawn(async move {
        let snapshot = state.dashboard.select_mood(&mood).await;
        state.record_outcome(&snapshot).await;
        snapshot
    });
    match task.await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            error!(error = %err, "mood selection task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "mood selection failed" })),
            )
                .into_response()
        }
    }
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.dashboard.snapshot().await).into_response()
}

async fn retry_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(mood) = state.dashboard.selected_mood().await else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "no mood selected" })),
        )
            .into_response();
    };

    if let Err(blocked) = state.retry_gate.lock().await.begin(Instant::now()) {
        debug!(%blocked, "manual retry rejected");
        return retry_blocked(blocked);
    }

    select_in_background(state, mood).await
}

async fn clear_error_handler(State(state): State<Arc<AppState>>) -> Response {
    state.dashboard.clear_error().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn favorites_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.dashboard.favorites().await).into_response()
}

async fn toggle_favorite_handler(
    State(state): State<Arc<AppState>>,
    Json(destination): Json<Destination>,
) -> Response {
    let favorite = state.dashboard.toggle_favorite(destination).await;
    let favorites = state.dashboard.favorites().await;
    Json(FavoriteToggle {
        favorite,
        favorites,
    })
    .into_response()
}

async fn image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> Response {
    let Some(name) = non_blank(query.name) else {
        return bad_request("name is required");
    };
    let image_url = state.dashboard.services().images.resolve(&name).await;
    Json(ImageLookup { name, image_url }).into_response()
}

async fn weather_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> Response {
    let Some(city) = non_blank(query.city) else {
        return bad_request("city is required");
    };
    Json(state.dashboard.services().weather.resolve(&city).await).into_response()
}

async fn config_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.env_status.clone()).into_response()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn retry_blocked(blocked: RetryBlocked) -> Response {
    let retry_after_ms = match blocked {
        RetryBlocked::Pending => 0,
        RetryBlocked::Backoff { remaining } => remaining.as_millis() as u64,
    };
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": blocked.to_string(),
            "retry_after_ms": retry_after_ms,
        })),
    )
        .into_response()
}
