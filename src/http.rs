//! Loopback HTTP surface.
//!
//! Enriched from `other_examples/7blacky7-speakeasy`'s `axum` +
//! `tower-http` stack — no teacher-family repo exposes HTTP, so this is
//! the closest pack analog for a JSON request/response API with CORS and
//! trace layers. `Arc<ServiceCoordinator>` is threaded through as
//! `axum::extract::State`, replacing the original's module-level
//! `_service` global with explicit dependency injection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::coordinator::ServiceCoordinator;
use crate::queue::Priority;

const DEFAULT_SAMPLE_RATE: u32 = 24_000;
const DEFAULT_WAIT_TIMEOUT_SECS: f64 = 30.0;

/// `axum::Json` wrapper that turns a malformed body into the fixed
/// `{error}` shape (spec.md §6: "Malformed JSON yields HTTP 400") instead
/// of axum's default plaintext rejection body.
struct AppJson<T>(T);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                warn!("Rejected malformed request body: {rejection}");
                Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: rejection.to_string(),
                    }),
                )
                    .into_response())
            }
        }
    }
}

pub fn build_router(coordinator: Arc<ServiceCoordinator>, started_at: Instant) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/reserve", post(reserve))
        .route("/fill/{item_id}", post(fill))
        .route("/wait/{item_id}", post(wait))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/clear", post(clear))
        .route("/stop", post(stop))
        .route("/chime-allowed", post(chime_allowed))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            coordinator,
            started_at,
        })
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<ServiceCoordinator>,
    started_at: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: f64,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    playing: bool,
    paused: bool,
    current_project: Option<String>,
    queue_length: usize,
    pending_reservations: usize,
    total_enqueued: u64,
    total_played: u64,
    estimated_wait_ms: u64,
    dictation_active: bool,
    hotkey: &'static str,
    hotkey_pressed: bool,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let queue_status = coordinator.queue_status();
    Json(StatusResponse {
        playing: coordinator.is_playing(),
        paused: coordinator.is_paused(),
        current_project: coordinator.current_project(),
        queue_length: queue_status.queue_length,
        pending_reservations: queue_status.pending_reservations,
        total_enqueued: queue_status.total_enqueued,
        total_played: queue_status.total_played,
        estimated_wait_ms: queue_status.estimated_wait_ms,
        dictation_active: coordinator.hotkey_pressed(),
        hotkey: coordinator.hotkey_name(),
        hotkey_pressed: coordinator.hotkey_pressed(),
    })
}

#[derive(Deserialize)]
struct ReserveRequest {
    project: String,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Serialize)]
struct ReserveResponse {
    reserved: bool,
    item_id: String,
    position: usize,
    should_announce: bool,
}

async fn reserve(
    State(state): State<AppState>,
    AppJson(req): AppJson<ReserveRequest>,
) -> impl IntoResponse {
    let priority = req
        .priority
        .as_deref()
        .map(Priority::parse)
        .unwrap_or(Priority::Normal);
    let reservation = state.coordinator.reserve(&req.project, priority);
    Json(ReserveResponse {
        reserved: true,
        item_id: reservation.item_id,
        position: reservation.position,
        should_announce: reservation.should_announce,
    })
}

#[derive(Deserialize)]
struct FillRequest {
    audio_data: String,
    #[serde(default)]
    sample_rate: Option<u32>,
}

#[derive(Serialize)]
struct FillResponse {
    filled: bool,
    item_id: Option<String>,
    error: Option<String>,
}

async fn fill(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    AppJson(req): AppJson<FillRequest>,
) -> impl IntoResponse {
    let pcm = match base64::engine::general_purpose::STANDARD.decode(&req.audio_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(FillResponse {
                    filled: false,
                    item_id: None,
                    error: Some(format!("invalid base64 audio_data: {e}")),
                }),
            );
        }
    };

    let sample_rate = req.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    match state.coordinator.fill(&item_id, pcm.into(), sample_rate) {
        Ok(()) => (
            StatusCode::OK,
            Json(FillResponse {
                filled: true,
                item_id: Some(item_id),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::OK,
            Json(FillResponse {
                filled: false,
                item_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Deserialize)]
struct WaitQuery {
    timeout: Option<f64>,
}

#[derive(Serialize)]
struct WaitResponse {
    completed: bool,
    item_id: String,
    error: Option<String>,
}

async fn wait(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> impl IntoResponse {
    let timeout_secs = query.timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS).max(0.0);
    let completed = state
        .coordinator
        .wait(&item_id, Duration::from_secs_f64(timeout_secs))
        .await;

    Json(WaitResponse {
        completed,
        item_id,
        error: if completed {
            None
        } else {
            Some("timeout".to_string())
        },
    })
}

#[derive(Serialize)]
struct PausedResponse {
    paused: bool,
}

async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.pause();
    Json(PausedResponse { paused: true })
}

async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.resume();
    Json(PausedResponse { paused: false })
}

#[derive(Deserialize, Default)]
struct ClearRequest {
    #[serde(default)]
    project: Option<String>,
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

async fn clear(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> impl IntoResponse {
    let project = body.and_then(|Json(req)| req.project);
    let cleared = state.coordinator.clear(project.as_deref());
    Json(ClearResponse { cleared })
}

#[derive(Serialize)]
struct StopResponse {
    stopped: bool,
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.coordinator.stop();
    Json(StopResponse { stopped })
}

#[derive(Serialize)]
struct ChimeAllowedResponse {
    allowed: bool,
    seconds_remaining: f64,
}

async fn chime_allowed(State(state): State<AppState>) -> impl IntoResponse {
    let check = state.coordinator.chime_allowed();
    Json(ChimeAllowedResponse {
        allowed: check.allowed,
        seconds_remaining: check.seconds_remaining,
    })
}
