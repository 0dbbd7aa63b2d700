//! HTTP route definitions

use axum::{
    extract::{Extension, Query, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::game::{Difficulty, EngineError};
use crate::http::middleware::{require_identity, AuthenticatedUser, USER_ID_HEADER};
use crate::matchmaking::{MatchDescriptor, MatchmakingError, QueuePage, QueueStatus, ResultReport};
use crate::store::GameRow;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (identity carried in the query for sockets)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Routes that need a forwarded identity
    let protected_routes = Router::new()
        .route(
            "/matchmaking/queue",
            post(enter_queue_handler)
                .delete(cancel_queue_handler)
                .get(list_queue_handler),
        )
        .route("/matchmaking/queue/status", get(queue_status_handler))
        .route("/matchmaking/single-player", post(single_player_handler))
        .route("/matchmaking/match", get(current_match_handler))
        .route("/matchmaking/result", post(result_handler))
        .layer(middleware::from_fn(require_identity));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured origins; `*` allows any origin without credentials
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    attached_clients: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        attached_clients: state.match_registry.total_clients(),
        queue_size: state.matchmaking.queue_size(),
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

async fn enter_queue_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<QueueStatus>, AppError> {
    Ok(Json(state.matchmaking.enter_queue(auth.user_id)?))
}

#[derive(Serialize)]
struct CancelResponse {
    status: &'static str,
}

async fn cancel_queue_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CancelResponse>, AppError> {
    state.matchmaking.cancel_queue(auth.user_id)?;
    Ok(Json(CancelResponse { status: "cancelled" }))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_queue_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<QueuePage>, AppError> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.matchmaking.list_queue(page, page_size)?))
}

async fn queue_status_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<QueueStatus>, AppError> {
    Ok(Json(state.matchmaking.queue_status(auth.user_id)?))
}

#[derive(Deserialize)]
struct SinglePlayerRequest {
    difficulty: Difficulty,
}

async fn single_player_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<SinglePlayerRequest>,
) -> Result<(StatusCode, Json<MatchDescriptor>), AppError> {
    let descriptor = state.matchmaking.single_player(auth.user_id, req.difficulty)?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn current_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MatchDescriptor>, AppError> {
    Ok(Json(state.matchmaking.current_match(auth.user_id)?))
}

async fn result_handler(
    State(state): State<AppState>,
    Json(report): Json<ResultReport>,
) -> Result<Json<GameRow>, AppError> {
    Ok(Json(state.matchmaking.report_result(report)?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<MatchmakingError> for AppError {
    fn from(e: MatchmakingError) -> Self {
        match e {
            MatchmakingError::Validation(msg) => AppError::BadRequest(msg),
            MatchmakingError::NotFound(msg) => AppError::NotFound(msg),
            MatchmakingError::Conflict(msg) => AppError::Conflict(msg),
            MatchmakingError::Persistence(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => AppError::BadRequest(msg),
            EngineError::Capacity | EngineError::InvalidState { .. } => AppError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
