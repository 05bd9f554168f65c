//! HTTP server implementation using Axum.

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use execution_core::{ExecutionError, ExecutionRequest, Language};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const AUTH_HEADER: &str = "Internal-Auth-Token";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct ExecuteRequestBody {
    #[serde(default)]
    execution_id: Option<String>,
    user_id: String,
    language: String,
    code: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    session_id: Option<String>,
    /// `[path, content]` pairs, in staging order. A JSON object would leave
    /// key order unspecified across clients; an ordered array makes the
    /// file-staging invariant (§4.5) hold without relying on map ordering.
    #[serde(default)]
    files: Vec<(String, String)>,
}

#[derive(Serialize)]
struct ExecuteResponseBody {
    output: String,
    error: Option<String>,
    exit_code: i32,
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateSessionRequestBody {
    language: String,
    user_id: String,
}

#[derive(Serialize)]
struct CreateSessionResponseBody {
    session_id: String,
    language: String,
    message: String,
}

#[derive(Serialize)]
struct DeleteSessionResponseBody {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the application router. Split out from [`run_server`] so tests can
/// drive it directly with [`tower::ServiceExt::oneshot`] instead of binding
/// a real socket.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id", delete(end_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the internal HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting internal execution service");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind internal HTTP port");
    axum::serve(listener, app).await.expect("axum server exited");
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if provided == state.engine.config.internal_auth_token {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                error: "invalid or missing Internal-Auth-Token".to_string(),
            }),
        ))
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExecuteRequestBody>,
) -> Result<Json<ExecuteResponseBody>, (StatusCode, Json<ErrorBody>)> {
    check_auth(&state, &headers)?;

    let execution_id = body.execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let req = ExecutionRequest {
        execution_id: execution_id.clone(),
        user_id: body.user_id,
        language: body.language,
        code: body.code,
        timeout_seconds: body.timeout_seconds.unwrap_or_else(|| state.engine.config.default_timeout.as_secs()),
        session_id: body.session_id,
        files: body.files,
    };

    let started = std::time::Instant::now();
    let result = state.engine.coordinator.execute(req).await;
    info!(
        %execution_id,
        duration_ms = started.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "execution completed"
    );

    match result {
        Ok(resp) => Ok(Json(ExecuteResponseBody {
            output: resp.output,
            error: resp.error,
            exit_code: resp.exit_code,
            session_id: resp.session_id,
        })),
        Err(e) => Err(map_execution_error(e)),
    }
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequestBody>,
) -> Result<Json<CreateSessionResponseBody>, (StatusCode, Json<ErrorBody>)> {
    check_auth(&state, &headers)?;

    let language = Language::canonicalize(&body.language, &state.engine.config.supported_languages)
        .map_err(map_execution_error)?;

    match state.engine.sessions.create(body.user_id, language).await {
        Ok(session_id) => {
            info!(session_id = %session_id, %language, "session created");
            Ok(Json(CreateSessionResponseBody {
                session_id,
                language: language.canonical_name().to_string(),
                message: "session created".to_string(),
            }))
        }
        Err(e) => Err(map_execution_error(e)),
    }
}

async fn end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponseBody>, (StatusCode, Json<ErrorBody>)> {
    check_auth(&state, &headers)?;

    match state.engine.sessions.end(&session_id).await {
        Ok(()) => Ok(Json(DeleteSessionResponseBody {
            success: true,
            message: "session ended".to_string(),
        })),
        Err(e) => {
            warn!(%session_id, %e, "end_session failed");
            Err(map_execution_error(e))
        }
    }
}

fn map_execution_error(e: ExecutionError) -> (StatusCode, Json<ErrorBody>) {
    let status = match e {
        ExecutionError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
        ExecutionError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
        ExecutionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
    };
    (status, Json(ErrorBody { error: e.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use execution_core::{Config, Engine, Language};
    use sandbox_provider::mock::MockSandboxProvider;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(token: &str) -> AppState {
        let config = Config {
            internal_auth_token: token.to_string(),
            initial_pool_size: 2,
            max_pool_size: 5,
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
            supported_languages: Language::ALL.to_vec(),
        };
        let engine = Arc::new(Engine::new(Arc::new(MockSandboxProvider::new()), config));
        AppState::new(engine)
    }

    #[tokio::test]
    async fn health_requires_no_auth_header() {
        let app = create_router(test_state("secret-token-a"));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_without_the_auth_header_is_forbidden() {
        let app = create_router(test_state("secret-token-b"));
        let body = serde_json::json!({"user_id": "u1", "language": "python", "code": "print(1)"});
        let req = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn execute_with_the_correct_auth_header_succeeds() {
        let app = create_router(test_state("secret-token-c"));
        let body = serde_json::json!({"user_id": "u1", "language": "python", "code": "print(1+1)"});
        let req = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .header(AUTH_HEADER, "secret-token-c")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deleting_an_unknown_session_is_not_found() {
        let app = create_router(test_state("secret-token-d"));
        let req = Request::builder()
            .method("DELETE")
            .uri("/sessions/does-not-exist")
            .header(AUTH_HEADER, "secret-token-d")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
