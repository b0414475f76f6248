//! Request Surface: the axum router exposing `POST /execute`,
//! `GET /status/:id`, `GET /ws`, and `GET /healthz`.
//!
//! The axum/tower-http stack shape follows `adamtc007-ob-poc/web-server`'s
//! Cargo.toml; the WebSocket upgrade handler follows the
//! split-socket/tokio::select! pattern used for full-duplex links
//! elsewhere in this codebase.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::link::ActionLink;
use crate::registry::TaskRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: TaskRegistry,
    pub link: ActionLink,
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub task: String,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub task_id: Uuid,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/status/:id", get(status))
        .route("/ws", get(websocket))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    if request.task.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { error: "task must not be empty".to_string() }),
        )
            .into_response();
    }

    let task_id = state.registry.submit(request.task).await;
    (StatusCode::ACCEPTED, Json(ExecuteResponse { task_id })).into_response()
}

async fn status(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.registry.status(id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: format!("no task with id {id}") }),
        )
            .into_response(),
    }
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        state.link.attach(socket).await;
    })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::limits::EngineLimits;

    fn test_state() -> AppState {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let config = Arc::new(AppConfig {
            openai_api_key: "test-key".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            port: 8080,
            limits: EngineLimits::default(),
            screenshot_policy: crate::config::ScreenshotPolicy::FinalOnly,
        });
        AppState { registry: TaskRegistry::new(link.clone(), config), link }
    }

    #[test]
    fn router_builds_without_panicking() {
        let _router = build_router(test_state());
    }

    #[tokio::test]
    async fn healthz_reports_status_ok_with_a_json_body() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }
}
