//! HTTP surface of a crawl server
//!
//! Exposes the task queue, the running set, completed results and the
//! buffered file lists to the dispatcher. Every route requires the shared
//! bearer token from the `[server]` config section.

use crate::runner::store::{StoreError, TaskStore};
use crate::task::Task;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::io::ReaderStream;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<TaskStore>>,
    pub running: Arc<RwLock<HashMap<i64, Task>>>,
    pub buffer_dir: PathBuf,
    pub api_token: String,
}

/// Builds the crawl-server router with token auth on every route
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/task/put", post(put_task))
        .route("/task/", get(get_queued))
        .route("/task/current", get(get_current))
        .route("/task/completed", get(pop_completed))
        .route("/task/pop_all", get(pop_all))
        .route("/file_list/:website_id/", get(fetch_file_list))
        .route("/file_list/:website_id/free", get(free_file_list))
        .layer(middleware::from_fn_with_state(state.clone(), check_token))
        .with_state(state)
}

/// Binds the listener and serves the router until the process exits
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("crawl server listening on {}", addr);
    axum::serve(listener, build_router(state)).await
}

async fn check_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == state.api_token)
        .unwrap_or(false);

    if authorized {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[derive(Debug, Deserialize)]
struct PutTaskRequest {
    website_id: i64,
    url: String,
    priority: i64,
    callback_type: Option<String>,
    callback_args: Option<String>,
    upload_token: Option<String>,
}

impl From<PutTaskRequest> for Task {
    fn from(req: PutTaskRequest) -> Self {
        Task {
            website_id: req.website_id,
            url: req.url,
            priority: req.priority,
            callback_type: req.callback_type,
            callback_args: req.callback_args,
            upload_token: req.upload_token,
        }
    }
}

async fn put_task(
    State(state): State<AppState>,
    payload: Result<Json<PutTaskRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let task = Task::from(request);
    match state.store.lock().unwrap().put_task(&task) {
        Ok(()) => {
            tracing::info!("queued task {} ({})", task.website_id, task.url);
            StatusCode::OK.into_response()
        }
        Err(StoreError::Duplicate { website_id }) => (
            StatusCode::BAD_REQUEST,
            format!("website {} is already queued", website_id),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to queue task {}: {}", task.website_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_queued(State(state): State<AppState>) -> Response {
    match state.store.lock().unwrap().get_tasks() {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => {
            tracing::error!("failed to read task queue: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_current(State(state): State<AppState>) -> Response {
    let tasks: Vec<Task> = state.running.read().unwrap().values().cloned().collect();
    Json(tasks).into_response()
}

async fn pop_completed(State(state): State<AppState>) -> Response {
    match state.store.lock().unwrap().pop_completed_results() {
        Ok(results) => Json(results).into_response(),
        Err(e) => {
            tracing::error!("failed to pop completed results: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn pop_all(State(state): State<AppState>) -> Response {
    match state.store.lock().unwrap().pop_all_tasks() {
        Ok(tasks) => {
            if !tasks.is_empty() {
                tracing::info!("handed over {} queued tasks", tasks.len());
            }
            Json(tasks).into_response()
        }
        Err(e) => {
            tracing::error!("failed to drain task queue: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn fetch_file_list(
    State(state): State<AppState>,
    UrlPath(website_id): UrlPath<i64>,
) -> Response {
    let path = super::job::buffer_file(&state.buffer_dir, website_id);
    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            (
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                Body::from_stream(stream),
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("failed to open file list for website {}: {}", website_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn free_file_list(
    State(state): State<AppState>,
    UrlPath(website_id): UrlPath<i64>,
) -> Response {
    let path = super::job::buffer_file(&state.buffer_dir, website_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            tracing::debug!("freed file list for website {}", website_id);
            StatusCode::OK.into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("failed to free file list for website {}: {}", website_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
