use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const DEFAULT_CLIENT_KEY: &str = "proxy-client-key";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impression_data: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TogglesBody {
    pub toggles: Vec<Toggle>,
}

#[derive(Debug, Deserialize)]
pub struct Failure {
    pub status: u16,
}

#[derive(Debug)]
pub struct ProxyState {
    pub client_key: String,
    pub toggles: Vec<Toggle>,
    pub etag: String,
    pub forced_status: Option<StatusCode>,
    pub last_query: Option<String>,
}

impl ProxyState {
    pub fn new(client_key: &str, toggles: Vec<Toggle>) -> Self {
        Self {
            client_key: client_key.to_string(),
            toggles,
            etag: fresh_etag(),
            forced_status: None,
            last_query: None,
        }
    }
}

pub type Db = Arc<RwLock<ProxyState>>;

fn fresh_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

pub fn app() -> Router {
    app_with(ProxyState::new(DEFAULT_CLIENT_KEY, Vec::new()))
}

pub fn app_with(state: ProxyState) -> Router {
    let db: Db = Arc::new(RwLock::new(state));
    Router::new()
        .route("/proxy", get(get_toggles))
        .route("/admin/toggles", put(replace_toggles))
        .route("/admin/failure", put(inject_failure).delete(clear_failure))
        .route("/admin/last-query", get(last_query))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, state: ProxyState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(state)).await
}

async fn get_toggles(State(db): State<Db>, RawQuery(query): RawQuery, headers: HeaderMap) -> Response {
    let mut state = db.write().await;
    state.last_query = query;

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| key == state.client_key);
    if !authorized {
        tracing::debug!("rejected request without a valid client key");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if let Some(status) = state.forced_status {
        tracing::debug!(%status, "answering with injected failure");
        return (status, "injected failure").into_response();
    }

    let etag = HeaderValue::from_str(&state.etag).unwrap_or_else(|_| HeaderValue::from_static("\"\""));
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .is_some_and(|v| v.as_bytes() == state.etag.as_bytes());
    if not_modified {
        tracing::debug!(etag = %state.etag, "not modified");
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
    }

    tracing::debug!(count = state.toggles.len(), "serving toggles");
    let body = TogglesBody {
        toggles: state.toggles.clone(),
    };
    (StatusCode::OK, [(header::ETAG, etag)], Json(body)).into_response()
}

async fn replace_toggles(State(db): State<Db>, Json(input): Json<TogglesBody>) -> StatusCode {
    let mut state = db.write().await;
    state.toggles = input.toggles;
    state.etag = fresh_etag();
    StatusCode::NO_CONTENT
}

async fn inject_failure(State(db): State<Db>, Json(input): Json<Failure>) -> StatusCode {
    match StatusCode::from_u16(input.status) {
        Ok(status) => {
            db.write().await.forced_status = Some(status);
            StatusCode::NO_CONTENT
        }
        Err(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

async fn clear_failure(State(db): State<Db>) -> StatusCode {
    db.write().await.forced_status = None;
    StatusCode::NO_CONTENT
}

async fn last_query(State(db): State<Db>) -> Result<String, StatusCode> {
    db.read().await.last_query.clone().ok_or(StatusCode::NOT_FOUND)
}
