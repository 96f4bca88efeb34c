use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ScrapeError;
use crate::pipeline::{Pipeline, RunRequest};
use crate::report::{summarize, Report};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    token: Arc<String>,
    // Every run clears the shared cache, so runs take turns.
    run_lock: Arc<Mutex<()>>,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        let status = match &e {
            ScrapeError::Proxy { .. } => StatusCode::BAD_REQUEST,
            ScrapeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

pub fn router(pipeline: Arc<Pipeline>, token: String) -> Router {
    let state = AppState {
        pipeline,
        token: Arc::new(token),
        run_lock: Arc::new(Mutex::new(())),
    };
    Router::new()
        .route("/scrape", get(scrape_catalog))
        .with_state(state)
}

pub async fn serve(pipeline: Arc<Pipeline>, token: String, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting the API service at: http://{}", listener.local_addr()?);
    axum::serve(listener, router(pipeline, token)).await?;
    Ok(())
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == token)
}

/// `pages` is parsed here, after the token check, so a malformed value is a
/// validation error and not an extractor rejection.
fn run_request(mut params: HashMap<String, String>) -> Result<RunRequest, ScrapeError> {
    let pages = params
        .remove("pages")
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|_| {
                ScrapeError::Validation(format!("page depth must be an integer, got {raw:?}"))
            })
        })
        .transpose()?;
    Ok(RunRequest {
        pages,
        proxy: params.remove("proxy"),
    })
}

async fn scrape_catalog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Report>, ApiError> {
    if !authorized(&headers, &state.token) {
        warn!("Rejected /scrape call with a missing or wrong token");
        return Err(ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".into(),
        });
    }

    let req = run_request(params)?;
    let _turn = state.run_lock.lock().await;
    let session = state.pipeline.run(req).await?;
    Ok(Json(summarize(&session)))
}
