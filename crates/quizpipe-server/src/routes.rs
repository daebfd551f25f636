//! The HTTP surface: `POST /api/solve` and `GET /health`.
//!
//! Accepted runs are fire-and-forget: the handler answers as soon as the
//! request is validated and admitted to the pool; the solver's terminal
//! result goes to the log, not the response.

use crate::config::Config;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use quizpipe_core::Task;
use quizpipe_local::pipeline::Solver;
use quizpipe_local::render::PlaywrightRenderer;
use quizpipe_local::LocalFetcher;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    solver: Arc<Solver>,
    /// Bounded run pool; a request that cannot take a permit is rejected,
    /// never queued.
    pool: Arc<Semaphore>,
}

pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let fetcher = Arc::new(LocalFetcher::new()?);
    let solver = Solver::new(fetcher, Arc::new(PlaywrightRenderer), config.solver.clone())?;
    let pool = Arc::new(Semaphore::new(config.max_runs));
    Ok(AppState {
        config: Arc::new(config),
        solver: Arc::new(solver),
        pool,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/solve", post(solve))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct SolveRequest {
    email: Option<String>,
    secret: Option<String>,
    url: Option<String>,
}

fn bad_request(msg: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg })),
    )
}

async fn solve(
    State(state): State<AppState>,
    Json(req): Json<SolveRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let (Some(email), Some(secret), Some(url)) = (req.email, req.secret, req.url) else {
        return bad_request("email, secret and url are required");
    };
    let (email, secret, url) = (
        email.trim().to_string(),
        secret.trim().to_string(),
        url.trim().to_string(),
    );
    if email.is_empty() || secret.is_empty() || url.is_empty() {
        return bad_request("email, secret and url must be non-empty");
    }
    match url::Url::parse(&url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        _ => return bad_request("url must be http(s)"),
    }

    if !state.config.secret_matches(&email, &secret) {
        tracing::warn!(email = %email, "rejected request with bad credentials");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "forbidden" })),
        );
    }

    let Ok(permit) = state.pool.clone().try_acquire_owned() else {
        tracing::warn!(email = %email, "run pool saturated, rejecting");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "busy" })),
        );
    };

    let solver = state.solver.clone();
    let task = Task { email, secret, url };
    tokio::spawn(async move {
        let result = solver.run(&task).await;
        let rendered = serde_json::to_string(&result).unwrap_or_default();
        tracing::info!(email = %task.email, status = ?result.status, result = %rendered, "run finished");
        drop(permit);
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}
