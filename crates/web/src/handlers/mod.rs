use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

mod analyses;
mod auth;
mod dashboard;
mod predict;
mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/github/webhook", post(webhook::webhook))
        .route("/api/github/oauth", get(ci_insight_auth::oauth))
        .route("/api/repos/{repo_id}/analyses", get(analyses::list_analyses))
        .route("/api/predict", post(predict::predict))
        .route("/login", get(auth::login))
        .route("/logout", post(auth::logout))
        .route("/", get(dashboard::index))
        .route("/repos/{repo_id}", get(dashboard::repo))
}

async fn health() -> &'static str { "OK" }
