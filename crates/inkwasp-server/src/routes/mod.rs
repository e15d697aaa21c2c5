pub mod diag;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(webhook::receive))
        .route("/healthz", get(diag::healthz))
        .route("/api/sessions", get(diag::sessions))
}
