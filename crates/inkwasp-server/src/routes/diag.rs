use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionDiag {
    pub active_sessions: usize,
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn sessions(State(state): State<AppState>) -> Json<SessionDiag> {
    Json(SessionDiag {
        active_sessions: state.sessions.active_count().await,
    })
}
