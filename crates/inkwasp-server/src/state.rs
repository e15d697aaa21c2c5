use std::sync::Arc;

use inkwasp_gateway::Gateway;
use inkwasp_store::SessionStore;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionStore>,
    /// Shared secret expected in `x-webhook-token`; `None` disables the
    /// check (local development).
    pub webhook_token: Option<String>,
}
