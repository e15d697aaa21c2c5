//! In-memory session store for in-progress captures.
//!
//! Holds at most one `CaptureSession` per key. Reads are expiry-aware:
//! a session older than the inactivity timeout is evicted on access and
//! reported as absent. The periodic sweep only bounds memory for keys
//! that are never touched again; lazy eviction is the correctness
//! mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use inkwasp_schema::{FieldValue, LogicalType, RecordId, SessionKey};

/// Inactivity timeout after which a session is treated as absent.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 30 * 60;

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// One in-progress structured-data capture for a (user, conversation) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSession {
    pub key: SessionKey,
    pub logical_type: LogicalType,
    pub fields: HashMap<String, FieldValue>,
    /// When set, the very next text message is consumed as this field's
    /// raw value. At most one field awaits input at a time.
    pub pending_field: Option<String>,
    /// Started from an explicit menu choice rather than inferred from
    /// free text; relaxes the addressing gate and changes the
    /// post-extraction flow.
    pub is_menu_session: bool,
    /// Set on first successful save; all later saves must update this
    /// record instead of creating another.
    pub saved_record_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl CaptureSession {
    fn new(key: SessionKey, logical_type: LogicalType, is_menu_session: bool) -> Self {
        let now = Utc::now();
        Self {
            key,
            logical_type,
            fields: HashMap::new(),
            pending_field: None,
            is_menu_session,
            saved_record_id: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn saved_already(&self) -> bool {
        self.saved_record_id.is_some()
    }

    pub fn is_expired(&self, ttl_seconds: i64) -> bool {
        let elapsed = Utc::now() - self.last_activity;
        elapsed.num_seconds() >= ttl_seconds
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<SessionKey, CaptureSession>>>,
    ttl_seconds: i64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL_SECS)
    }

    /// Timeout override used by tests; production paths use [`Self::new`].
    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl_seconds,
        }
    }

    /// Start a fresh capture at `key`, unconditionally replacing any
    /// existing session there. Callers wanting "convert, don't replace"
    /// use [`Self::convert_to_data_session`].
    pub async fn create(&self, key: &SessionKey, logical_type: LogicalType) -> CaptureSession {
        self.create_inner(key, logical_type, false).await
    }

    /// Like [`Self::create`], for a capture started from an explicit menu
    /// choice.
    pub async fn create_menu(&self, key: &SessionKey, logical_type: LogicalType) -> CaptureSession {
        self.create_inner(key, logical_type, true).await
    }

    async fn create_inner(
        &self,
        key: &SessionKey,
        logical_type: LogicalType,
        is_menu_session: bool,
    ) -> CaptureSession {
        let session = CaptureSession::new(key.clone(), logical_type, is_menu_session);
        let mut sessions = self.sessions.lock().await;
        if sessions.insert(key.clone(), session.clone()).is_some() {
            debug!(%key, %logical_type, "replaced existing session");
        }
        session
    }

    /// Expiry-aware read: evicts and returns `None` for a session past the
    /// timeout, otherwise touches `last_activity` and returns a snapshot.
    pub async fn get(&self, key: &SessionKey) -> Option<CaptureSession> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(key) {
            Some(session) if session.is_expired(self.ttl_seconds) => {
                sessions.remove(key);
                debug!(%key, "evicted expired session on access");
                None
            }
            Some(session) => {
                session.touch();
                Some(session.clone())
            }
            None => None,
        }
    }

    pub async fn set_pending_field(&self, key: &SessionKey, field: &str) {
        self.with_live(key, "set_pending_field", |session| {
            session.pending_field = Some(field.to_string());
        })
        .await;
    }

    /// Sets the field and clears `pending_field` unconditionally, even if
    /// the written field differs from the one that was pending (the user
    /// volunteered a different field than asked).
    pub async fn write_field(&self, key: &SessionKey, field: &str, value: FieldValue) {
        self.with_live(key, "write_field", |session| {
            session.fields.insert(field.to_string(), value);
            session.pending_field = None;
        })
        .await;
    }

    /// Records the persisted id. Does not end the session, so further
    /// edits keep updating the same record.
    pub async fn mark_saved(&self, key: &SessionKey, record_id: RecordId) {
        self.with_live(key, "mark_saved", |session| {
            session.saved_record_id = Some(record_id);
        })
        .await;
    }

    /// Switch a menu session into a normal capture of `logical_type`,
    /// preserving everything already gathered.
    pub async fn convert_to_data_session(&self, key: &SessionKey, logical_type: LogicalType) {
        self.with_live(key, "convert_to_data_session", |session| {
            session.is_menu_session = false;
            session.logical_type = logical_type;
        })
        .await;
    }

    /// Reclassify an active capture in place. Never discards fields.
    pub async fn set_logical_type(&self, key: &SessionKey, logical_type: LogicalType) {
        self.with_live(key, "set_logical_type", |session| {
            session.logical_type = logical_type;
        })
        .await;
    }

    /// Remove and return the session; used for both completion and
    /// cancellation.
    pub async fn end(&self, key: &SessionKey) -> Option<CaptureSession> {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(key);
        match &removed {
            Some(session) if session.is_expired(self.ttl_seconds) => {
                debug!(%key, "ended session was already expired");
                return None;
            }
            Some(_) => {}
            None => debug!(%key, "end on missing session"),
        }
        removed
    }

    pub async fn has_active(&self, key: &SessionKey) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn is_awaiting_input(&self, key: &SessionKey) -> bool {
        self.get(key)
            .await
            .map(|session| session.pending_field.is_some())
            .unwrap_or(false)
    }

    pub async fn is_menu_session(&self, key: &SessionKey) -> bool {
        self.get(key)
            .await
            .map(|session| session.is_menu_session)
            .unwrap_or(false)
    }

    /// Diagnostic: live (non-expired) session count.
    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|session| !session.is_expired(self.ttl_seconds))
            .count()
    }

    /// Evict every session past the timeout. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl_seconds));
        before - sessions.len()
    }

    /// Apply `apply` to the live session at `key`. Missing or expired
    /// sessions make this a logged no-op: the chat channel has no way to
    /// recover from an error mid-flow, so stale operations degrade
    /// silently.
    async fn with_live<F>(&self, key: &SessionKey, op: &'static str, apply: F)
    where
        F: FnOnce(&mut CaptureSession),
    {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(key) {
            Some(session) if session.is_expired(self.ttl_seconds) => {
                sessions.remove(key);
                warn!(%key, op, "dropping operation on expired session");
            }
            Some(session) => {
                apply(session);
                session.touch();
            }
            None => warn!(%key, op, "dropping operation on missing session"),
        }
    }
}

/// Run [`SessionStore::sweep`] on a fixed interval as an explicitly owned
/// background task. Not required for correctness.
pub fn spawn_sweep_task(
    store: Arc<SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.sweep().await;
            if evicted > 0 {
                tracing::info!(evicted, "session sweep evicted expired sessions");
            }
        }
    })
}
