//! The capture session state machine.
//!
//! Every inbound event that passed the router's gate lands here. The
//! engine decides the next transition, mutates the session store, calls
//! the extraction/persistence adapters, and always hands back a [`Reply`]
//! for the renderer: nothing escapes as an error to the webhook boundary,
//! because the chat channel has no recovery UX beyond another message.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use inkwasp_extract::FieldExtractor;
use inkwasp_persist::RecordStore;
use inkwasp_schema::{FieldValue, LogicalType, PostbackAction, Reply, SessionKey};
use inkwasp_store::SessionStore;

use crate::prompt;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("extraction failed: {0}")]
    Extraction(#[source] anyhow::Error),
    #[error("no active session for {0}")]
    NoActiveSession(SessionKey),
    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl EngineError {
    /// The user-facing rendering of each failure. Stale and missing
    /// sessions read the same to the user.
    pub fn to_reply(&self) -> Reply {
        match self {
            EngineError::Extraction(_) => {
                Reply::ack("I couldn't make sense of that. Please try rephrasing.")
            }
            EngineError::NoActiveSession(_) => {
                Reply::ack("Session not found. Please start over.")
            }
            EngineError::Persistence(_) => Reply::ack("Saving failed. Please try again."),
        }
    }
}

pub struct CaptureEngine {
    sessions: Arc<SessionStore>,
    extractor: Arc<dyn FieldExtractor>,
    records: Arc<dyn RecordStore>,
}

impl CaptureEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        extractor: Arc<dyn FieldExtractor>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            sessions,
            extractor,
            records,
        }
    }

    /// A text message that passed the gate. Precedence: a pending field
    /// consumes the text verbatim (even text that looks like a command),
    /// then a menu session merges extracted fields, then everything else
    /// starts a fresh capture (replacing any live one).
    pub async fn handle_message(&self, key: &SessionKey, text: &str) -> Reply {
        if let Some(session) = self.sessions.get(key).await {
            if let Some(field) = session.pending_field.clone() {
                return self.fill_pending_field(key, &field, text).await;
            }
            if session.is_menu_session {
                return self.merge_into_menu_session(key, text).await;
            }
        }
        self.start_capture(key, text).await
    }

    pub async fn handle_postback(
        &self,
        key: &SessionKey,
        actor_id: &str,
        action: PostbackAction,
    ) -> Reply {
        match action {
            PostbackAction::SavePartial { .. } => self
                .save(key, actor_id)
                .await
                .unwrap_or_else(|err| self.degrade(key, err)),
            PostbackAction::ModifyField { field, .. } => {
                if self.sessions.get(key).await.is_none() {
                    return self.degrade(key, EngineError::NoActiveSession(key.clone()));
                }
                self.sessions.set_pending_field(key, &field).await;
                prompt::collect_field_reply(&field)
            }
            PostbackAction::SelectAssignee { user_id, .. } => {
                if self.sessions.get(key).await.is_none() {
                    return self.degrade(key, EngineError::NoActiveSession(key.clone()));
                }
                self.sessions
                    .write_field(key, "assignee", FieldValue::text(user_id.clone()))
                    .await;
                match self.sessions.get(key).await {
                    Some(session) => prompt::field_written_reply(&session, "assignee", &user_id),
                    None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
                }
            }
            PostbackAction::ChangeType { .. } => {
                if self.sessions.get(key).await.is_none() {
                    return self.degrade(key, EngineError::NoActiveSession(key.clone()));
                }
                prompt::type_chooser_reply(
                    "Change the record type",
                    "Already-entered details are kept.",
                )
            }
            PostbackAction::SelectType { logical_type } => {
                self.select_type(key, actor_id, logical_type).await
            }
            PostbackAction::EndSession => match self.sessions.end(key).await {
                Some(_) => Reply::ack("Capture closed. Mention me anytime to start another."),
                None => Reply::ack("Nothing in progress."),
            },
            PostbackAction::ShowMenu => prompt::menu_reply(),
        }
    }

    pub fn menu(&self) -> Reply {
        prompt::menu_reply()
    }

    pub fn help(&self) -> Reply {
        prompt::help_reply()
    }

    /// AwaitingField: the next message is the field's raw value, no
    /// validation, no re-classification.
    async fn fill_pending_field(&self, key: &SessionKey, field: &str, text: &str) -> Reply {
        self.sessions
            .write_field(key, field, FieldValue::text(text))
            .await;
        match self.sessions.get(key).await {
            Some(session) => prompt::field_written_reply(&session, field, text),
            None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
        }
    }

    /// Free text with no session (or a live non-menu capture, which gets
    /// replaced): classify it and open a confirmation panel. Extraction
    /// failure leaves no session behind.
    async fn start_capture(&self, key: &SessionKey, text: &str) -> Reply {
        let extraction = match self.extractor.extract(text).await {
            Ok(extraction) => extraction,
            Err(err) => return self.degrade(key, EngineError::Extraction(err)),
        };

        self.sessions.create(key, extraction.logical_type).await;
        self.apply_extraction(key, extraction.title.as_deref(), &extraction.fields)
            .await;

        match self.sessions.get(key).await {
            Some(session) => prompt::confirmation_reply(&session),
            None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
        }
    }

    /// MenuCapturing: fold newly extracted fields into the session. The
    /// menu-chosen type is authoritative; extraction's type guess is
    /// ignored.
    async fn merge_into_menu_session(&self, key: &SessionKey, text: &str) -> Reply {
        let extraction = match self.extractor.extract(text).await {
            Ok(extraction) => extraction,
            Err(err) => return self.degrade(key, EngineError::Extraction(err)),
        };

        self.apply_extraction(key, extraction.title.as_deref(), &extraction.fields)
            .await;

        match self.sessions.get(key).await {
            Some(session) => prompt::confirmation_reply(&session),
            None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
        }
    }

    async fn apply_extraction(
        &self,
        key: &SessionKey,
        title: Option<&str>,
        fields: &std::collections::HashMap<String, String>,
    ) {
        if let Some(title) = title {
            if !title.is_empty() {
                self.sessions
                    .write_field(key, "title", FieldValue::text(title))
                    .await;
            }
        }
        for (field, value) in fields {
            self.sessions
                .write_field(key, field, FieldValue::text(value.clone()))
                .await;
        }
    }

    /// First save creates; every later save updates the same record. On
    /// failure the saved-record bookkeeping is untouched, so re-issuing
    /// save is safe.
    async fn save(&self, key: &SessionKey, actor_id: &str) -> Result<Reply, EngineError> {
        let session = self
            .sessions
            .get(key)
            .await
            .ok_or_else(|| EngineError::NoActiveSession(key.clone()))?;

        if let Some(record_id) = &session.saved_record_id {
            self.records
                .update(record_id, session.logical_type, &session.fields, actor_id)
                .await
                .map_err(EngineError::Persistence)?;
            Ok(Reply::ack(format!(
                "Updated the saved {}.",
                session.logical_type.label()
            )))
        } else {
            let record_id = self
                .records
                .create(session.logical_type, &session.fields, actor_id)
                .await
                .map_err(EngineError::Persistence)?;
            self.sessions.mark_saved(key, record_id).await;
            Ok(Reply::ack(format!(
                "Saved the {}. Keep editing and save again to update it.",
                session.logical_type.label()
            )))
        }
    }

    /// A chosen type: starts a menu session when none exists, converts a
    /// menu session into a concrete capture, or reclassifies a live
    /// capture in place. Fields survive in every branch.
    async fn select_type(
        &self,
        key: &SessionKey,
        actor_id: &str,
        logical_type: LogicalType,
    ) -> Reply {
        match self.sessions.get(key).await {
            None => {
                self.sessions.create_menu(key, logical_type).await;
                match self.sessions.get(key).await {
                    Some(session) => prompt::confirmation_reply(&session),
                    None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
                }
            }
            Some(session) if session.is_menu_session => {
                self.sessions
                    .convert_to_data_session(key, logical_type)
                    .await;
                match self.sessions.get(key).await {
                    Some(session) => prompt::confirmation_reply(&session),
                    None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
                }
            }
            Some(session) => {
                self.sessions.set_logical_type(key, logical_type).await;
                if let Some(record_id) = &session.saved_record_id {
                    if let Err(err) = self
                        .records
                        .update(record_id, logical_type, &session.fields, actor_id)
                        .await
                    {
                        return self.degrade(key, EngineError::Persistence(err));
                    }
                }
                match self.sessions.get(key).await {
                    Some(session) => prompt::confirmation_reply(&session),
                    None => self.degrade(key, EngineError::NoActiveSession(key.clone())),
                }
            }
        }
    }

    fn degrade(&self, key: &SessionKey, err: EngineError) -> Reply {
        warn!(%key, error = %err, "capture flow degraded to user-facing reply");
        err.to_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use inkwasp_extract::{Extraction, FailingExtractor, StubExtractor};
    use inkwasp_schema::RecordId;

    /// Records every persistence call; optionally fails them all.
    #[derive(Default)]
    struct RecordingStore {
        creates: Mutex<Vec<LogicalType>>,
        updates: Mutex<Vec<(RecordId, LogicalType)>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for RecordingStore {
        async fn create(
            &self,
            logical_type: LogicalType,
            _fields: &HashMap<String, FieldValue>,
            _actor_id: &str,
        ) -> anyhow::Result<RecordId> {
            if self.fail {
                anyhow::bail!("storage offline");
            }
            self.creates.lock().unwrap().push(logical_type);
            Ok(format!("{}_1", logical_type.as_str()))
        }

        async fn update(
            &self,
            record_id: &RecordId,
            logical_type: LogicalType,
            _fields: &HashMap<String, FieldValue>,
            _actor_id: &str,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("storage offline");
            }
            self.updates
                .lock()
                .unwrap()
                .push((record_id.clone(), logical_type));
            Ok(())
        }
    }

    fn key() -> SessionKey {
        SessionKey("direct:user:U1".to_string())
    }

    fn engine_with(
        extractor: Arc<dyn FieldExtractor>,
        records: Arc<RecordingStore>,
    ) -> (CaptureEngine, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new());
        let engine = CaptureEngine::new(sessions.clone(), extractor, records);
        (engine, sessions)
    }

    fn schedule_extraction() -> Extraction {
        Extraction {
            logical_type: LogicalType::Schedule,
            title: Some("会議".into()),
            fields: HashMap::from([("datetime".to_string(), "明日14時".to_string())]),
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn extraction_failure_creates_no_session() {
        let (engine, sessions) =
            engine_with(Arc::new(FailingExtractor), Arc::new(RecordingStore::default()));
        let reply = engine.handle_message(&key(), "gibberish").await;
        assert!(matches!(reply, Reply::Ack { .. }));
        assert!(!sessions.has_active(&key()).await);
    }

    #[tokio::test]
    async fn message_classifies_and_opens_confirmation() {
        let (engine, sessions) = engine_with(
            Arc::new(StubExtractor::new(schedule_extraction())),
            Arc::new(RecordingStore::default()),
        );
        let reply = engine.handle_message(&key(), "明日14時 会議").await;
        assert!(matches!(reply, Reply::Prompt { .. }));

        let session = sessions.get(&key()).await.unwrap();
        assert_eq!(session.logical_type, LogicalType::Schedule);
        assert_eq!(session.fields.get("title"), Some(&FieldValue::text("会議")));
        assert_eq!(
            session.fields.get("datetime"),
            Some(&FieldValue::text("明日14時"))
        );
    }

    #[tokio::test]
    async fn save_on_missing_session_makes_no_persistence_calls() {
        let records = Arc::new(RecordingStore::default());
        let (engine, _) = engine_with(Arc::new(StubExtractor::memo()), records.clone());
        let reply = engine
            .handle_postback(
                &key(),
                "U1",
                PostbackAction::SavePartial {
                    logical_type: LogicalType::Task,
                },
            )
            .await;
        assert_eq!(reply, Reply::ack("Session not found. Please start over."));
        assert!(records.creates.lock().unwrap().is_empty());
        assert!(records.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_leaves_session_unsaved() {
        let records = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let (engine, sessions) = engine_with(
            Arc::new(StubExtractor::new(schedule_extraction())),
            records,
        );
        engine.handle_message(&key(), "明日14時 会議").await;
        let reply = engine
            .handle_postback(
                &key(),
                "U1",
                PostbackAction::SavePartial {
                    logical_type: LogicalType::Schedule,
                },
            )
            .await;
        assert_eq!(reply, Reply::ack("Saving failed. Please try again."));
        assert!(!sessions.get(&key()).await.unwrap().saved_already());
    }

    #[tokio::test]
    async fn end_session_closes_and_is_idempotent() {
        let (engine, sessions) = engine_with(
            Arc::new(StubExtractor::new(schedule_extraction())),
            Arc::new(RecordingStore::default()),
        );
        engine.handle_message(&key(), "明日14時 会議").await;
        let reply = engine
            .handle_postback(&key(), "U1", PostbackAction::EndSession)
            .await;
        assert!(matches!(reply, Reply::Ack { .. }));
        assert!(!sessions.has_active(&key()).await);

        let reply = engine
            .handle_postback(&key(), "U1", PostbackAction::EndSession)
            .await;
        assert_eq!(reply, Reply::ack("Nothing in progress."));
    }

    #[tokio::test]
    async fn menu_selection_without_session_starts_menu_capture() {
        let (engine, sessions) = engine_with(
            Arc::new(StubExtractor::memo()),
            Arc::new(RecordingStore::default()),
        );
        engine
            .handle_postback(
                &key(),
                "U1",
                PostbackAction::SelectType {
                    logical_type: LogicalType::Task,
                },
            )
            .await;
        let session = sessions.get(&key()).await.unwrap();
        assert!(session.is_menu_session);
        assert_eq!(session.logical_type, LogicalType::Task);
    }

    #[tokio::test]
    async fn menu_session_merge_keeps_chosen_type() {
        // Extractor votes "schedule"; the menu chose "task". Menu wins.
        let (engine, sessions) = engine_with(
            Arc::new(StubExtractor::new(schedule_extraction())),
            Arc::new(RecordingStore::default()),
        );
        engine
            .handle_postback(
                &key(),
                "U1",
                PostbackAction::SelectType {
                    logical_type: LogicalType::Task,
                },
            )
            .await;
        engine.handle_message(&key(), "明日14時 会議").await;

        let session = sessions.get(&key()).await.unwrap();
        assert!(session.is_menu_session);
        assert_eq!(session.logical_type, LogicalType::Task);
        assert_eq!(
            session.fields.get("datetime"),
            Some(&FieldValue::text("明日14時"))
        );
    }
}
