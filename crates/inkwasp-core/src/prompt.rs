//! Reply construction: confirmation panels, menus, acks.
//!
//! Everything here produces the abstract [`Reply`] descriptor; turning it
//! into channel-specific buttons and bubbles is the renderer's job.

use inkwasp_schema::{LogicalType, PostbackAction, Reply, ReplyAction};
use inkwasp_store::CaptureSession;

/// Fields worth offering an edit button for, per record kind. The field
/// set itself stays open; this only drives which buttons show up.
pub fn suggested_fields(logical_type: LogicalType) -> &'static [&'static str] {
    match logical_type {
        LogicalType::PersonalSchedule | LogicalType::Schedule | LogicalType::Appointment => {
            &["title", "datetime", "location"]
        }
        LogicalType::Task => &["title", "due", "priority", "assignee"],
        LogicalType::Project => &["title", "due", "priority"],
        LogicalType::Contact => &["title", "phone", "email"],
        LogicalType::Memo => &["title", "body"],
    }
}

/// The classification-confirmation panel shown whenever a capture has
/// been (re)classified or enriched: current type, gathered fields, and
/// the follow-up actions (save, change type, edit fields, end).
pub fn confirmation_reply(session: &CaptureSession) -> Reply {
    let logical_type = session.logical_type;

    let mut actions = vec![
        ReplyAction::postback("Save", PostbackAction::SavePartial { logical_type }),
        ReplyAction::postback("Change type", PostbackAction::ChangeType { logical_type }),
    ];
    for field in suggested_fields(logical_type) {
        actions.push(ReplyAction::postback(
            format!("Edit {field}"),
            PostbackAction::ModifyField {
                logical_type,
                field: (*field).to_string(),
            },
        ));
    }
    actions.push(ReplyAction::postback("Done", PostbackAction::EndSession));

    Reply::prompt(
        format!("Capturing a {}", logical_type.label()),
        field_summary(session),
        actions,
    )
}

/// Ack shown right after a pending field was filled; offers save plus
/// further edits so the user can keep enriching the record.
pub fn field_written_reply(session: &CaptureSession, field: &str, value: &str) -> Reply {
    let logical_type = session.logical_type;
    let mut actions = vec![ReplyAction::postback(
        "Save",
        PostbackAction::SavePartial { logical_type },
    )];
    for suggested in suggested_fields(logical_type) {
        if *suggested == field {
            continue;
        }
        actions.push(ReplyAction::postback(
            format!("Edit {suggested}"),
            PostbackAction::ModifyField {
                logical_type,
                field: (*suggested).to_string(),
            },
        ));
    }
    actions.push(ReplyAction::postback("Done", PostbackAction::EndSession));

    Reply::prompt(
        format!("{field} set"),
        format!("{field}: {value}"),
        actions,
    )
}

/// Prompt soliciting raw text for one field.
pub fn collect_field_reply(field: &str) -> Reply {
    Reply::prompt(
        format!("Send the new {field}"),
        format!("Your next message will be stored as {field}."),
        vec![ReplyAction::collect(format!("Enter {field}"), field)],
    )
}

/// The type chooser used by both the top-level menu and "change type".
pub fn type_chooser_reply(title: &str, body: &str) -> Reply {
    let actions = LogicalType::ALL
        .iter()
        .map(|lt| {
            ReplyAction::postback(
                lt.label(),
                PostbackAction::SelectType { logical_type: *lt },
            )
        })
        .collect();
    Reply::prompt(title, body, actions)
}

pub fn menu_reply() -> Reply {
    type_chooser_reply("What would you like to record?", "Pick a record type.")
}

pub fn help_reply() -> Reply {
    Reply::ack(
        "Mention me with what you want to record and I'll sort it into a \
         task, schedule, contact, or memo. Say \"menu\" to pick a type \
         yourself. While a capture is open, tap its buttons to save, edit \
         fields, or finish.",
    )
}

fn field_summary(session: &CaptureSession) -> String {
    if session.fields.is_empty() {
        return "No details captured yet. Send more text to fill things in.".to_string();
    }
    let mut lines: Vec<String> = session
        .fields
        .iter()
        .map(|(key, value)| {
            let shown = value.as_text().map(str::to_string).unwrap_or_else(|| {
                // Non-text values only appear if a caller stored them directly.
                format!("{value:?}")
            });
            format!("{key}: {shown}")
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwasp_schema::{FieldValue, ReplyActionKind, SessionKey};
    use inkwasp_store::SessionStore;

    async fn session_with_fields() -> CaptureSession {
        let store = SessionStore::new();
        let key = SessionKey("direct:user:U1".to_string());
        store.create(&key, LogicalType::Schedule).await;
        store
            .write_field(&key, "title", FieldValue::text("会議"))
            .await;
        store
            .write_field(&key, "location", FieldValue::text("会議室A"))
            .await;
        store.get(&key).await.unwrap()
    }

    #[tokio::test]
    async fn confirmation_lists_fields_sorted() {
        let session = session_with_fields().await;
        match confirmation_reply(&session) {
            Reply::Prompt { title, body, .. } => {
                assert!(title.contains("shared schedule"));
                assert_eq!(body, "location: 会議室A\ntitle: 会議");
            }
            _ => panic!("expected prompt"),
        }
    }

    #[tokio::test]
    async fn confirmation_offers_save_change_edit_end() {
        let session = session_with_fields().await;
        let Reply::Prompt { actions, .. } = confirmation_reply(&session) else {
            panic!("expected prompt");
        };
        let postbacks: Vec<_> = actions
            .iter()
            .filter_map(|action| match &action.kind {
                ReplyActionKind::Postback { action } => Some(action.clone()),
                _ => None,
            })
            .collect();
        assert!(postbacks.contains(&PostbackAction::SavePartial {
            logical_type: LogicalType::Schedule
        }));
        assert!(postbacks.contains(&PostbackAction::ChangeType {
            logical_type: LogicalType::Schedule
        }));
        assert!(postbacks.contains(&PostbackAction::ModifyField {
            logical_type: LogicalType::Schedule,
            field: "datetime".to_string()
        }));
        assert!(postbacks.contains(&PostbackAction::EndSession));
    }

    #[test]
    fn menu_offers_every_type() {
        let Reply::Prompt { actions, .. } = menu_reply() else {
            panic!("expected prompt");
        };
        assert_eq!(actions.len(), LogicalType::ALL.len());
    }

    #[test]
    fn collect_field_reply_carries_field() {
        let Reply::Prompt { actions, .. } = collect_field_reply("location") else {
            panic!("expected prompt");
        };
        assert_eq!(
            actions[0].kind,
            ReplyActionKind::CollectField {
                field: "location".to_string()
            }
        );
    }
}
