//! Button postback encoding.
//!
//! Postback data is a single underscore-delimited string with a fixed
//! action prefix and positional parameters. The encoding has no escaping;
//! logical type tokens themselves contain `_`, so decoding matches the
//! type segment against the closed `LogicalType` set longest-first and
//! takes whatever follows verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LogicalType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostbackAction {
    /// Persist the session's current fields (create on first save,
    /// update afterwards).
    SavePartial { logical_type: LogicalType },
    /// Start soliciting a new value for one field.
    ModifyField {
        logical_type: LogicalType,
        field: String,
    },
    /// Assign the record to a specific user.
    SelectAssignee {
        logical_type: LogicalType,
        user_id: String,
    },
    /// Open the type chooser for an active session.
    ChangeType { logical_type: LogicalType },
    /// A chosen type: reclassify an active session, or start a menu
    /// session when none exists.
    SelectType { logical_type: LogicalType },
    /// Terminate the session.
    EndSession,
    /// Show the top-level menu.
    ShowMenu,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostbackDecodeError {
    #[error("unrecognized postback action: {0}")]
    UnknownAction(String),
    #[error("unknown logical type in postback: {0}")]
    UnknownType(String),
    #[error("postback {0} is missing its {1} segment")]
    MissingSegment(String, &'static str),
}

impl PostbackAction {
    pub fn encode(&self) -> String {
        match self {
            PostbackAction::SavePartial { logical_type } => {
                format!("save_partial_{logical_type}")
            }
            PostbackAction::ModifyField {
                logical_type,
                field,
            } => format!("modify_field_{logical_type}_{field}"),
            PostbackAction::SelectAssignee {
                logical_type,
                user_id,
            } => format!("select_assignee_{logical_type}_{user_id}"),
            PostbackAction::ChangeType { logical_type } => {
                format!("change_type_{logical_type}")
            }
            PostbackAction::SelectType { logical_type } => {
                format!("select_type_{logical_type}")
            }
            PostbackAction::EndSession => "end_session".to_string(),
            PostbackAction::ShowMenu => "show_menu".to_string(),
        }
    }

    pub fn decode(data: &str) -> Result<Self, PostbackDecodeError> {
        match data {
            "end_session" => return Ok(PostbackAction::EndSession),
            "show_menu" => return Ok(PostbackAction::ShowMenu),
            _ => {}
        }

        if let Some(rest) = data.strip_prefix("save_partial_") {
            return Ok(PostbackAction::SavePartial {
                logical_type: parse_type(rest)?,
            });
        }
        if let Some(rest) = data.strip_prefix("modify_field_") {
            let (logical_type, field) = split_type_and_tail(data, rest, "field")?;
            return Ok(PostbackAction::ModifyField {
                logical_type,
                field,
            });
        }
        if let Some(rest) = data.strip_prefix("select_assignee_") {
            let (logical_type, user_id) = split_type_and_tail(data, rest, "user id")?;
            return Ok(PostbackAction::SelectAssignee {
                logical_type,
                user_id,
            });
        }
        if let Some(rest) = data.strip_prefix("change_type_") {
            return Ok(PostbackAction::ChangeType {
                logical_type: parse_type(rest)?,
            });
        }
        if let Some(rest) = data.strip_prefix("select_type_") {
            return Ok(PostbackAction::SelectType {
                logical_type: parse_type(rest)?,
            });
        }

        Err(PostbackDecodeError::UnknownAction(data.to_string()))
    }
}

fn parse_type(segment: &str) -> Result<LogicalType, PostbackDecodeError> {
    segment
        .parse()
        .map_err(|_| PostbackDecodeError::UnknownType(segment.to_string()))
}

/// Match the leading logical type longest-first, then take everything after
/// the next delimiter verbatim (the tail may itself contain `_`).
fn split_type_and_tail(
    data: &str,
    rest: &str,
    what: &'static str,
) -> Result<(LogicalType, String), PostbackDecodeError> {
    let mut candidates = LogicalType::ALL;
    candidates.sort_by_key(|lt| std::cmp::Reverse(lt.as_str().len()));

    for lt in candidates {
        let Some(tail) = rest.strip_prefix(lt.as_str()) else {
            continue;
        };
        let Some(tail) = tail.strip_prefix('_') else {
            continue;
        };
        if tail.is_empty() {
            return Err(PostbackDecodeError::MissingSegment(data.to_string(), what));
        }
        return Ok((lt, tail.to_string()));
    }

    Err(PostbackDecodeError::UnknownType(rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_partial_round_trip() {
        let action = PostbackAction::SavePartial {
            logical_type: LogicalType::Task,
        };
        assert_eq!(action.encode(), "save_partial_task");
        assert_eq!(PostbackAction::decode("save_partial_task").unwrap(), action);
    }

    #[test]
    fn modify_field_round_trip() {
        let action = PostbackAction::ModifyField {
            logical_type: LogicalType::Schedule,
            field: "location".into(),
        };
        assert_eq!(action.encode(), "modify_field_schedule_location");
        assert_eq!(
            PostbackAction::decode("modify_field_schedule_location").unwrap(),
            action
        );
    }

    #[test]
    fn modify_field_type_containing_delimiter() {
        let action = PostbackAction::ModifyField {
            logical_type: LogicalType::PersonalSchedule,
            field: "due_date".into(),
        };
        let encoded = action.encode();
        assert_eq!(encoded, "modify_field_personal_schedule_due_date");
        assert_eq!(PostbackAction::decode(&encoded).unwrap(), action);
    }

    #[test]
    fn select_assignee_round_trip() {
        let action = PostbackAction::SelectAssignee {
            logical_type: LogicalType::Task,
            user_id: "U_4567".into(),
        };
        let encoded = action.encode();
        assert_eq!(encoded, "select_assignee_task_U_4567");
        assert_eq!(PostbackAction::decode(&encoded).unwrap(), action);
    }

    #[test]
    fn change_type_round_trip() {
        let action = PostbackAction::ChangeType {
            logical_type: LogicalType::Memo,
        };
        assert_eq!(
            PostbackAction::decode(&action.encode()).unwrap(),
            action
        );
    }

    #[test]
    fn select_type_round_trip_all_types() {
        for lt in LogicalType::ALL {
            let action = PostbackAction::SelectType { logical_type: lt };
            assert_eq!(PostbackAction::decode(&action.encode()).unwrap(), action);
        }
    }

    #[test]
    fn bare_actions_round_trip() {
        assert_eq!(
            PostbackAction::decode("end_session").unwrap(),
            PostbackAction::EndSession
        );
        assert_eq!(
            PostbackAction::decode("show_menu").unwrap(),
            PostbackAction::ShowMenu
        );
    }

    #[test]
    fn unknown_action_is_error() {
        let err = PostbackAction::decode("launch_rocket_now").unwrap_err();
        assert_eq!(
            err,
            PostbackDecodeError::UnknownAction("launch_rocket_now".to_string())
        );
    }

    #[test]
    fn unknown_type_is_error() {
        let err = PostbackAction::decode("save_partial_reminder").unwrap_err();
        assert_eq!(
            err,
            PostbackDecodeError::UnknownType("reminder".to_string())
        );
    }

    #[test]
    fn modify_field_without_field_is_error() {
        let err = PostbackAction::decode("modify_field_task_").unwrap_err();
        assert!(matches!(err, PostbackDecodeError::MissingSegment(_, "field")));

        let err = PostbackAction::decode("modify_field_task").unwrap_err();
        assert!(matches!(err, PostbackDecodeError::UnknownType(_)));
    }
}
