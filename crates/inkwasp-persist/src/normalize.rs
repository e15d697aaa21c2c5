//! Field-bag normalization.
//!
//! The session layer stores whatever the user typed, verbatim. Turning
//! that into structured columns (date + time, priority level, assignee)
//! is business policy of the persistence layer and happens here, at save
//! time. Values that fail to parse are not dropped; they ride along in
//! the detail JSON under their original key.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};

use inkwasp_schema::{FieldValue, Priority};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Default)]
pub struct NormalizedRecord {
    pub title: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub detail: Value,
}

impl NormalizedRecord {
    pub fn from_fields(fields: &HashMap<String, FieldValue>, actor_id: &str) -> Self {
        let mut record = NormalizedRecord::default();
        let mut detail = serde_json::Map::new();

        for (key, value) in fields {
            match key.as_str() {
                "title" => record.title = Some(flatten_text(value)),
                "datetime" | "date" | "due" => match value {
                    FieldValue::Text { value: raw } => match parse_datetime(raw) {
                        Some((date, time)) => {
                            record.event_date = Some(date);
                            record.event_time = time;
                        }
                        None => {
                            detail.insert(key.clone(), json!(raw));
                        }
                    },
                    FieldValue::Date { date, time } => {
                        record.event_date = Some(*date);
                        record.event_time = *time;
                    }
                    other => {
                        detail.insert(key.clone(), value_to_json(other));
                    }
                },
                "priority" => match value {
                    FieldValue::Priority { level } => record.priority = Some(*level),
                    FieldValue::Text { value: raw } => match parse_priority(raw) {
                        Some(level) => record.priority = Some(level),
                        None => {
                            detail.insert(key.clone(), json!(raw));
                        }
                    },
                    other => {
                        detail.insert(key.clone(), value_to_json(other));
                    }
                },
                "assignee" => record.assignee = Some(flatten_text(value)),
                _ => {
                    detail.insert(key.clone(), value_to_json(value));
                }
            }
        }

        if record.assignee.is_none() {
            record.assignee = Some(actor_id.to_string());
        }
        record.detail = Value::Object(detail);
        record
    }
}

/// Accepts a handful of unambiguous datetime shapes; anything else is the
/// caller's problem (kept verbatim in detail).
pub fn parse_datetime(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some((dt.date(), Some(dt.time())));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some((date, None));
        }
    }
    None
}

pub fn parse_priority(raw: &str) -> Option<Priority> {
    match raw.trim().to_lowercase().as_str() {
        "high" | "urgent" | "高" | "至急" => Some(Priority::High),
        "medium" | "normal" | "mid" | "中" => Some(Priority::Medium),
        "low" | "低" => Some(Priority::Low),
        _ => None,
    }
}

fn flatten_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Text { value } => value.clone(),
        FieldValue::Date { date, time } => match time {
            Some(time) => format!("{date} {time}"),
            None => date.to_string(),
        },
        FieldValue::Priority { level } => level.as_str().to_string(),
        FieldValue::List { items } => items.join(", "),
    }
}

fn value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text { value } => json!(value),
        FieldValue::Date { date, time } => match time {
            Some(time) => json!(format!("{date} {time}")),
            None => json!(date.to_string()),
        },
        FieldValue::Priority { level } => json!(level.as_str()),
        FieldValue::List { items } => json!(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_datetime_with_time() {
        let (date, time) = parse_datetime("2026-08-10 14:00").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 8, 10).unwrap());
        assert_eq!(time, Some(NaiveTime::from_hms_opt(14, 0, 0).unwrap()));
    }

    #[test]
    fn parse_datetime_slash_and_date_only() {
        let (date, time) = parse_datetime("2026/08/10").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 8, 10).unwrap());
        assert_eq!(time, None);
    }

    #[test]
    fn parse_datetime_rejects_free_text() {
        assert!(parse_datetime("明日14時").is_none());
        assert!(parse_datetime("next tuesday").is_none());
    }

    #[test]
    fn parse_priority_spellings() {
        assert_eq!(parse_priority("High"), Some(Priority::High));
        assert_eq!(parse_priority("高"), Some(Priority::High));
        assert_eq!(parse_priority("normal"), Some(Priority::Medium));
        assert_eq!(parse_priority("低"), Some(Priority::Low));
        assert_eq!(parse_priority("whenever"), None);
    }

    #[test]
    fn assignee_defaults_to_actor() {
        let fields = HashMap::from([("title".to_string(), FieldValue::text("t"))]);
        let record = NormalizedRecord::from_fields(&fields, "U99");
        assert_eq!(record.assignee.as_deref(), Some("U99"));
    }

    #[test]
    fn explicit_assignee_wins_over_actor() {
        let fields = HashMap::from([("assignee".to_string(), FieldValue::text("U42"))]);
        let record = NormalizedRecord::from_fields(&fields, "U99");
        assert_eq!(record.assignee.as_deref(), Some("U42"));
    }

    #[test]
    fn unknown_keys_land_in_detail() {
        let fields = HashMap::from([
            (
                "attendees".to_string(),
                FieldValue::List {
                    items: vec!["U1".into(), "U2".into()],
                },
            ),
            ("budget".to_string(), FieldValue::text("3000")),
        ]);
        let record = NormalizedRecord::from_fields(&fields, "U1");
        assert_eq!(record.detail["attendees"], json!(["U1", "U2"]));
        assert_eq!(record.detail["budget"], "3000");
    }
}
