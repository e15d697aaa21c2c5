use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod postback;

pub use postback::{PostbackAction, PostbackDecodeError};

/// Opaque identifier of a persisted record, minted by the persistence
/// adapter on first save.
pub type RecordId = String;

/// The closed set of record kinds a capture session can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    PersonalSchedule,
    Schedule,
    Task,
    Project,
    Contact,
    Appointment,
    Memo,
}

impl LogicalType {
    pub const ALL: [LogicalType; 7] = [
        LogicalType::PersonalSchedule,
        LogicalType::Schedule,
        LogicalType::Task,
        LogicalType::Project,
        LogicalType::Contact,
        LogicalType::Appointment,
        LogicalType::Memo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::PersonalSchedule => "personal_schedule",
            LogicalType::Schedule => "schedule",
            LogicalType::Task => "task",
            LogicalType::Project => "project",
            LogicalType::Contact => "contact",
            LogicalType::Appointment => "appointment",
            LogicalType::Memo => "memo",
        }
    }

    /// Human-facing label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            LogicalType::PersonalSchedule => "personal schedule",
            LogicalType::Schedule => "shared schedule",
            LogicalType::Task => "task",
            LogicalType::Project => "project",
            LogicalType::Contact => "contact",
            LogicalType::Appointment => "appointment",
            LogicalType::Memo => "memo",
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown logical type: {0}")]
pub struct UnknownLogicalType(pub String);

impl std::str::FromStr for LogicalType {
    type Err = UnknownLogicalType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogicalType::ALL
            .iter()
            .copied()
            .find(|lt| lt.as_str() == s)
            .ok_or_else(|| UnknownLogicalType(s.to_string()))
    }
}

/// Record priority, normalized by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// A captured field value. The state machine only ever writes `Text`
/// (raw user input, verbatim); the richer variants are produced by the
/// persistence layer's normalization so its mapping can match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValue {
    Text {
        value: String,
    },
    Date {
        date: NaiveDate,
        #[serde(default)]
        time: Option<NaiveTime>,
    },
    Priority {
        level: Priority,
    },
    List {
        items: Vec<String>,
    },
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text {
            value: value.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text { value } => Some(value),
            _ => None,
        }
    }
}

/// Who sent an inbound event: the end user, plus the group/room scope
/// when the message did not arrive over a direct chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderKey {
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl SenderKey {
    pub fn direct(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
        }
    }

    pub fn in_conversation(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: Some(conversation_id.into()),
        }
    }
}

/// Canonical key for the session store: one active capture per key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn from_sender(sender: &SenderKey) -> Self {
        match &sender.conversation_id {
            Some(conv) => Self(format!("conv:{}:user:{}", conv, sender.user_id)),
            None => Self(format!("direct:user:{}", sender.user_id)),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured mention span inside a message, as reported by the
/// messaging platform. Offsets count Unicode scalar values, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionSpan {
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MentionInfo {
    pub spans: Vec<MentionSpan>,
}

impl MentionInfo {
    pub fn mentions_bot(&self) -> bool {
        self.spans.iter().any(|span| span.is_self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        text: String,
        #[serde(default)]
        mention: Option<MentionInfo>,
    },
    Postback {
        data: String,
    },
}

/// One inbound webhook event, already stripped of channel framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub trace_id: Uuid,
    pub sender: SenderKey,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reply_token: Option<String>,
    pub kind: EventKind,
}

/// One labeled action attached to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyAction {
    pub label: String,
    pub kind: ReplyActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyActionKind {
    /// Solicit free text for one named field.
    CollectField { field: String },
    /// Fire an encoded postback when tapped.
    Postback { action: PostbackAction },
}

impl ReplyAction {
    pub fn collect(label: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ReplyActionKind::CollectField {
                field: field.into(),
            },
        }
    }

    pub fn postback(label: impl Into<String>, action: PostbackAction) -> Self {
        Self {
            label: label.into(),
            kind: ReplyActionKind::Postback { action },
        }
    }
}

/// The abstract outbound response handed to the channel renderer: either a
/// plain acknowledgement or a titled prompt with tappable actions. This is
/// the renderer's whole input contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        text: String,
    },
    Prompt {
        title: String,
        body: String,
        actions: Vec<ReplyAction>,
    },
}

impl Reply {
    pub fn ack(text: impl Into<String>) -> Self {
        Reply::Ack { text: text.into() }
    }

    pub fn prompt(
        title: impl Into<String>,
        body: impl Into<String>,
        actions: Vec<ReplyAction>,
    ) -> Self {
        Reply::Prompt {
            title: title.into(),
            body: body.into(),
            actions,
        }
    }
}
