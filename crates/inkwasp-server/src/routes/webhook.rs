//! The webhook endpoint: a LINE-style event envelope in, abstract reply
//! descriptors out. Rendering those descriptors into channel messages is
//! the caller's side of the contract.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use inkwasp_schema::{
    EventKind, InboundEvent, MentionInfo, MentionSpan, Reply, SenderKey,
};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: WebhookSource,
    #[serde(default)]
    pub reply_token: Option<String>,
    /// Milliseconds since the epoch, per the channel's convention.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<WebhookMessage>,
    #[serde(default)]
    pub postback: Option<WebhookPostback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSource {
    pub user_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mention: Option<WebhookMention>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMention {
    #[serde(default)]
    pub mentionees: Vec<WebhookMentionee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMentionee {
    pub index: usize,
    pub length: usize,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPostback {
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub replies: Vec<OutboundReply>,
}

#[derive(Debug, Serialize)]
pub struct OutboundReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_token: Option<String>,
    pub reply: Reply,
}

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<Json<WebhookResponse>, StatusCode> {
    if let Some(expected) = &state.webhook_token {
        let presented = headers
            .get("x-webhook-token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            tracing::warn!("webhook token mismatch");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let mut replies = Vec::new();
    for event in envelope.events {
        let reply_token = event.reply_token.clone();
        let Some(inbound) = to_inbound(event) else {
            continue;
        };
        if let Some(reply) = state.gateway.handle_event(inbound).await {
            replies.push(OutboundReply { reply_token, reply });
        }
    }

    Ok(Json(WebhookResponse { replies }))
}

/// Map one envelope event to the schema's inbound event. Event kinds the
/// capture flow has no use for (stickers, media, join/leave) map to
/// `None` and are skipped.
fn to_inbound(event: WebhookEvent) -> Option<InboundEvent> {
    let conversation_id = event.source.group_id.or(event.source.room_id);
    let sender = SenderKey {
        user_id: event.source.user_id,
        conversation_id,
    };
    let at = event
        .timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    let kind = match event.kind.as_str() {
        "message" => {
            let message = event.message?;
            let text = message.text?;
            let mention = message.mention.map(|mention| MentionInfo {
                spans: mention
                    .mentionees
                    .into_iter()
                    .map(|mentionee| MentionSpan {
                        offset: mentionee.index,
                        length: mentionee.length,
                        is_self: mentionee.is_self,
                    })
                    .collect(),
            });
            EventKind::Message { text, mention }
        }
        "postback" => EventKind::Postback {
            data: event.postback?.data,
        },
        _ => return None,
    };

    Some(InboundEvent {
        trace_id: Uuid::new_v4(),
        sender,
        at,
        reply_token: event.reply_token,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_event(json: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn message_event_maps_to_inbound() {
        let event = parse_event(serde_json::json!({
            "type": "message",
            "source": {"userId": "U1", "groupId": "G1"},
            "replyToken": "rt-1",
            "timestamp": 1754550000000i64,
            "message": {
                "text": "@Bot 明日14時 会議",
                "mention": {"mentionees": [{"index": 0, "length": 4, "isSelf": true}]}
            }
        }));
        let inbound = to_inbound(event).unwrap();
        assert_eq!(inbound.sender.user_id, "U1");
        assert_eq!(inbound.sender.conversation_id.as_deref(), Some("G1"));
        assert_eq!(inbound.reply_token.as_deref(), Some("rt-1"));
        match inbound.kind {
            EventKind::Message { text, mention } => {
                assert_eq!(text, "@Bot 明日14時 会議");
                assert!(mention.unwrap().mentions_bot());
            }
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn postback_event_maps_to_inbound() {
        let event = parse_event(serde_json::json!({
            "type": "postback",
            "source": {"userId": "U1"},
            "postback": {"data": "save_partial_task"}
        }));
        let inbound = to_inbound(event).unwrap();
        assert!(inbound.sender.conversation_id.is_none());
        match inbound.kind {
            EventKind::Postback { data } => assert_eq!(data, "save_partial_task"),
            _ => panic!("expected postback"),
        }
    }

    #[test]
    fn unsupported_event_kinds_are_skipped() {
        let event = parse_event(serde_json::json!({
            "type": "sticker",
            "source": {"userId": "U1"}
        }));
        assert!(to_inbound(event).is_none());
    }

    #[test]
    fn message_without_text_is_skipped() {
        let event = parse_event(serde_json::json!({
            "type": "message",
            "source": {"userId": "U1"},
            "message": {}
        }));
        assert!(to_inbound(event).is_none());
    }

    #[test]
    fn room_id_scopes_like_group_id() {
        let event = parse_event(serde_json::json!({
            "type": "message",
            "source": {"userId": "U1", "roomId": "R9"},
            "message": {"text": "hi"}
        }));
        let inbound = to_inbound(event).unwrap();
        assert_eq!(inbound.sender.conversation_id.as_deref(), Some("R9"));
    }
}
