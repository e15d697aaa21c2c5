//! Event router: the front door between raw webhook events and the
//! capture engine.
//!
//! Decides, per inbound event, whether it is for us at all. In a group
//! chat only explicitly addressed or session-continuing messages are
//! processed; everything else is dropped without a trace the sender
//! would notice.

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

use inkwasp_core::CaptureEngine;
use inkwasp_schema::{
    EventKind, InboundEvent, MentionInfo, MentionSpan, PostbackAction, Reply, SessionKey,
};
use inkwasp_store::SessionStore;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst: 10,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: chrono::DateTime<chrono::Utc>,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            max_tokens: config.burst as f64,
            refill_rate: config.requests_per_minute as f64 / 60.0,
            last_refill: chrono::Utc::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = chrono::Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    buckets: Arc<TokioMutex<StdHashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(TokioMutex::new(StdHashMap::new())),
            config,
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(&self.config));
        bucket.try_consume()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Menu,
    Help,
}

fn match_builtin(text: &str) -> Option<Builtin> {
    match text.trim().to_lowercase().as_str() {
        "menu" | "メニュー" => Some(Builtin::Menu),
        "help" | "ヘルプ" | "使い方" => Some(Builtin::Help),
        _ => None,
    }
}

/// Did the message address the bot, and what is left once the address
/// token is removed? Structured mention spans win; the bot-name
/// substring fallback applies only when no mention metadata came through.
fn resolve_addressing(
    text: &str,
    mention: Option<&MentionInfo>,
    bot_names: &[String],
) -> (bool, String) {
    if let Some(info) = mention {
        if info.mentions_bot() {
            return (true, strip_self_spans(text, &info.spans));
        }
        return (false, text.to_string());
    }

    for name in bot_names {
        if let Some(idx) = text.find(name.as_str()) {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..idx]);
            cleaned.push_str(&text[idx + name.len()..]);
            return (true, cleaned);
        }
    }

    (false, text.to_string())
}

/// Remove the characters covered by is_self mention spans. Offsets count
/// Unicode scalar values, so slicing goes through a char index rather
/// than bytes.
fn strip_self_spans(text: &str, spans: &[MentionSpan]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut keep = vec![true; chars.len()];
    for span in spans.iter().filter(|span| span.is_self) {
        let end = span.offset.saturating_add(span.length).min(chars.len());
        for flag in keep.iter_mut().take(end).skip(span.offset.min(chars.len())) {
            *flag = false;
        }
    }
    chars
        .into_iter()
        .zip(keep)
        .filter_map(|(ch, keep)| keep.then_some(ch))
        .collect()
}

pub struct Gateway {
    engine: Arc<CaptureEngine>,
    sessions: Arc<SessionStore>,
    bot_names: Vec<String>,
    rate_limiter: RateLimiter,
}

impl Gateway {
    pub fn new(
        engine: Arc<CaptureEngine>,
        sessions: Arc<SessionStore>,
        bot_names: Vec<String>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            engine,
            sessions,
            bot_names,
            rate_limiter,
        }
    }

    /// Route one inbound event. `None` means the event was dropped:
    /// gated out, rate limited, or empty after mention stripping.
    pub async fn handle_event(&self, event: InboundEvent) -> Option<Reply> {
        let key = SessionKey::from_sender(&event.sender);

        if !self.rate_limiter.check(&event.sender.user_id).await {
            warn!(user = %event.sender.user_id, "rate limited inbound event");
            return None;
        }

        match &event.kind {
            EventKind::Postback { data } => Some(self.handle_postback(&key, &event, data).await),
            EventKind::Message { text, mention } => {
                self.handle_message(&key, &event, text, mention.as_ref())
                    .await
            }
        }
    }

    async fn handle_postback(&self, key: &SessionKey, event: &InboundEvent, data: &str) -> Reply {
        match PostbackAction::decode(data) {
            Ok(action) => {
                self.engine
                    .handle_postback(key, &event.sender.user_id, action)
                    .await
            }
            Err(err) => {
                warn!(trace_id = %event.trace_id, %err, "malformed postback");
                Reply::ack("I didn't recognize that action.")
            }
        }
    }

    /// The processing gate, in precedence order: a pending field consumes
    /// the text no matter what it says; a menu session absorbs everything;
    /// builtin commands; then any live session or an explicit address;
    /// otherwise drop.
    async fn handle_message(
        &self,
        key: &SessionKey,
        event: &InboundEvent,
        text: &str,
        mention: Option<&MentionInfo>,
    ) -> Option<Reply> {
        let (addressed, cleaned) = resolve_addressing(text, mention, &self.bot_names);
        let cleaned = cleaned.trim();

        if self.sessions.is_awaiting_input(key).await {
            return Some(self.engine.handle_message(key, cleaned).await);
        }

        if self.sessions.is_menu_session(key).await {
            return Some(self.engine.handle_message(key, cleaned).await);
        }

        if let Some(builtin) = match_builtin(cleaned) {
            return Some(match builtin {
                Builtin::Menu => self.engine.menu(),
                Builtin::Help => self.engine.help(),
            });
        }

        if cleaned.is_empty() {
            // A bare mention: nothing to classify, show the menu instead.
            return addressed.then(|| self.engine.menu());
        }

        if self.sessions.has_active(key).await || addressed {
            return Some(self.engine.handle_message(key, cleaned).await);
        }

        tracing::debug!(trace_id = %event.trace_id, "dropping unaddressed message");
        None
    }
}
