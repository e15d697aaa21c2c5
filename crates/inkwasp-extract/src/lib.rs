//! Field extraction: free text in, best-guess typed record out.
//!
//! The state machine consumes this through the [`FieldExtractor`] trait
//! and treats it as fallible; on failure it reports back to the user
//! instead of creating a session.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use inkwasp_schema::LogicalType;

pub mod gemini;

pub use gemini::GeminiExtractor;

/// Best-guess interpretation of one free-text message.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub logical_type: LogicalType,
    pub title: Option<String>,
    /// Flat field map, raw strings. Keys are an open set; unknown keys are
    /// carried through to the session as-is.
    pub fields: HashMap<String, String>,
    /// Advisory only: no flow currently branches on it.
    pub confidence: f32,
}

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction>;
}

/// Returns a canned extraction; used in tests and offline runs.
pub struct StubExtractor {
    canned: Extraction,
}

impl StubExtractor {
    pub fn new(canned: Extraction) -> Self {
        Self { canned }
    }

    /// A stub that classifies everything as a memo titled with the input.
    pub fn memo() -> Self {
        Self {
            canned: Extraction {
                logical_type: LogicalType::Memo,
                title: None,
                fields: HashMap::new(),
                confidence: 0.5,
            },
        }
    }
}

#[async_trait]
impl FieldExtractor for StubExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let mut extraction = self.canned.clone();
        if extraction.title.is_none() {
            extraction.title = Some(text.to_string());
        }
        Ok(extraction)
    }
}

/// Always errors; exercises the extraction-failure path.
pub struct FailingExtractor;

#[async_trait]
impl FieldExtractor for FailingExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction> {
        Err(anyhow::anyhow!("extractor unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_canned_extraction() {
        let stub = StubExtractor::new(Extraction {
            logical_type: LogicalType::Schedule,
            title: Some("会議".into()),
            fields: HashMap::from([("datetime".to_string(), "明日14時".to_string())]),
            confidence: 0.8,
        });
        let extraction = stub.extract("@Bot 明日14時 会議").await.unwrap();
        assert_eq!(extraction.logical_type, LogicalType::Schedule);
        assert_eq!(extraction.title.as_deref(), Some("会議"));
    }

    #[tokio::test]
    async fn memo_stub_titles_with_input() {
        let extraction = StubExtractor::memo().extract("buy milk").await.unwrap();
        assert_eq!(extraction.logical_type, LogicalType::Memo);
        assert_eq!(extraction.title.as_deref(), Some("buy milk"));
    }

    #[tokio::test]
    async fn failing_extractor_errors() {
        assert!(FailingExtractor.extract("anything").await.is_err());
    }
}
