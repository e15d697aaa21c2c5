//! Google Gemini backed field extractor
//!
//! https://ai.google.dev/api/generate-content

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{Extraction, FieldExtractor};
use inkwasp_schema::LogicalType;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Override the API base URL (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_prompt(text: &str) -> String {
        let type_names: Vec<&str> = LogicalType::ALL.iter().map(|lt| lt.as_str()).collect();
        format!(
            "Classify the following chat message into exactly one record type \
             out of [{}] and pull out any field values it mentions.\n\
             Reply with a single JSON object, no prose:\n\
             {{\"type\": \"...\", \"title\": \"...\", \
             \"fields\": {{\"datetime\": \"...\", \"location\": \"...\"}}, \
             \"confidence\": 0.0}}\n\
             Omit fields the message does not mention. Keep field values \
             verbatim from the message.\n\nMessage:\n{}",
            type_names.join(", "),
            text
        )
    }
}

#[async_trait]
impl FieldExtractor for GeminiExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Self::build_prompt(text),
                }],
            }],
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(512),
                temperature: Some(0.0),
            }),
        };

        let resp = match self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!(
                    "gemini api error (timeout) [retryable]: request timed out"
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("gemini api error (connect) [retryable]: {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await?;
            return Err(format_api_error(status, &text));
        }

        let body: GeminiResponse = resp.json().await?;
        let candidate = body
            .candidates
            .first()
            .ok_or_else(|| anyhow!("gemini api error: empty candidates"))?;
        let raw: String = candidate
            .content
            .parts
            .iter()
            .map(|part| part.text.as_str())
            .collect();

        parse_extraction(&raw)
    }
}

/// Parse the model's reply into an [`Extraction`], tolerating markdown code
/// fences. A well-formed reply naming an unknown type degrades to a
/// low-confidence memo instead of failing the whole extraction.
pub(crate) fn parse_extraction(raw: &str) -> Result<Extraction> {
    let trimmed = strip_code_fence(raw.trim());
    let payload: ExtractionPayload = serde_json::from_str(trimmed)
        .map_err(|e| anyhow!("unparseable extraction payload: {e}"))?;

    let confidence = payload.confidence.unwrap_or(0.5).clamp(0.0, 1.0);

    match payload.kind.parse::<LogicalType>() {
        Ok(logical_type) => Ok(Extraction {
            logical_type,
            title: payload.title,
            fields: payload.fields,
            confidence,
        }),
        Err(_) => {
            tracing::warn!(kind = %payload.kind, "extractor produced unknown type, falling back to memo");
            Ok(Extraction {
                logical_type: LogicalType::Memo,
                title: payload.title,
                fields: payload.fields,
                confidence: confidence.min(0.3),
            })
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the optional language tag on the fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

fn format_api_error(status: StatusCode, text: &str) -> anyhow::Error {
    let retryable = match status.as_u16() {
        429 | 500..=599 => " [retryable]",
        _ => "",
    };
    anyhow!("gemini api error ({status}){retryable}: {text}")
}

// ============================================================
// Gemini API Types
// ============================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// What we ask the model to produce.
#[derive(Debug, Clone, Deserialize)]
struct ExtractionPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    fields: std::collections::HashMap<String, String>,
    #[serde(default)]
    confidence: Option<f32>,
}
