//! Gemini API client for text and image+text prompts.

use std::fmt;
use std::future::Future;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug)]
pub enum ModelError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Parse(serde_json::Error),
    /// The response was well-formed but unusable (blocked, empty, ...).
    Response(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP error: {e}"),
            Self::Api { status, body } => write!(f, "API error {status}: {body}"),
            Self::Parse(e) => write!(f, "failed to parse response: {e}"),
            Self::Response(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Api { .. } | Self::Response(_) => None,
        }
    }
}

/// One piece of a prompt, in Gemini's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// JPEG image part from raw bytes.
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: "image/jpeg".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }
}

/// Anything that turns prompt parts into reply text.
pub trait LanguageModel: Send + Sync {
    fn generate_content(&self, parts: Vec<Part>) -> impl Future<Output = Result<String, ModelError>> + Send;
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(ModelError::Http)?;

        Ok(Self {
            api_key,
            model,
            base_url: GEMINI_API_BASE.to_string(),
            client,
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The key travels in a header so it never shows up in URLs or error text.
    fn build_request(&self, parts: Vec<Part>) -> reqwest::RequestBuilder {
        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        self.client
            .post(url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&request)
    }

    async fn request(&self, parts: Vec<Part>) -> Result<String, ModelError> {
        let response = self
            .build_request(parts)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        let body = response.text().await.map_err(http_error)?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(ModelError::Api { status: status.as_u16(), body });
        }

        parse_response(&body)
    }
}

fn http_error(e: reqwest::Error) -> ModelError {
    ModelError::Http(e.without_url())
}

impl LanguageModel for GeminiClient {
    async fn generate_content(&self, parts: Vec<Part>) -> Result<String, ModelError> {
        self.request(parts).await
    }
}

/// Concatenated text of the first candidate.
fn parse_response(body: &str) -> Result<String, ModelError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(ModelError::Parse)?;

    if let Some(error) = parsed.error {
        return Err(ModelError::Response(format!("Gemini error: {}", error.message)));
    }

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::Response(format!("prompt blocked: {reason}")));
    }

    let candidate = parsed
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ModelError::Response("no candidates in response".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ModelError::Response(format!("empty response (finish reason: {reason})")));
    }

    Ok(text)
}
