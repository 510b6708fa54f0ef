//! Minimal Gemini `generateContent` client for PDF-in, JSON-out extraction.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, bail};
use base64::{Engine, engine::general_purpose::STANDARD};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const MAX_OUTPUT_TOKENS: u32 = 65_536;

#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            // Avoid macOS system proxy lookup that can panic in sandboxed contexts.
            .no_proxy()
            .user_agent(concat!("bento-sheet-api/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, model: &str) -> String {
        let model = model.trim_start_matches("models/");
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    /// Sends the PDF with a prompt and returns the model's raw text answer.
    pub async fn generate_text(
        &self,
        model: &str,
        pdf_bytes: &[u8],
        prompt: &str,
    ) -> anyhow::Result<String> {
        let request = GenerateContentRequest::for_pdf(pdf_bytes, prompt);

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Gemini API error ({status}): {}", api_error_message(&body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("failed to decode Gemini response")?;
        let text = parsed.text();
        if text.trim().is_empty() {
            bail!("Gemini returned an empty response");
        }
        debug!(model, "Gemini raw response (first 500 chars): {}", preview(&text, 500));
        Ok(text)
    }

    pub async fn generate_json(
        &self,
        model: &str,
        pdf_bytes: &[u8],
        prompt: &str,
    ) -> anyhow::Result<Value> {
        let text = self.generate_text(model, pdf_bytes, prompt).await?;
        extract_json(&text)
            .with_context(|| format!("unusable JSON from Gemini: {}", tail(&text, 500)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn for_pdf(pdf_bytes: &[u8], prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: PDF_MIME_TYPE.to_string(),
                            data: STANDARD.encode(pdf_bytes),
                        }),
                        text: None,
                    },
                    Part {
                        inline_data: None,
                        text: Some(prompt.to_string()),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Field deserializer for model output: an explicit `null` becomes the default.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

static OUTER_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\})").expect("valid object pattern"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("valid trailing comma pattern"));

/// Recovers a JSON value from model output that may carry code fences,
/// prose around the object, or trailing commas.
pub fn extract_json(text: &str) -> anyhow::Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let Some(found) = OUTER_OBJECT.captures(trimmed).and_then(|caps| caps.get(1)) else {
        bail!("No JSON object found in response");
    };
    let candidate = found.as_str().replace("```json", "").replace("```", "");
    if let Ok(value) = serde_json::from_str(&candidate) {
        return Ok(value);
    }

    let repaired = TRAILING_COMMA.replace_all(&candidate, "$1");
    let value = serde_json::from_str(&repaired).context("response JSON is malformed")?;
    Ok(value)
}

pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}
