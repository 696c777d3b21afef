//! Conversion client: ask a model to turn article HTML into Markdown.
//!
//! The request is always "instruction, then HTML". The response text comes
//! back untouched (no trimming or fence stripping), so what the model said
//! is exactly what gets rendered (unless the caller opts into
//! [`crate::pipeline::postprocess`]).
//!
//! Two backends sit behind [`MarkdownGenerator`]:
//!
//! * [`GeminiClient`]: the Gemini `generateContent` REST call, sending the
//!   instruction and the HTML as two parts of one user turn.
//! * [`ProviderGenerator`]: any `edgequake-llm` provider; those take chat
//!   messages, so instruction and HTML are joined into one user message.
//!
//! There is no retry: a failed call is a failed export.

use crate::config::ModelConfig;
use crate::error::Article2PdfError;
use crate::prompts::single_message_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Instruction plus payload for one conversion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub instruction: String,
    pub html: String,
}

impl ConversionRequest {
    pub fn new(instruction: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            html: html.into(),
        }
    }
}

/// What the model returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    /// Response text, verbatim.
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Something that can turn a [`ConversionRequest`] into Markdown text.
#[async_trait]
pub trait MarkdownGenerator: Send + Sync {
    /// Provider name used in logs and errors.
    fn provider(&self) -> &str;

    /// Model identifier used in logs and errors.
    fn model(&self) -> &str;

    async fn generate(&self, request: &ConversionRequest) -> Result<Generation, Article2PdfError>;
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    timeout_secs: u64,
}

impl GeminiClient {
    /// Create a client with an API key and the default base URL and model.
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = ModelConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: defaults.base_url,
            model: defaults.model,
            temperature: None,
            max_tokens: None,
            timeout_secs: defaults.timeout_secs,
        }
    }

    /// Build from a [`ModelConfig`]; the API key is required.
    pub fn from_config(config: &ModelConfig) -> Result<Self, Article2PdfError> {
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Article2PdfError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: "Set GEMINI_API_KEY (or --api-key), or pick another provider with --provider."
                    .into(),
            })?;

        let mut client = Self::new(key)
            .with_base_url(config.base_url.clone())
            .with_model(config.model.clone())
            .with_timeout_secs(config.timeout_secs);
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    /// Set a custom base URL (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    /// Full `generateContent` URL for the configured model.
    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// JSON body: one user turn with the instruction and the HTML as
    /// separate text parts, in that order.
    pub fn request_body(&self, request: &ConversionRequest) -> Value {
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.instruction },
                    { "text": request.html }
                ]
            }]
        });

        let mut generation = serde_json::Map::new();
        if let Some(t) = self.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(n) = self.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(n));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    fn status_error(
        &self,
        status: StatusCode,
        retry_after: Option<u64>,
        body: String,
    ) -> Article2PdfError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Article2PdfError::AuthError {
                provider: "gemini".into(),
                detail: body,
            },
            // Gemini reports a bad key as 400 with reason API_KEY_INVALID.
            StatusCode::BAD_REQUEST if body.contains("API_KEY_INVALID") => {
                Article2PdfError::AuthError {
                    provider: "gemini".into(),
                    detail: body,
                }
            }
            StatusCode::TOO_MANY_REQUESTS => Article2PdfError::RateLimitExceeded {
                provider: "gemini".into(),
                retry_after_secs: retry_after,
            },
            _ => Article2PdfError::LlmApiError {
                message: format!("Gemini HTTP {status}: {body}"),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Concatenate the text parts of the first candidate.
fn extract_generation(response: GenerateContentResponse) -> Result<Generation, Article2PdfError> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        let feedback = response
            .prompt_feedback
            .map(|f| f.to_string())
            .unwrap_or_else(|| "none".into());
        Article2PdfError::LlmApiError {
            message: format!("Gemini response contained no candidates (prompt feedback: {feedback})"),
        }
    })?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        debug!("Gemini finish reason: {}", reason);
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let (input_tokens, output_tokens) = response
        .usage_metadata
        .map(|u| (u.prompt_token_count, u.candidates_token_count))
        .unwrap_or((0, 0));

    Ok(Generation {
        text,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl MarkdownGenerator for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ConversionRequest) -> Result<Generation, Article2PdfError> {
        let start = Instant::now();
        info!(
            "Sending {} bytes of HTML to gemini/{}",
            request.html.len(),
            self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Article2PdfError::ApiTimeout {
                        provider: "gemini".into(),
                        secs: self.timeout_secs,
                    }
                } else {
                    Article2PdfError::LlmApiError {
                        message: format!("Gemini request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, retry_after, body));
        }

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| Article2PdfError::LlmApiError {
                    message: format!("Malformed Gemini response: {e}"),
                })?;

        let generation = extract_generation(parsed)?;
        debug!(
            "gemini/{}: {} input tokens, {} output tokens, {} chars, {:?}",
            self.model,
            generation.input_tokens,
            generation.output_tokens,
            generation.text.len(),
            start.elapsed()
        );
        Ok(generation)
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Adapter from an `edgequake-llm` chat provider to [`MarkdownGenerator`].
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
    name: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    timeout_secs: u64,
}

impl ProviderGenerator {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        config: &ModelConfig,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarkdownGenerator for ProviderGenerator {
    fn provider(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ConversionRequest) -> Result<Generation, Article2PdfError> {
        let start = Instant::now();
        let prompt = single_message_prompt(&request.instruction, &request.html);
        let messages = vec![ChatMessage::user(prompt.as_str())];
        let options = self.options();
        info!(
            "Sending {} bytes of HTML to {}/{}",
            request.html.len(),
            self.name,
            self.model
        );

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| Article2PdfError::ApiTimeout {
                provider: self.name.clone(),
                secs: self.timeout_secs,
            })?
            .map_err(|e| Article2PdfError::LlmApiError {
                message: format!("{}: {}", self.name, e),
            })?;

        debug!(
            "{}/{}: {} input tokens, {} output tokens, {:?}",
            self.name,
            self.model,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(Generation {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Pick the conversion backend, from most-specific to least-specific:
///
/// 1. a pre-built `edgequake-llm` provider (`config.provider`);
/// 2. a named provider (`config.provider_name`), created through
///    [`ProviderFactory`], except `gemini` with an explicit key, which uses
///    the REST client;
/// 3. the Gemini REST client with `config.api_key`.
pub fn resolve_generator(
    config: &ModelConfig,
) -> Result<Arc<dyn MarkdownGenerator>, Article2PdfError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderGenerator::new(
            Arc::clone(provider),
            config.provider_name.as_deref().unwrap_or("custom"),
            config,
        )));
    }

    if let Some(ref name) = config.provider_name {
        let wants_gemini_rest = name.eq_ignore_ascii_case("gemini") && config.api_key.is_some();
        if !wants_gemini_rest {
            let provider =
                ProviderFactory::create_llm_provider(name.as_str(), config.model.as_str())
                    .map_err(|e| Article2PdfError::ProviderNotConfigured {
                        provider: name.to_string(),
                        hint: format!("{e}"),
                    })?;
            return Ok(Arc::new(ProviderGenerator::new(provider, name.as_str(), config)));
        }
    }

    Ok(Arc::new(GeminiClient::from_config(config)?))
}
