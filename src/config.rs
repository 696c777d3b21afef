//! Configuration types for an article export.
//!
//! Everything the pipeline needs (endpoints, keys, output path and
//! stylesheet) lives in [`ExportConfig`], built via
//! [`ExportConfigBuilder`]. Nothing is hardcoded in the pipeline itself; the
//! CLI fills the builder from flags and environment variables.

use crate::error::Article2PdfError;
use crate::progress::ProgressCallback;
use crate::style::Stylesheet;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default Gemini REST base URL.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default output file, relative to the working directory.
pub const DEFAULT_OUTPUT_PATH: &str = "output.pdf";

/// Deepest heading level that gets a table-of-contents entry by default.
pub const DEFAULT_TOC_LEVEL: u8 = 2;

/// Connection parameters for the PostgREST row-store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Project URL, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    /// Anonymous (or service) key, sent as `apikey` and bearer token.
    pub api_key: String,
    /// Table to query. Default: `articles`.
    pub table: String,
    /// Column matched with equality against the article id. Default: `article_id`.
    pub id_column: String,
    /// Column holding the article HTML. Default: `content_text`.
    pub content_column: String,
    /// Optional column used as the PDF title. Default: `article_name`.
    pub title_column: Option<String>,
    /// HTTP timeout for the single select request. Default: 120.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            table: "articles".into(),
            id_column: "article_id".into(),
            content_column: "content_text".into(),
            title_column: Some("article_name".into()),
            timeout_secs: 120,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("content_column", &self.content_column)
            .field("title_column", &self.title_column)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Which model converts the HTML, and how to reach it.
#[derive(Clone)]
pub struct ModelConfig {
    /// Model identifier. Default: `gemini-2.0-flash`.
    pub model: String,

    /// Gemini API key. Required unless `provider` or `provider_name` is set.
    pub api_key: Option<String>,

    /// Gemini REST base URL (overridable for proxies and tests).
    pub base_url: String,

    /// edgequake-llm provider name (`openai`, `anthropic`, `ollama`, …).
    /// When set, the request goes through that provider instead of the
    /// built-in Gemini client; its API key comes from the provider's usual
    /// environment variable.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom instruction. If None, uses [`crate::prompts::DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Sampling temperature. None leaves the API default in place.
    pub temperature: Option<f32>,

    /// Output token cap. None leaves the API default in place.
    pub max_tokens: Option<usize>,

    /// Timeout for the model call in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            api_key: None,
            base_url: DEFAULT_GEMINI_BASE_URL.into(),
            provider_name: None,
            provider: None,
            instruction: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("base_url", &self.base_url)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("instruction", &self.instruction.as_ref().map(|i| i.len()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Configuration for one article export.
///
/// Built via [`ExportConfig::builder()`] or [`ExportConfig::default()`].
///
/// # Example
/// ```rust
/// use article2pdf::ExportConfig;
///
/// let config = ExportConfig::builder()
///     .store_url("https://xyzcompany.supabase.co")
///     .store_key("anon-key")
///     .api_key("gemini-key")
///     .output_path("article.pdf")
///     .build()
///     .unwrap();
/// assert_eq!(config.toc_level, 2);
/// ```
#[derive(Clone)]
pub struct ExportConfig {
    pub store: StoreConfig,
    pub model: ModelConfig,

    /// Where the PDF is written. Existing files are replaced. Default: `output.pdf`.
    pub output_path: PathBuf,

    /// Deepest heading level listed in the PDF outline. 0 disables it. Default: 2.
    pub toc_level: u8,

    pub stylesheet: Stylesheet,

    /// PDF document title. If None, the row's title column, then the first
    /// heading, is used.
    pub title: Option<String>,

    /// Reject empty article content and empty model responses. Default: false.
    pub strict: bool,

    /// Run the deterministic Markdown clean-up passes before rendering.
    /// Default: false (the model response is rendered verbatim).
    pub clean_markdown: bool,

    /// Optional stage-progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            model: ModelConfig::default(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            toc_level: DEFAULT_TOC_LEVEL,
            stylesheet: Stylesheet::default(),
            title: None,
            strict: false,
            clean_markdown: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("store", &self.store)
            .field("model", &self.model)
            .field("output_path", &self.output_path)
            .field("toc_level", &self.toc_level)
            .field("title", &self.title)
            .field("strict", &self.strict)
            .field("clean_markdown", &self.clean_markdown)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExportProgressCallback>"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction actually sent to the model.
    pub fn instruction(&self) -> &str {
        self.model
            .instruction
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_INSTRUCTION)
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store.url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn store_key(mut self, key: impl Into<String>) -> Self {
        self.config.store.api_key = key.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.store.table = table.into();
        self
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.config.store.id_column = column.into();
        self
    }

    pub fn content_column(mut self, column: impl Into<String>) -> Self {
        self.config.store.content_column = column.into();
        self
    }

    pub fn title_column(mut self, column: Option<String>) -> Self {
        self.config.store.title_column = column;
        self
    }

    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store.timeout_secs = secs.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.model.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.model.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.model.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.model.provider = Some(provider);
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.model.instruction = Some(instruction.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.model.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.model.max_tokens = Some(n);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model.timeout_secs = secs.max(1);
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn toc_level(mut self, level: u8) -> Self {
        self.config.toc_level = level.min(6);
        self
    }

    pub fn stylesheet(mut self, sheet: Stylesheet) -> Self {
        self.config.stylesheet = sheet;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn strict(mut self, v: bool) -> Self {
        self.config.strict = v;
        self
    }

    pub fn clean_markdown(mut self, v: bool) -> Self {
        self.config.clean_markdown = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, Article2PdfError> {
        let c = &self.config;
        if c.output_path.as_os_str().is_empty() {
            return Err(Article2PdfError::InvalidConfig(
                "Output path must not be empty".into(),
            ));
        }
        let page = &c.stylesheet.page;
        if page.margin_mm < 0.0 || page.margin_mm * 2.0 >= page.width_mm.min(page.height_mm) {
            return Err(Article2PdfError::InvalidConfig(format!(
                "Page margin {}mm leaves no room on a {}×{}mm page",
                page.margin_mm, page.width_mm, page.height_mm
            )));
        }
        if c.stylesheet.body.font_size_pt <= 0.0 || c.stylesheet.body.line_height <= 0.0 {
            return Err(Article2PdfError::InvalidConfig(
                "Body font size and line height must be positive".into(),
            ));
        }
        if c.model.model.trim().is_empty() {
            return Err(Article2PdfError::InvalidConfig("Model must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// Keep the first four characters of a secret for log correlation.
fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…")
}
