//! Export entry points: article id in, PDF file out.
//!
//! The workflow is strictly sequential, with one attempt per stage:
//!
//! ```text
//! fetch ──▶ convert ──▶ [clean] ──▶ render ──▶ write
//! ```
//!
//! Any stage error ends the run. Nothing is written unless rendering
//! succeeded, and the write itself is atomic, so a failed run never leaves a
//! truncated PDF behind.

use crate::config::ExportConfig;
use crate::error::Article2PdfError;
use crate::output::{ExportOutput, ExportStats};
use crate::pipeline::fetch::{ArticleRecord, ArticleStore, SupabaseStore};
use crate::pipeline::llm::{self, ConversionRequest, MarkdownGenerator};
use crate::pipeline::render::{self, RenderedDocument};
use crate::pipeline::{markdown, postprocess};
use crate::progress::Stage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs the export workflow against a row-store and a Markdown generator.
///
/// [`Exporter::from_config`] wires the Supabase store and the configured
/// model. [`Exporter::new`] accepts any implementations, which is how tests
/// and embedders plug in their own.
pub struct Exporter {
    store: Arc<dyn ArticleStore>,
    generator: Arc<dyn MarkdownGenerator>,
    config: ExportConfig,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        generator: Arc<dyn MarkdownGenerator>,
        config: ExportConfig,
    ) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    /// Build the Supabase store and model client from `config`.
    ///
    /// # Errors
    /// [`Article2PdfError::InvalidConfig`] for a bad store URL or key,
    /// [`Article2PdfError::ProviderNotConfigured`] when no model credentials
    /// are available.
    pub fn from_config(config: ExportConfig) -> Result<Self, Article2PdfError> {
        let store = Arc::new(SupabaseStore::new(&config.store)?);
        let generator = llm::resolve_generator(&config.model)?;
        Ok(Self::new(store, generator, config))
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export one article to `config.output_path`.
    ///
    /// # Errors
    /// The first failing stage's error. See [`Article2PdfError`].
    pub async fn export(&self, article_id: &str) -> Result<ExportOutput, Article2PdfError> {
        let total_start = Instant::now();
        info!(
            "Exporting article '{}' with {}/{}",
            article_id,
            self.generator.provider(),
            self.generator.model()
        );

        // ── Step 1: Fetch ────────────────────────────────────────────────
        self.stage_start(Stage::Fetch);
        let fetch_start = Instant::now();
        let record = self.store.fetch_article(article_id).await?;
        let fetch_ms = elapsed_ms(fetch_start);
        self.stage_complete(Stage::Fetch, fetch_ms);
        info!(
            "Fetched {} bytes of HTML in {}ms",
            record.content_text.len(),
            fetch_ms
        );

        if record.content_text.trim().is_empty() {
            if self.config.strict {
                return Err(Article2PdfError::EmptyContent {
                    article_id: article_id.to_string(),
                });
            }
            warn!("Article '{}' has empty content", article_id);
        }

        // ── Step 2: Convert ──────────────────────────────────────────────
        self.stage_start(Stage::Convert);
        let convert_start = Instant::now();
        let request = ConversionRequest::new(self.config.instruction(), record.content_text.as_str());
        let generation = self.generator.generate(&request).await?;
        let convert_ms = elapsed_ms(convert_start);
        self.stage_complete(Stage::Convert, convert_ms);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_generation(&generation.text);
        }
        debug!("Raw model response is {} bytes", generation.text.len());
        info!(
            "Model returned {} bytes in {}ms ({} in / {} out tokens)",
            generation.text.len(),
            convert_ms,
            generation.input_tokens,
            generation.output_tokens
        );

        if generation.text.trim().is_empty() {
            if self.config.strict {
                return Err(Article2PdfError::EmptyResponse {
                    model: self.generator.model().to_string(),
                });
            }
            warn!("Model returned an empty response; rendering an empty document");
        }

        let markdown = if self.config.clean_markdown {
            postprocess::clean_markdown(&generation.text)
        } else {
            generation.text
        };

        // ── Step 3: Render + write ───────────────────────────────────────
        let title = document_title(&self.config, Some(&record), &markdown);
        let written = render_and_write(&markdown, &title, &self.config).await?;

        let stats = ExportStats {
            html_bytes: record.content_text.len(),
            markdown_bytes: markdown.len(),
            pdf_bytes: written.document.bytes.len(),
            page_count: written.document.page_count,
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
            fetch_ms,
            convert_ms,
            render_ms: written.render_ms,
            write_ms: written.write_ms,
            total_ms: elapsed_ms(total_start),
        };
        info!(
            "Export complete: {} page(s) → {} in {}ms",
            stats.page_count,
            self.config.output_path.display(),
            stats.total_ms
        );

        Ok(ExportOutput {
            article_id: record.article_id,
            title,
            markdown,
            toc: written.document.toc,
            output_path: self.config.output_path.clone(),
            stats,
        })
    }

    fn stage_start(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
    }

    fn stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, elapsed_ms);
        }
    }
}

/// Export one article using the store and model described by `config`.
///
/// This is the primary entry point for the library.
///
/// ```rust,no_run
/// use article2pdf::{export_article, ExportConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExportConfig::builder()
///     .store_url("https://xyzcompany.supabase.co")
///     .store_key("anon-key")
///     .api_key("gemini-key")
///     .build()?;
/// let output = export_article("abc-123", &config).await?;
/// println!("{} pages", output.stats.page_count);
/// # Ok(())
/// # }
/// ```
pub async fn export_article(
    article_id: &str,
    config: &ExportConfig,
) -> Result<ExportOutput, Article2PdfError> {
    Exporter::from_config(config.clone())?.export(article_id).await
}

/// Synchronous wrapper around [`export_article`].
///
/// Creates a temporary tokio runtime internally.
pub fn export_article_sync(
    article_id: &str,
    config: &ExportConfig,
) -> Result<ExportOutput, Article2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Article2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(export_article(article_id, config))
}

/// Render Markdown that is already at hand, skipping fetch and conversion.
///
/// Needs neither row-store nor model credentials.
pub async fn render_markdown_to_file(
    markdown: &str,
    config: &ExportConfig,
) -> Result<ExportOutput, Article2PdfError> {
    let total_start = Instant::now();
    let markdown = if config.clean_markdown {
        postprocess::clean_markdown(markdown)
    } else {
        markdown.to_string()
    };
    let title = document_title(config, None, &markdown);
    let written = render_and_write(&markdown, &title, config).await?;

    let stats = ExportStats {
        markdown_bytes: markdown.len(),
        pdf_bytes: written.document.bytes.len(),
        page_count: written.document.page_count,
        render_ms: written.render_ms,
        write_ms: written.write_ms,
        total_ms: elapsed_ms(total_start),
        ..ExportStats::default()
    };

    Ok(ExportOutput {
        article_id: String::new(),
        title,
        markdown,
        toc: written.document.toc,
        output_path: config.output_path.clone(),
        stats,
    })
}

/// Write `bytes` to `path` atomically, replacing any existing file.
///
/// The bytes go to a temp file in the destination directory first and are
/// renamed over `path`, so readers never observe a partial PDF.
pub fn write_pdf_atomic(path: &Path, bytes: &[u8]) -> Result<(), Article2PdfError> {
    let write_err = |source: std::io::Error| Article2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

// ── Internals ─────────────────────────────────────────────────────────────

struct Written {
    document: RenderedDocument,
    render_ms: u64,
    write_ms: u64,
}

async fn render_and_write(
    markdown: &str,
    title: &str,
    config: &ExportConfig,
) -> Result<Written, Article2PdfError> {
    let notify_start = |stage| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_stage_start(stage);
        }
    };
    let notify_done = |stage, ms| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_stage_complete(stage, ms);
        }
    };

    notify_start(Stage::Render);
    let render_start = Instant::now();
    let (md, ttl, toc_level, sheet) = (
        markdown.to_string(),
        title.to_string(),
        config.toc_level,
        config.stylesheet.clone(),
    );
    let document = tokio::task::spawn_blocking(move || {
        render::render_pdf(&md, &ttl, toc_level, &sheet)
    })
    .await
    .map_err(|e| Article2PdfError::Internal(format!("Render task panicked: {}", e)))??;
    let render_ms = elapsed_ms(render_start);
    notify_done(Stage::Render, render_ms);

    notify_start(Stage::Write);
    let write_start = Instant::now();
    let path = config.output_path.clone();
    let bytes = document.bytes.clone();
    tokio::task::spawn_blocking(move || write_pdf_atomic(&path, &bytes))
        .await
        .map_err(|e| Article2PdfError::Internal(format!("Write task panicked: {}", e)))??;
    let write_ms = elapsed_ms(write_start);
    notify_done(Stage::Write, write_ms);

    if let Some(ref cb) = config.progress_callback {
        cb.on_export_complete(&config.output_path, document.page_count);
    }

    Ok(Written {
        document,
        render_ms,
        write_ms,
    })
}

/// Configured title, else the row's title, else the first `#` heading, else
/// the article id.
fn document_title(config: &ExportConfig, record: Option<&ArticleRecord>, md: &str) -> String {
    if let Some(title) = config.title.as_ref().filter(|t| !t.trim().is_empty()) {
        return title.clone();
    }
    if let Some(title) = record.and_then(|r| r.title.clone()) {
        return title;
    }
    if let Some(heading) = markdown::parse_blocks(md)
        .ok()
        .and_then(|blocks| markdown::first_heading(&blocks))
    {
        return heading;
    }
    record
        .map(|r| r.article_id.clone())
        .unwrap_or_else(|| "Untitled".to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
