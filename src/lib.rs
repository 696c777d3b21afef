//! # article2pdf
//!
//! Export a stored HTML article as a styled PDF, using a language model to
//! turn the HTML into Markdown first.
//!
//! ## Why go through Markdown?
//!
//! Article bodies in a CMS are whatever HTML the editor produced: inline
//! styles, wrapper `<div>`s, tracking pixels. Laying that out faithfully needs
//! a browser engine. Asking a model to rewrite it as clean Markdown keeps the
//! semantic structure (headings, lists, tables, code) and drops the noise, so
//! a small deterministic renderer can produce a consistent-looking PDF with a
//! proper outline.
//!
//! ## Pipeline Overview
//!
//! ```text
//! article id
//!  │
//!  ├─ 1. Fetch    one row from the Supabase (PostgREST) row-store
//!  ├─ 2. Convert  instruction + HTML → Markdown (Gemini REST, or any
//!  │              edgequake-llm provider)
//!  ├─ 3. Clean    optional deterministic fixes (--clean)
//!  ├─ 4. Render   GFM → paginated A4 PDF with nested outline (spawn_blocking)
//!  └─ 5. Write    atomic replace of the output file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use article2pdf::{export_article, ExportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExportConfig::builder()
//!         .store_url("https://xyzcompany.supabase.co")
//!         .store_key(std::env::var("SUPABASE_ANON_KEY")?)
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .output_path("article.pdf")
//!         .build()?;
//!     let output = export_article("abc-123", &config).await?;
//!     for entry in &output.toc {
//!         println!("{} {} (p. {})", "#".repeat(entry.level as usize), entry.title, entry.page);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `article2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! article2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod style;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExportConfig, ExportConfigBuilder, ModelConfig, StoreConfig};
pub use convert::{
    export_article, export_article_sync, render_markdown_to_file, write_pdf_atomic, Exporter,
};
pub use error::Article2PdfError;
pub use output::{ExportOutput, ExportStats};
pub use pipeline::fetch::{ArticleRecord, ArticleStore, SupabaseStore};
pub use pipeline::llm::{
    ConversionRequest, GeminiClient, Generation, MarkdownGenerator, ProviderGenerator,
};
pub use pipeline::outline::{read_outline, OutlineNode, TocEntry};
pub use pipeline::render::{render_pdf, RenderedDocument};
pub use progress::{ExportProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use style::{RgbColor, Stylesheet};
