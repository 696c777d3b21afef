//! Result types returned by an export.

use crate::pipeline::outline::TocEntry;
use serde::Serialize;
use std::path::PathBuf;

/// Everything an export produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub article_id: String,
    /// Title written into the PDF metadata.
    pub title: String,
    /// Markdown that was rendered (the model response, cleaned if requested).
    pub markdown: String,
    /// Outline entries emitted into the PDF.
    pub toc: Vec<TocEntry>,
    pub output_path: PathBuf,
    pub stats: ExportStats,
}

/// Sizes, token usage and per-stage timings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStats {
    /// Size of the fetched HTML in bytes (0 when rendering a local file).
    pub html_bytes: usize,
    pub markdown_bytes: usize,
    pub pdf_bytes: usize,
    pub page_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub fetch_ms: u64,
    pub convert_ms: u64,
    pub render_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_to_flat_json() {
        let out = ExportOutput {
            article_id: "abc-123".into(),
            title: "Title".into(),
            markdown: "# Title\n\nHello".into(),
            toc: vec![TocEntry {
                level: 1,
                title: "Title".into(),
                page: 1,
            }],
            output_path: PathBuf::from("output.pdf"),
            stats: ExportStats {
                page_count: 1,
                ..ExportStats::default()
            },
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["article_id"], "abc-123");
        assert_eq!(json["toc"][0]["page"], 1);
        assert_eq!(json["stats"]["page_count"], 1);
        assert_eq!(json["output_path"], "output.pdf");
    }
}
