//! Error type for the article2pdf library.
//!
//! Every failure is fatal: the export is a single fetch → convert → render
//! chain and there is nothing useful to salvage once one link breaks. The
//! variants are grouped by the stage that produced them so callers (and the
//! CLI's `anyhow` context chain) can tell a missing row from a bad API key
//! from a full disk.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the article2pdf library.
#[derive(Debug, Error)]
pub enum Article2PdfError {
    // ── Row-store errors ──────────────────────────────────────────────────
    /// No row in the table matched the requested id.
    #[error("Article '{article_id}' not found in table '{table}'")]
    ArticleNotFound { article_id: String, table: String },

    /// The matching row has no usable content column.
    #[error("Article '{article_id}' has no text in column '{column}'")]
    MissingContent { article_id: String, column: String },

    /// Strict mode: the content column exists but is empty.
    #[error("Article '{article_id}' has empty content (strict mode)")]
    EmptyContent { article_id: String },

    /// The HTTP request to the row-store failed or returned non-2xx.
    #[error("Row-store request to '{url}' failed: {reason}")]
    StoreRequestFailed { url: String, reason: String },

    /// The row-store answered 2xx but the body was not a JSON row array.
    #[error("Row-store returned an unreadable response: {detail}")]
    StoreResponseInvalid { detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error or a response without text.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model API returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The model API call did not finish within the configured timeout.
    #[error("API call to '{provider}' timed out after {secs}s")]
    ApiTimeout { provider: String, secs: u64 },

    /// The model API rejected the credentials (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// Strict mode: the model answered with no text.
    #[error("Model '{model}' returned an empty response (strict mode)")]
    EmptyResponse { model: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The Markdown parser rejected the input.
    #[error("Failed to parse Markdown: {0}")]
    MarkdownParse(String),

    /// printpdf failed while building or serialising the document.
    #[error("PDF rendering failed: {0}")]
    PdfRender(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_id_and_table() {
        let e = Article2PdfError::ArticleNotFound {
            article_id: "abc-123".into(),
            table: "articles".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("abc-123"), "got: {msg}");
        assert!(msg.contains("articles"), "got: {msg}");
    }

    #[test]
    fn auth_error_display() {
        let e = Article2PdfError::AuthError {
            provider: "gemini".into(),
            detail: "API key not valid".into(),
        };
        assert!(e.to_string().contains("gemini"));
        assert!(e.to_string().contains("API key not valid"));
    }

    #[test]
    fn output_write_failed_keeps_source() {
        use std::error::Error as _;
        let e = Article2PdfError::OutputWriteFailed {
            path: PathBuf::from("/read-only/output.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("/read-only/output.pdf"));
        assert!(e.source().is_some());
    }

    #[test]
    fn api_timeout_display() {
        let e = Article2PdfError::ApiTimeout {
            provider: "gemini".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }
}
