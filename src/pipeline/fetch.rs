//! Content fetcher: read one article row from a PostgREST row-store.
//!
//! Supabase exposes every table through PostgREST, so a single equality
//! select is a plain HTTP GET:
//!
//! ```text
//! GET {url}/rest/v1/{table}?select=*&{id_column}=eq.{article_id}
//! apikey: {key}
//! Authorization: Bearer {key}
//! ```
//!
//! The response is a JSON array of rows. The first row wins; an empty array
//! is an error, never a default.

use crate::config::StoreConfig;
use crate::error::Article2PdfError;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// The parts of an article row the exporter uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub article_id: String,
    /// Raw HTML body, exactly as stored.
    pub content_text: String,
    /// Value of the configured title column, when present and a string.
    pub title: Option<String>,
}

/// Source of article rows. Implemented by [`SupabaseStore`]; tests and
/// embedders can supply their own.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Fetch the article with the given id.
    ///
    /// # Errors
    /// [`Article2PdfError::ArticleNotFound`] when no row matches.
    async fn fetch_article(&self, article_id: &str) -> Result<ArticleRecord, Article2PdfError>;
}

/// PostgREST (Supabase) implementation of [`ArticleStore`].
pub struct SupabaseStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl SupabaseStore {
    /// Create a store client, validating the URL and key.
    pub fn new(config: &StoreConfig) -> Result<Self, Article2PdfError> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(Article2PdfError::InvalidConfig(format!(
                "Row-store URL must be http(s), got '{}'. Set --store-url or SUPABASE_URL.",
                config.url
            )));
        }
        if config.api_key.is_empty() {
            return Err(Article2PdfError::InvalidConfig(
                "Row-store key is empty. Set --store-key or SUPABASE_ANON_KEY.".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Article2PdfError::StoreRequestFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Endpoint for the configured table.
    pub fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url, self.config.table)
    }
}

#[async_trait]
impl ArticleStore for SupabaseStore {
    async fn fetch_article(&self, article_id: &str) -> Result<ArticleRecord, Article2PdfError> {
        let url = self.table_url();
        let filter = format!("eq.{article_id}");
        info!("Fetching article '{}' from {}", article_id, url);

        let response = self
            .client
            .get(&url)
            .query(&[("select", "*"), (self.config.id_column.as_str(), filter.as_str())])
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Article2PdfError::StoreRequestFailed {
                url: url.clone(),
                reason: if e.is_timeout() {
                    format!("timed out after {}s", self.config.timeout_secs)
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Article2PdfError::StoreRequestFailed {
                url,
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let rows: Vec<Map<String, Value>> =
            response
                .json()
                .await
                .map_err(|e| Article2PdfError::StoreResponseInvalid {
                    detail: e.to_string(),
                })?;
        debug!("Row-store returned {} row(s)", rows.len());

        record_from_rows(article_id, rows, &self.config)
    }
}

/// Pick the first row and pull the content (and optional title) out of it.
pub fn record_from_rows(
    article_id: &str,
    rows: Vec<Map<String, Value>>,
    config: &StoreConfig,
) -> Result<ArticleRecord, Article2PdfError> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| Article2PdfError::ArticleNotFound {
            article_id: article_id.to_string(),
            table: config.table.clone(),
        })?;

    let content_text = match row.get(&config.content_column) {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(Article2PdfError::MissingContent {
                article_id: article_id.to_string(),
                column: config.content_column.clone(),
            })
        }
    };

    let title = config
        .title_column
        .as_ref()
        .and_then(|col| row.get(col))
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty());

    Ok(ArticleRecord {
        article_id: article_id.to_string(),
        content_text,
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn first_row_content_is_returned_unmodified() {
        let html = "  <h1>Title</h1>\n<p>Hello</p>  ";
        let rec = record_from_rows(
            "abc-123",
            rows(json!([
                { "article_id": "abc-123", "content_text": html, "article_name": "Title" },
                { "article_id": "abc-123", "content_text": "<p>second</p>" }
            ])),
            &StoreConfig::default(),
        )
        .unwrap();
        assert_eq!(rec.content_text, html);
        assert_eq!(rec.title.as_deref(), Some("Title"));
    }

    #[test]
    fn empty_result_is_not_found() {
        let err = record_from_rows("missing", Vec::new(), &StoreConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Article2PdfError::ArticleNotFound { ref article_id, .. } if article_id == "missing"
        ));
    }

    #[test]
    fn null_or_absent_content_is_missing_content() {
        let cfg = StoreConfig::default();
        let err = record_from_rows("a", rows(json!([{ "content_text": null }])), &cfg).unwrap_err();
        assert!(matches!(err, Article2PdfError::MissingContent { .. }));
        let err = record_from_rows("a", rows(json!([{ "other": "x" }])), &cfg).unwrap_err();
        assert!(matches!(err, Article2PdfError::MissingContent { .. }));
    }

    #[test]
    fn empty_content_passes_through() {
        let rec = record_from_rows(
            "a",
            rows(json!([{ "content_text": "" }])),
            &StoreConfig::default(),
        )
        .unwrap();
        assert_eq!(rec.content_text, "");
        assert_eq!(rec.title, None);
    }

    #[test]
    fn custom_columns_are_honoured() {
        let cfg = StoreConfig {
            content_column: "body_html".into(),
            title_column: None,
            ..StoreConfig::default()
        };
        let rec = record_from_rows(
            "a",
            rows(json!([{ "body_html": "<p>x</p>", "article_name": "ignored" }])),
            &cfg,
        )
        .unwrap();
        assert_eq!(rec.content_text, "<p>x</p>");
        assert_eq!(rec.title, None);
    }

    #[test]
    fn new_rejects_bad_url_and_empty_key() {
        let cfg = StoreConfig {
            url: "ftp://nope".into(),
            api_key: "k".into(),
            ..StoreConfig::default()
        };
        assert!(SupabaseStore::new(&cfg).is_err());

        let cfg = StoreConfig {
            url: "https://x.supabase.co".into(),
            ..StoreConfig::default()
        };
        assert!(SupabaseStore::new(&cfg).is_err());
    }

    #[test]
    fn table_url_joins_rest_path() {
        let cfg = StoreConfig {
            url: "https://x.supabase.co".into(),
            api_key: "k".into(),
            ..StoreConfig::default()
        };
        let store = SupabaseStore::new(&cfg).unwrap();
        assert_eq!(store.table_url(), "https://x.supabase.co/rest/v1/articles");
    }
}
