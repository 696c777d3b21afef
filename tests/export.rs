//! Integration tests for the export workflow.
//!
//! The row-store (PostgREST) and the Gemini API are both served by
//! `wiremock`, so these run offline. The live test at the bottom is gated
//! behind `E2E_ENABLED` and talks to the real services.
//!
//! Run with:
//!   cargo test --test export -- --nocapture

use article2pdf::{
    read_outline, Article2PdfError, ArticleRecord, ArticleStore, ConversionRequest, ExportConfig,
    ExportProgressCallback, Exporter, GeminiClient, Generation, MarkdownGenerator, OutlineNode,
    Stage, StoreConfig, SupabaseStore, TocEntry,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-2.0-flash";
const GEMINI_PATH: &str = "/models/gemini-2.0-flash:generateContent";

// ── Test helpers ─────────────────────────────────────────────────────────────

async fn mount_article(server: &MockServer, id: &str, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/articles"))
        .and(query_param("select", "*"))
        .and(query_param("article_id", format!("eq.{id}").as_str()))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

fn gemini_reply(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }],
        "usageMetadata": { "promptTokenCount": 42, "candidatesTokenCount": 7 }
    })
}

async fn mount_gemini(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "gemini-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(text)))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, output: &Path) -> ExportConfig {
    ExportConfig::builder()
        .store_url(server.uri())
        .store_key("anon-key")
        .api_key("gemini-key")
        .api_base_url(server.uri())
        .model(MODEL)
        .output_path(output)
        .build()
        .unwrap()
}

fn store_config(server: &MockServer) -> StoreConfig {
    StoreConfig {
        url: server.uri(),
        api_key: "anon-key".into(),
        ..StoreConfig::default()
    }
}

/// Records every progress event as a string.
#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl ExportProgressCallback for Recorder {
    fn on_stage_start(&self, stage: Stage) {
        self.0.lock().unwrap().push(format!("start:{stage}"));
    }
    fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
        self.0.lock().unwrap().push(format!("done:{stage}"));
    }
    fn on_generation(&self, raw_markdown: &str) {
        self.0.lock().unwrap().push(format!("generation:{raw_markdown}"));
    }
    fn on_export_complete(&self, _path: &Path, page_count: usize) {
        self.0.lock().unwrap().push(format!("complete:{page_count}"));
    }
}

// ── Fetcher ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_returns_stored_content_verbatim() {
    let server = MockServer::start().await;
    let html = "<h1>Title</h1>\n<p>Hello &amp; welcome</p>  ";
    mount_article(
        &server,
        "abc-123",
        json!([{ "article_id": "abc-123", "content_text": html, "article_name": "Title" }]),
    )
    .await;

    let store = SupabaseStore::new(&store_config(&server)).unwrap();
    let record = store.fetch_article("abc-123").await.unwrap();
    assert_eq!(record.content_text, html);
    assert_eq!(record.title.as_deref(), Some("Title"));
}

#[tokio::test]
async fn fetch_with_no_rows_is_article_not_found() {
    let server = MockServer::start().await;
    mount_article(&server, "missing", json!([])).await;

    let store = SupabaseStore::new(&store_config(&server)).unwrap();
    let err = store.fetch_article("missing").await.unwrap_err();
    assert!(
        matches!(err, Article2PdfError::ArticleNotFound { ref article_id, ref table }
            if article_id == "missing" && table == "articles"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn fetch_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/articles"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"message":"Invalid API key"}"#))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&store_config(&server)).unwrap();
    let err = store.fetch_article("abc-123").await.unwrap_err();
    match err {
        Article2PdfError::StoreRequestFailed { reason, .. } => {
            assert!(reason.contains("401"), "reason: {reason}");
            assert!(reason.contains("Invalid API key"), "reason: {reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ── Conversion client ────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_receives_instruction_then_html_and_returns_text_verbatim() {
    let server = MockServer::start().await;
    let reply = "```markdown\n# Title\n\nHello\n```";
    mount_gemini(&server, reply).await;

    let client = GeminiClient::new("gemini-key").with_base_url(server.uri()).with_model(MODEL);
    let html = "<h1>Title</h1><p>Hello</p>";
    let generation = client
        .generate(&ConversionRequest::new("Convert to Markdown.", html))
        .await
        .unwrap();

    // No clean-up on the client path: fences and all.
    assert_eq!(generation.text, reply);
    assert_eq!((generation.input_tokens, generation.output_tokens), (42, 7));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let parts = &body["contents"][0]["parts"];
    assert_eq!(parts[0]["text"], "Convert to Markdown.");
    assert_eq!(parts[1]["text"], html);
    assert_eq!(parts.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn gemini_multi_part_response_is_concatenated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "# A\n\n" }, { "text": "body" }] } }]
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::new("k").with_base_url(server.uri()).with_model(MODEL);
    let generation = client.generate(&ConversionRequest::new("i", "h")).await.unwrap();
    assert_eq!(generation.text, "# A\n\nbody");
    assert_eq!(generation.input_tokens, 0);
}

#[tokio::test]
async fn gemini_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let client = GeminiClient::new("k").with_base_url(server.uri()).with_model(MODEL);
    let err = client.generate(&ConversionRequest::new("i", "h")).await.unwrap_err();
    assert!(
        matches!(err, Article2PdfError::RateLimitExceeded { retry_after_secs: Some(7), .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn gemini_bad_key_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "status": "INVALID_ARGUMENT",
                       "details": [{ "reason": "API_KEY_INVALID" }] }
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::new("bad").with_base_url(server.uri()).with_model(MODEL);
    let err = client.generate(&ConversionRequest::new("i", "h")).await.unwrap_err();
    assert!(matches!(err, Article2PdfError::AuthError { .. }), "unexpected error: {err}");
}

// ── Full workflow ────────────────────────────────────────────────────────────

#[tokio::test]
async fn article_becomes_one_page_pdf_with_single_toc_entry() {
    let server = MockServer::start().await;
    mount_article(
        &server,
        "abc-123",
        json!([{ "article_id": "abc-123", "content_text": "<h1>Title</h1><p>Hello</p>" }]),
    )
    .await;
    mount_gemini(&server, "# Title\n\nHello").await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let exporter = Exporter::from_config(config_for(&server, &out_path)).unwrap();

    let output = exporter.export("abc-123").await.unwrap();

    assert_eq!(output.markdown, "# Title\n\nHello");
    assert_eq!(output.title, "Title");
    assert_eq!(
        output.toc,
        vec![TocEntry {
            level: 1,
            title: "Title".into(),
            page: 1
        }]
    );
    assert_eq!(output.stats.page_count, 1);
    assert_eq!(output.stats.html_bytes, "<h1>Title</h1><p>Hello</p>".len());
    assert_eq!(output.stats.input_tokens, 42);

    let bytes = std::fs::read(&out_path).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(bytes.len(), output.stats.pdf_bytes);
    assert_eq!(
        read_outline(&bytes).unwrap(),
        vec![OutlineNode {
            depth: 1,
            title: "Title".into(),
            page: Some(1)
        }]
    );

    // The HTML travelled to the model untouched, after the instruction.
    let requests = server.received_requests().await.unwrap();
    let gemini = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("no model request");
    let body: Value = serde_json::from_slice(&gemini.body).unwrap();
    assert_eq!(
        body["contents"][0]["parts"][0]["text"],
        exporter.config().instruction()
    );
    assert_eq!(
        body["contents"][0]["parts"][1]["text"],
        "<h1>Title</h1><p>Hello</p>"
    );
}

#[tokio::test]
async fn running_twice_overwrites_the_output() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let article = json!([{ "article_id": "abc-123", "content_text": "<p>x</p>" }]);

    mount_article(&server, "abc-123", article.clone()).await;
    mount_gemini(&server, "# First\n\none").await;
    let first = Exporter::from_config(config_for(&server, &out_path))
        .unwrap()
        .export("abc-123")
        .await
        .unwrap();
    assert_eq!(first.toc[0].title, "First");

    server.reset().await;
    mount_article(&server, "abc-123", article).await;
    mount_gemini(&server, "# Second\n\ntwo\n\n## More\n\nthree").await;
    let second = Exporter::from_config(config_for(&server, &out_path))
        .unwrap()
        .export("abc-123")
        .await
        .unwrap();
    let titles: Vec<&str> = second.toc.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Second", "More"]);

    let bytes = std::fs::read(&out_path).unwrap();
    assert_eq!(bytes.len(), second.stats.pdf_bytes);
    let entries: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![out_path]);
}

#[tokio::test]
async fn strict_mode_rejects_empty_content_before_calling_the_model() {
    let server = MockServer::start().await;
    mount_article(&server, "blank", json!([{ "content_text": "   " }])).await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("x")))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let mut config = config_for(&server, &out_path);
    config.strict = true;

    let err = Exporter::from_config(config)
        .unwrap()
        .export("blank")
        .await
        .unwrap_err();
    assert!(matches!(err, Article2PdfError::EmptyContent { .. }), "unexpected error: {err}");
    assert!(!out_path.exists());
}

#[tokio::test]
async fn strict_mode_rejects_empty_model_response() {
    let server = MockServer::start().await;
    mount_article(&server, "abc-123", json!([{ "content_text": "<p>x</p>" }])).await;
    mount_gemini(&server, "  \n").await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let mut config = config_for(&server, &out_path);
    config.strict = true;

    let err = Exporter::from_config(config)
        .unwrap()
        .export("abc-123")
        .await
        .unwrap_err();
    assert!(
        matches!(err, Article2PdfError::EmptyResponse { ref model } if model == MODEL),
        "unexpected error: {err}"
    );
    assert!(!out_path.exists());
}

#[tokio::test]
async fn lenient_mode_renders_empty_content() {
    let server = MockServer::start().await;
    mount_article(&server, "blank", json!([{ "content_text": "" }])).await;
    mount_gemini(&server, "").await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let output = Exporter::from_config(config_for(&server, &out_path))
        .unwrap()
        .export("blank")
        .await
        .unwrap();
    assert_eq!(output.stats.page_count, 1);
    assert!(output.toc.is_empty());
    assert_eq!(output.title, "blank");
    assert!(out_path.exists());
}

#[tokio::test]
async fn missing_article_writes_nothing() {
    let server = MockServer::start().await;
    mount_article(&server, "nope", json!([])).await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let err = Exporter::from_config(config_for(&server, &out_path))
        .unwrap()
        .export("nope")
        .await
        .unwrap_err();
    assert!(matches!(err, Article2PdfError::ArticleNotFound { .. }));
    assert!(!out_path.exists());
}

#[tokio::test]
async fn clean_option_strips_outer_fence() {
    let server = MockServer::start().await;
    mount_article(&server, "abc-123", json!([{ "content_text": "<h1>T</h1>" }])).await;
    mount_gemini(&server, "```markdown\n# T\n```").await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, &dir.path().join("o.pdf"));
    config.clean_markdown = true;

    let output = Exporter::from_config(config)
        .unwrap()
        .export("abc-123")
        .await
        .unwrap();
    assert_eq!(output.markdown, "# T\n");
    assert_eq!(output.toc.len(), 1);
}

#[tokio::test]
async fn raw_response_is_reported_before_clean_up_and_write() {
    let server = MockServer::start().await;
    mount_article(&server, "abc-123", json!([{ "content_text": "<h1>T</h1>" }])).await;
    let raw = "```markdown\n# T\n```";
    mount_gemini(&server, raw).await;

    // The output path is an existing directory, so the write fails.
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut config = config_for(&server, dir.path());
    config.clean_markdown = true;
    config.progress_callback = Some(recorder.clone());

    let err = Exporter::from_config(config)
        .unwrap()
        .export("abc-123")
        .await
        .unwrap_err();
    assert!(matches!(err, Article2PdfError::OutputWriteFailed { .. }), "unexpected error: {err}");

    let events = recorder.0.lock().unwrap().clone();
    assert!(events.contains(&format!("generation:{raw}")), "events: {events:?}");
    assert!(!events.iter().any(|e| e.starts_with("complete:")));
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let server = MockServer::start().await;
    mount_article(&server, "abc-123", json!([{ "content_text": "<p>x</p>" }])).await;
    mount_gemini(&server, "Hello").await;

    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut config = config_for(&server, &dir.path().join("o.pdf"));
    config.progress_callback = Some(recorder.clone());

    Exporter::from_config(config)
        .unwrap()
        .export("abc-123")
        .await
        .unwrap();

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start:fetch",
            "done:fetch",
            "start:convert",
            "done:convert",
            "generation:Hello",
            "start:render",
            "done:render",
            "start:write",
            "done:write",
            "complete:1",
        ]
    );
}

// ── Custom stages through the trait seams ────────────────────────────────────

struct FixedStore;

#[async_trait]
impl ArticleStore for FixedStore {
    async fn fetch_article(&self, article_id: &str) -> Result<ArticleRecord, Article2PdfError> {
        Ok(ArticleRecord {
            article_id: article_id.to_string(),
            content_text: "<h2>Intro</h2>".into(),
            title: Some("Stored title".into()),
        })
    }
}

struct EchoGenerator;

#[async_trait]
impl MarkdownGenerator for EchoGenerator {
    fn provider(&self) -> &str {
        "echo"
    }
    fn model(&self) -> &str {
        "echo-1"
    }
    async fn generate(&self, request: &ConversionRequest) -> Result<Generation, Article2PdfError> {
        let text = request
            .html
            .replace("<h2>", "## ")
            .replace("</h2>", "\n\n### Deep\n");
        Ok(Generation {
            text,
            ..Generation::default()
        })
    }
}

#[tokio::test]
async fn exporter_accepts_custom_store_and_generator() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExportConfig::builder()
        .output_path(dir.path().join("custom.pdf"))
        .build()
        .unwrap();
    let exporter = Exporter::new(Arc::new(FixedStore), Arc::new(EchoGenerator), config);

    let output = exporter.export("id-1").await.unwrap();
    assert_eq!(output.title, "Stored title");
    // toc_level 2: the h2 is listed, the h3 is not.
    assert_eq!(
        output.toc,
        vec![TocEntry {
            level: 2,
            title: "Intro".into(),
            page: 1
        }]
    );
    let written = read_outline(&std::fs::read(&output.output_path).unwrap()).unwrap();
    let titles: Vec<&str> = written.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["Intro"]);
}

#[tokio::test]
async fn written_pdf_outline_holds_both_heading_levels_on_one_page() {
    let server = MockServer::start().await;
    mount_article(
        &server,
        "multi",
        json!([{ "article_id": "multi", "content_text": "<h1>A</h1><h2>B</h2><h3>C</h3>" }]),
    )
    .await;
    mount_gemini(&server, "# Alpha\n\nx\n\n## Beta\n\ny\n\n### Gamma\n\nz\n").await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("output.pdf");
    let exporter = Exporter::from_config(config_for(&server, &out_path)).unwrap();
    let output = exporter.export("multi").await.unwrap();
    assert_eq!(output.stats.page_count, 1);

    let outline = read_outline(&std::fs::read(&out_path).unwrap()).unwrap();
    assert_eq!(
        outline,
        vec![
            OutlineNode {
                depth: 1,
                title: "Alpha".into(),
                page: Some(1)
            },
            OutlineNode {
                depth: 2,
                title: "Beta".into(),
                page: Some(1)
            },
        ]
    );
    let toc: Vec<(u8, &str)> = output
        .toc
        .iter()
        .map(|e| (e.level, e.title.as_str()))
        .collect();
    assert_eq!(toc, vec![(1, "Alpha"), (2, "Beta")]);
}

// ── Live services ────────────────────────────────────────────────────────────

/// Exports a real article. Needs E2E_ENABLED, SUPABASE_URL, SUPABASE_ANON_KEY,
/// GEMINI_API_KEY and E2E_ARTICLE_ID.
#[tokio::test]
async fn live_export() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live tests");
        return;
    }
    let vars = ["SUPABASE_URL", "SUPABASE_ANON_KEY", "GEMINI_API_KEY", "E2E_ARTICLE_ID"];
    let values: Vec<String> = match vars.iter().map(std::env::var).collect() {
        Ok(v) => v,
        Err(_) => {
            println!("SKIP — live test needs {}", vars.join(", "));
            return;
        }
    };

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("live.pdf");
    let config = ExportConfig::builder()
        .store_url(&values[0])
        .store_key(&values[1])
        .api_key(&values[2])
        .output_path(&out_path)
        .build()
        .unwrap();

    let output = article2pdf::export_article(&values[3], &config).await.unwrap();
    println!(
        "{} page(s), {} outline entries, {} tokens in / {} out",
        output.stats.page_count,
        output.toc.len(),
        output.stats.input_tokens,
        output.stats.output_tokens
    );
    assert!(!output.markdown.trim().is_empty());
    assert!(std::fs::read(&out_path).unwrap().starts_with(b"%PDF"));
}
