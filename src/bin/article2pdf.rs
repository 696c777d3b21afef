//! CLI binary for article2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExportConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use article2pdf::config::{DEFAULT_MODEL, DEFAULT_OUTPUT_PATH, DEFAULT_TOC_LEVEL};
use article2pdf::{
    render_markdown_to_file, ExportConfig, ExportOutput, ExportProgressCallback, Exporter,
    ProgressCallback, Stage, Stylesheet,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner on stderr that names the running stage and logs each finished one.
/// Also echoes the raw model response to stdout as soon as it arrives.
struct CliProgressCallback {
    bar: Option<ProgressBar>,
    echo: bool,
}

impl CliProgressCallback {
    fn new(show_progress: bool, echo: bool) -> Arc<Self> {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Starting");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Arc::new(Self { bar, echo })
    }

    /// Stop the spinner so an error report is not drawn over.
    fn clear(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn echo_markdown(markdown: &str) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(markdown.as_bytes())?;
    if !markdown.ends_with('\n') {
        handle.write_all(b"\n")?;
    }
    handle.flush()
}

impl ExportProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        if let Some(ref bar) = self.bar {
            bar.set_prefix(stage.label());
            bar.set_message("…");
        }
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        if let Some(ref bar) = self.bar {
            bar.println(format!(
                "  {} {:<24} {}",
                green("✓"),
                stage.label(),
                dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
            ));
        }
    }

    fn on_generation(&self, raw_markdown: &str) {
        if !self.echo {
            return;
        }
        let result = match self.bar {
            Some(ref bar) => bar.suspend(|| echo_markdown(raw_markdown)),
            None => echo_markdown(raw_markdown),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to echo the model response: {e}");
        }
    }

    fn on_export_complete(&self, path: &Path, page_count: usize) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
            eprintln!(
                "{} {} page(s) → {}",
                green("✔"),
                bold(&page_count.to_string()),
                bold(&path.display().to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Export one article to output.pdf
  article2pdf abc-123

  # Custom output path, deeper outline, house style override
  article2pdf abc-123 -o report.pdf --toc-level 3 --stylesheet style.json

  # Keep the intermediate Markdown, fix up fences and stray characters
  article2pdf abc-123 --markdown-out article.md --clean

  # Re-render a local Markdown file (no store or API key needed)
  article2pdf --from-markdown article.md -o article.pdf

  # Use another provider through edgequake-llm
  article2pdf abc-123 --provider openai --model gpt-4.1-mini

  # JSON summary (title, outline, stats) on stdout
  article2pdf abc-123 --json --no-echo > summary.json

ENVIRONMENT VARIABLES:
  SUPABASE_URL          Row-store base URL (https://<project>.supabase.co)
  SUPABASE_ANON_KEY     Row-store API key
  GEMINI_API_KEY        Google Gemini API key
  ARTICLE2PDF_MODEL     Model ID (default: gemini-2.0-flash)
  EDGEQUAKE_PROVIDER    Use an edgequake-llm provider instead of Gemini REST
                        (openai, anthropic, ollama, …; reads that provider's
                        own key variable, e.g. OPENAI_API_KEY)
  RUST_LOG              Override log filtering
"#;

/// Export a stored HTML article to a styled PDF via an LLM Markdown conversion.
#[derive(Parser, Debug)]
#[command(
    name = "article2pdf",
    version,
    about = "Export a stored HTML article to a styled PDF",
    long_about = "Fetch one article's HTML from a Supabase table, have a language model \
rewrite it as Markdown, and render that Markdown as a styled A4 PDF with a table of \
contents (PDF outline).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Primary key of the article row.
    #[arg(required_unless_present = "from_markdown")]
    article_id: Option<String>,

    /// Row-store base URL.
    #[arg(long, env = "SUPABASE_URL")]
    store_url: Option<String>,

    /// Row-store API key.
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    store_key: Option<String>,

    /// Table holding the articles.
    #[arg(long, env = "ARTICLE2PDF_TABLE", default_value = "articles")]
    table: String,

    /// Primary-key column.
    #[arg(long, env = "ARTICLE2PDF_ID_COLUMN", default_value = "article_id")]
    id_column: String,

    /// Column holding the HTML body.
    #[arg(long, env = "ARTICLE2PDF_CONTENT_COLUMN", default_value = "content_text")]
    content_column: String,

    /// Column used as the PDF title when present. Pass an empty value to disable.
    #[arg(long, env = "ARTICLE2PDF_TITLE_COLUMN", default_value = "article_name")]
    title_column: String,

    /// Model ID.
    #[arg(long, env = "ARTICLE2PDF_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// edgequake-llm provider name (openai, anthropic, ollama, …).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Text file replacing the built-in conversion instruction.
    #[arg(long, env = "ARTICLE2PDF_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// PDF output path (replaced if it exists).
    #[arg(short, long, env = "ARTICLE2PDF_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Deepest heading level in the PDF outline (0 disables it).
    #[arg(long, env = "ARTICLE2PDF_TOC_LEVEL", default_value_t = DEFAULT_TOC_LEVEL,
          value_parser = clap::value_parser!(u8).range(0..=6))]
    toc_level: u8,

    /// JSON file overriding parts of the house stylesheet.
    #[arg(long, env = "ARTICLE2PDF_STYLESHEET")]
    stylesheet: Option<PathBuf>,

    /// Also write the Markdown that was rendered to this file.
    #[arg(long)]
    markdown_out: Option<PathBuf>,

    /// Render a local Markdown file instead of fetching and converting.
    #[arg(long, conflicts_with = "article_id")]
    from_markdown: Option<PathBuf>,

    /// Explicit PDF title (defaults to the title column, then the first heading).
    #[arg(long)]
    title: Option<String>,

    /// Strip outer code fences and invisible characters from the model output.
    #[arg(long, env = "ARTICLE2PDF_CLEAN")]
    clean: bool,

    /// Fail on empty article content or an empty model response.
    #[arg(long, env = "ARTICLE2PDF_STRICT")]
    strict: bool,

    /// Timeout in seconds for each network request.
    #[arg(long, env = "ARTICLE2PDF_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Print the export summary (ExportOutput) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Do not echo the raw model response to stdout.
    #[arg(long)]
    no_echo: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "ARTICLE2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ARTICLE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ARTICLE2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports each stage; keep INFO logs out of its way.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let echo = !cli.quiet && !cli.no_echo && !cli.json;
    let progress = CliProgressCallback::new(show_progress, echo);

    let output = match run(&cli, progress.clone()).await {
        Ok(output) => output,
        Err(err) => {
            progress.clear();
            return Err(err);
        }
    };

    print_result(&cli, &output, show_progress)
}

/// Build the configuration, run the export and save the Markdown copy.
async fn run(cli: &Cli, progress: ProgressCallback) -> Result<ExportOutput> {
    let config = build_config(cli, Some(progress)).await?;

    // ── Run export ───────────────────────────────────────────────────────
    let output = match (&cli.from_markdown, &cli.article_id) {
        (Some(path), _) => {
            let markdown = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read Markdown from {:?}", path))?;
            render_markdown_to_file(&markdown, &config)
                .await
                .context("Rendering failed")?
        }
        (None, Some(article_id)) => {
            let exporter = Exporter::from_config(config).context("Invalid configuration")?;
            exporter
                .export(article_id)
                .await
                .with_context(|| format!("Export of article '{article_id}' failed"))?
        }
        (None, None) => anyhow::bail!("An ARTICLE_ID or --from-markdown is required"),
    };

    if let Some(ref path) = cli.markdown_out {
        tokio::fs::write(path, &output.markdown)
            .await
            .with_context(|| format!("Failed to write Markdown to {:?}", path))?;
    }
    Ok(output)
}

/// Print the JSON summary to stdout, stats to stderr. The Markdown echo has
/// already happened when the model answered.
fn print_result(cli: &Cli, output: &ExportOutput, show_progress: bool) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        let stats = &output.stats;
        if !show_progress {
            eprintln!(
                "Wrote {} page(s) to {} in {}ms",
                stats.page_count,
                output.output_path.display(),
                stats.total_ms
            );
        }
        if stats.input_tokens + stats.output_tokens > 0 {
            eprintln!(
                "   {} tokens in  /  {} tokens out  —  {}ms total",
                dim(&stats.input_tokens.to_string()),
                dim(&stats.output_tokens.to_string()),
                stats.total_ms,
            );
        }
    }
    Ok(())
}

/// Map CLI args to `ExportConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExportConfig> {
    let instruction = match cli.instruction {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instruction from {:?}", path))?,
        ),
        None => None,
    };

    let stylesheet = match cli.stylesheet {
        Some(ref path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read stylesheet from {:?}", path))?;
            serde_json::from_str::<Stylesheet>(&raw)
                .with_context(|| format!("Invalid stylesheet JSON in {:?}", path))?
        }
        None => Stylesheet::default(),
    };

    let title_column = Some(cli.title_column.trim().to_string()).filter(|c| !c.is_empty());

    let mut builder = ExportConfig::builder()
        .table(&cli.table)
        .id_column(&cli.id_column)
        .content_column(&cli.content_column)
        .title_column(title_column)
        .store_timeout_secs(cli.timeout)
        .model(&cli.model)
        .api_timeout_secs(cli.timeout)
        .output_path(&cli.output)
        .toc_level(cli.toc_level)
        .stylesheet(stylesheet)
        .strict(cli.strict)
        .clean_markdown(cli.clean);

    if let Some(ref url) = cli.store_url {
        builder = builder.store_url(url);
    }
    if let Some(ref key) = cli.store_key {
        builder = builder.store_key(key);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(instruction) = instruction {
        builder = builder.instruction(instruction);
    }
    if let Some(ref title) = cli.title {
        builder = builder.title(title);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
