//! CLI binary for injury-summary.
//!
//! Maps flags onto `SummaryConfig`, runs the batch over the input folder and
//! reports what was recorded.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use injury_summary::pipeline::input::discover_pdfs;
use injury_summary::{
    summarize_to_dir, DocumentError, InjuryRecord, Pipeline, ProgressCallback, SummaryConfig,
    SummaryProgressCallback, SUMMARY_FILE_NAME,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── Colours ──────────────────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────────

/// One bar over the documents of the batch, with a log line per document
/// outcome and per dropped page.
struct CliProgressCallback {
    bar: ProgressBar,
    dropped_pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input folder…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            dropped_pages: AtomicUsize::new(0),
        })
    }
}

impl SummaryProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Summarising");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Summarising {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, document: &str) {
        self.bar.set_message(document.to_string());
    }

    fn on_page_error(&self, document: &str, page_num: usize, total_pages: usize, error: &str) {
        self.dropped_pages.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "    {} {} page {}/{}  {}",
            dim("·"),
            dim(document),
            page_num,
            total_pages,
            dim(&msg)
        ));
    }

    fn on_document_recorded(&self, document: &str, record: &InjuryRecord) {
        self.bar.println(format!(
            "  {} {:<32}  {}  {}  {}",
            green("✓"),
            document,
            record.date_of_visit,
            bold(&record.icd10_code),
            dim(&record.diagnosis),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, error: &DocumentError) {
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            error.document,
            red(&error.stage.to_string()),
            dim(&error.cause.to_string()),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, recorded: usize) {
        let failed = total_documents.saturating_sub(recorded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents summarised",
                green("✔"),
                bold(&recorded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents summarised  ({} skipped)",
                if recorded == 0 { red("✘") } else { cyan("⚠") },
                bold(&recorded.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
        let dropped = self.dropped_pages.load(Ordering::SeqCst);
        if dropped > 0 {
            eprintln!("   {} pages could not be read", dim(&dropped.to_string()));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summarise every PDF in scans/ into out/
  summarize-injuries scans/ out/

  # Bigger page pool, two documents at a time
  summarize-injuries -c 8 --document-concurrency 2 scans/ out/

  # Only the summary table, no per-visit markdown
  summarize-injuries --no-markdown scans/ out/

  # Machine-readable batch report
  summarize-injuries --json scans/ out/ > report.json

OUTPUT:
  <stem>_summary.md        combined markdown of each recorded visit
  summary_of_injuries.md   Date of Visit | Diagnosis | ICD-10 Code | Reference

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (default provider)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  SERPAPI_API_KEY         SerpAPI key for the ICD-10 web search
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)

  Variables may also be placed in a .env file in the working directory.
"#;

/// Summarise scanned clinic-visit PDFs into an ICD-10 injury table.
#[derive(Parser, Debug)]
#[command(
    name = "summarize-injuries",
    version,
    about = "Summarise scanned clinic-visit PDFs into an ICD-10 injury table",
    long_about = "Transcribe every PDF in INPUT_FOLDER page by page with a vision LLM, merge the \
pages into markdown, extract the visit date and diagnosis, look up the ICD-10 code via web \
search, and write a summary table sorted newest first to OUTPUT_FOLDER.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder containing the clinic-visit PDFs (not searched recursively).
    input_folder: PathBuf,

    /// Folder for the markdown files and the summary table (created if absent).
    output_folder: PathBuf,

    /// Vision model for per-page transcription.
    #[arg(long, env = "INJURY_SUMMARY_EXTRACTION_MODEL", default_value = "gpt-4o-mini")]
    extraction_model: String,

    /// Model that merges pages into one markdown document.
    #[arg(long, env = "INJURY_SUMMARY_COMBINATION_MODEL", default_value = "gpt-4o")]
    combination_model: String,

    /// Model for metadata extraction and code selection.
    #[arg(long, env = "INJURY_SUMMARY_QUERY_MODEL", default_value = "gpt-4o")]
    query_model: String,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "INJURY_SUMMARY_PROVIDER",
        long_help = "LLM provider. Auto-detected from EDGEQUAKE_LLM_PROVIDER or OPENAI_API_KEY if not set."
    )]
    provider: Option<String>,

    /// Concurrent page-extraction calls per document.
    #[arg(short, long, env = "INJURY_SUMMARY_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Documents processed at the same time.
    #[arg(long, env = "INJURY_SUMMARY_DOCUMENT_CONCURRENCY", default_value_t = 1)]
    document_concurrency: usize,

    /// Max output tokens per LLM call.
    #[arg(long, env = "INJURY_SUMMARY_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Organic results requested from the search engine.
    #[arg(long, env = "INJURY_SUMMARY_SEARCH_RESULTS", default_value_t = 10)]
    search_results: usize,

    /// Retries per call on transient errors (0 = fail on first error).
    #[arg(long, env = "INJURY_SUMMARY_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "INJURY_SUMMARY_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call timeout in seconds (unset = client default).
    #[arg(long, env = "INJURY_SUMMARY_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Longest edge of a rendered page, in pixels.
    #[arg(long, env = "INJURY_SUMMARY_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Do not write per-document markdown files.
    #[arg(long, env = "INJURY_SUMMARY_NO_MARKDOWN")]
    no_markdown: bool,

    /// Print the batch report (records, outcomes, stats) as JSON on stdout.
    #[arg(long, env = "INJURY_SUMMARY_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INJURY_SUMMARY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INJURY_SUMMARY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INJURY_SUMMARY_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials and env-twin flags may live in .env.
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // ── Logging ──────────────────────────────────────────────────────────
    // Only errors while the bar is drawing, otherwise log lines tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config and pipeline ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn SummaryProgressCallback>)
    } else {
        None
    };

    // Input folder problems outrank missing credentials.
    let documents = discover_pdfs(&cli.input_folder)
        .await
        .context("Cannot read the input folder")?;

    let config = build_config(&cli, progress_cb)?;
    let pipeline = Pipeline::from_env(config).context("Failed to set up the pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = summarize_to_dir(&pipeline, &documents, &cli.output_folder)
        .await
        .context("Summary failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "Recorded {}/{} documents in {}ms",
            output.stats.recorded, output.stats.documents, output.stats.total_duration_ms
        );
        if output.stats.failed > 0 {
            eprintln!("  {} documents skipped", output.stats.failed);
        }
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} tokens in  /  {} tokens out  →  {}",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            bold(&cli.output_folder.join(SUMMARY_FILE_NAME).display().to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `SummaryConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<SummaryConfig> {
    let mut builder = SummaryConfig::builder()
        .extraction_model(cli.extraction_model.clone())
        .combination_model(cli.combination_model.clone())
        .query_model(cli.query_model.clone())
        .concurrency(cli.concurrency)
        .document_concurrency(cli.document_concurrency)
        .max_tokens(cli.max_tokens)
        .search_results(cli.search_results)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .max_rendered_pixels(cli.max_pixels)
        .save_markdown(!cli.no_markdown);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
