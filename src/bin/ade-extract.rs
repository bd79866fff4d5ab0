//! CLI binary for ade-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use ade_extract::pipeline::input::resolve_input;
use ade_extract::{
    ExtractionPipeline, ExtractionSchema, PipelineConfig, PipelineOutcome,
    PipelineProgressCallback, PipelineResult, ProgressCallback,
};
use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Wall-clock start times keyed by document fingerprint.
///
/// Identical bytes under two paths share a key when single-flight is off, so
/// each key holds a queue and completions take the oldest start.
#[derive(Default)]
struct StartTimes(Mutex<HashMap<String, VecDeque<Instant>>>);

impl StartTimes {
    fn start(&self, fingerprint: &str) {
        self.0
            .lock()
            .unwrap()
            .entry(fingerprint.to_string())
            .or_default()
            .push_back(Instant::now());
    }

    fn finish(&self, fingerprint: &str) -> Option<Duration> {
        let mut map = self.0.lock().unwrap();
        let queue = map.get_mut(fingerprint)?;
        let started = queue.pop_front();
        if queue.is_empty() {
            map.remove(fingerprint);
        }
        started.map(|t| t.elapsed())
    }
}

/// Terminal progress callback: one bar over all documents, one log line per
/// finished document. Documents may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: StartTimes,
    /// Remote calls actually made (cache misses).
    remote_calls: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: StartTimes::default(),
            remote_calls: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_document_start(&self, filename: &str, fingerprint: &str) {
        self.start_times.start(fingerprint);
        self.bar
            .set_message(format!("{filename} {}", dim(&fingerprint[..12.min(fingerprint.len())])));
    }

    fn on_parse_start(&self, filename: &str) {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(format!("{filename}: parsing"));
    }

    fn on_extract_start(&self, filename: &str) {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(format!("{filename}: extracting"));
    }

    fn on_stage_error(&self, filename: &str, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), filename, red(&msg)));
    }

    fn on_document_complete(&self, filename: &str, fingerprint: &str, outcome: PipelineOutcome) {
        let secs = self
            .start_times
            .finish(fingerprint)
            .map_or(0.0, |d| d.as_secs_f64());
        let mark = if outcome.is_success() {
            green("✓")
        } else {
            red("✗")
        };
        self.bar.println(format!(
            "  {} {:<40}  {}",
            mark,
            filename,
            dim(&format!("{outcome:?}  {secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse + extract one report, print the structured JSON
  ade-extract cbc.pdf

  # Several reports, four at a time, full results as JSON
  ade-extract -c 4 --json reports/*.pdf > results.json

  # Write the full result to a file
  ade-extract cbc.pdf -o cbc.json

  # Only the cleaned Markdown
  ade-extract --markdown-only scan.png

  # Custom extraction schema (re-extracts, never re-parses)
  ade-extract --schema my-schema.json cbc.pdf

  # Show the cache key of a document (no API key needed)
  ade-extract --fingerprint-only cbc.pdf

CACHE:
  Every document is cached under <cache-dir>/<sha256 of bytes>/:
    parsed.md, parse_meta.json   written once per document
    schema.hash, extracted.json  valid while the schema is unchanged

ENVIRONMENT VARIABLES:
  LANDING_API_KEY          LandingAI ADE API key
  ADE_EXTRACT_CACHE_DIR    Override the cache directory
  ADE_EXTRACT_MODEL        Override the parse model
  RUST_LOG                 Log filter (overrides -v / -q)
"#;

/// Parse and extract lab reports with LandingAI ADE, cached by content.
#[derive(Parser, Debug)]
#[command(
    name = "ade-extract",
    version,
    about = "Parse and extract lab reports with LandingAI ADE, cached by content",
    long_about = "Send documents (local files or URLs) through the LandingAI ADE parse and \
extract endpoints. Results are cached by the SHA-256 of the document and of the schema, so \
re-uploads are free and a schema change costs one re-extraction per document.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the full JSON result to this file (single input only).
    #[arg(short, long, env = "ADE_EXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// ADE parse model.
    #[arg(long, env = "ADE_EXTRACT_MODEL", default_value = "dpt-2-latest")]
    model: String,

    /// Path to a JSON Schema file. Default: built-in lab-report schema.
    #[arg(long, env = "ADE_EXTRACT_SCHEMA")]
    schema: Option<PathBuf>,

    /// Cache directory.
    #[arg(long, env = "ADE_EXTRACT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// LandingAI API key.
    #[arg(long, env = "LANDING_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-remote-call timeout in seconds.
    #[arg(long, env = "ADE_EXTRACT_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Retries per remote call on transient failure.
    #[arg(long, env = "ADE_EXTRACT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Number of documents processed concurrently.
    #[arg(short, long, env = "ADE_EXTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Output full results (PipelineResult) as JSON.
    #[arg(long)]
    json: bool,

    /// Print only the cleaned Markdown.
    #[arg(long, conflicts_with = "json")]
    markdown_only: bool,

    /// Print document fingerprints and exit; no network calls.
    #[arg(long)]
    fingerprint_only: bool,

    /// Allow concurrent work on the same document.
    #[arg(long)]
    no_single_flight: bool,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "ADE_EXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "ADE_EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ADE_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ADE_EXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.fingerprint_only;
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

    // ── Fingerprint-only mode ────────────────────────────────────────────
    if cli.fingerprint_only {
        for input in &cli.inputs {
            let doc = resolve_input(input, cli.download_timeout)
                .await
                .with_context(|| format!("Failed to read {input}"))?;
            println!("{}  {}", ade_extract::fingerprint(&doc.bytes), doc.filename);
        }
        return Ok(());
    }

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output takes a single input (got {})", cli.inputs.len());
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress = if show_progress {
        Some(CliProgressCallback::new(cli.inputs.len()))
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )?;
    let pipeline = ExtractionPipeline::new(config).context("Failed to set up pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let mut results: Vec<(usize, String, Result<PipelineResult, ade_extract::ExtractError>)> =
        if let Some(ref output_path) = cli.output {
            let input = cli.inputs[0].clone();
            let result = pipeline.process_to_file(&input, output_path).await;
            vec![(0, input, result)]
        } else {
            stream::iter(cli.inputs.iter().cloned().enumerate())
                .map(|(idx, input)| {
                    let pipeline = &pipeline;
                    async move {
                        let result = pipeline.process_source(&input).await;
                        (idx, input, result)
                    }
                })
                .buffer_unordered(cli.concurrency.max(1))
                .collect()
                .await
        };
    results.sort_by_key(|(idx, _, _)| *idx);

    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let mut failed = 0usize;
    let mut done: Vec<&PipelineResult> = Vec::new();
    for (_, input, result) in &results {
        match result {
            Ok(r) => {
                if !r.is_success() {
                    failed += 1;
                }
                done.push(r);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", red("✘"), input, e);
            }
        }
    }

    if cli.output.is_none() {
        print_results(&cli, &done)?;
    }

    if !cli.quiet {
        let total = results.len();
        let remote_calls = progress
            .as_ref()
            .map(|cb| cb.remote_calls.load(Ordering::SeqCst).to_string())
            .unwrap_or_else(|| "?".to_string());
        eprintln!(
            "{}  {}/{} documents  {}ms  {}{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            total - failed,
            total,
            started.elapsed().as_millis(),
            dim(&format!("{remote_calls} remote calls")),
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed", results.len());
    }
    Ok(())
}

/// Print results to stdout in the selected format.
fn print_results(cli: &Cli, results: &[&PipelineResult]) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if cli.json {
        let json = if results.len() == 1 {
            serde_json::to_string_pretty(results[0])
        } else {
            serde_json::to_string_pretty(results)
        }
        .context("Failed to serialise results")?;
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
        return Ok(());
    }

    let multi = results.len() > 1;
    for r in results {
        if multi {
            writeln!(handle, "{}", bold(&format!("== {} ==", r.filename)))
                .context("Failed to write to stdout")?;
        }
        let body = if cli.markdown_only {
            r.markdown.clone()
        } else {
            r.extraction_json()
        };
        writeln!(handle, "{body}").context("Failed to write to stdout")?;
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .model(cli.model.clone())
        .remote_timeout_secs(cli.timeout)
        .max_retries(cli.max_retries)
        .single_flight(!cli.no_single_flight)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.schema {
        let schema = ExtractionSchema::from_file(path)
            .with_context(|| format!("Failed to load schema from {:?}", path))?;
        builder = builder.schema(schema);
    }
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
