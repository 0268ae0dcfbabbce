//! CLI binary for edgequake-card2contact.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the extracted contacts.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_card2contact::{
    extract_stream, CardResult, ExtractionConfig, ExtractionProgressCallback, Field, FieldExtract,
    ProgressCallback, RefinePolicy,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per card.
/// Cards may finish out of order when several run at once.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:32.green/238}] {pos:>3}/{len} cards  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);
        bar.set_style(style);
        bar.set_prefix("Reading");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
    }

    fn on_card_start(&self, index: usize, _total: usize, input: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(input.to_string());
    }

    fn on_card_complete(&self, index: usize, total: usize, filled_fields: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Card {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{filled_fields}/5 fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_card_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let first_line = error.lines().next().unwrap_or_default();
        let msg = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} Card {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!("{} {} cards read", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} cards read  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Read one card
  card2contact card.jpg

  # Several cards, JSON with run statistics
  card2contact --json front.jpg back.png https://example.com/card.webp

  # Always run the text refinement pass, with a cheaper text model
  card2contact --refine always --refine-model gpt-4.1-nano card.jpg

  # Use a specific vision model
  card2contact --provider openai --model gpt-4.1 card.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  CARD2CONTACT_*          Any flag below, e.g. CARD2CONTACT_REFINE=never
"#;

/// Extract contact fields from business card photos using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "card2contact",
    version,
    about = "Extract contact fields from business card photos using Vision LLMs",
    long_about = "Read business card photos (local files or URLs) with a Vision Language Model \
and print validated contact fields. Every field is checked against the card's own transcript, \
so fabricated values are dropped rather than returned.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Card image paths (jpeg, png, webp) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Vision model ID (e.g. gpt-4o-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Vision temperature (0.0–2.0).
    #[arg(long, env = "CARD2CONTACT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max output tokens for the vision pass.
    #[arg(long, env = "CARD2CONTACT_MAX_TOKENS", default_value_t = 500)]
    max_tokens: usize,

    /// Do not ask the model again for a missing phone number.
    #[arg(long, env = "CARD2CONTACT_NO_PHONE_REQUERY")]
    no_phone_requery: bool,

    /// When to run the text-only refinement pass.
    #[arg(long, env = "CARD2CONTACT_REFINE", value_enum, default_value = "when-incomplete")]
    refine: RefineArg,

    /// Text model for refinement (defaults to the vision model).
    #[arg(long, env = "CARD2CONTACT_REFINE_MODEL")]
    refine_model: Option<String>,

    /// Provider for refinement (defaults to the vision provider).
    #[arg(long, env = "CARD2CONTACT_REFINE_PROVIDER")]
    refine_provider: Option<String>,

    /// Refinement temperature (0.0–2.0).
    #[arg(long, env = "CARD2CONTACT_REFINE_TEMPERATURE", default_value_t = 0.3)]
    refine_temperature: f32,

    /// Max output tokens for the refinement pass.
    #[arg(long, env = "CARD2CONTACT_REFINE_MAX_TOKENS", default_value_t = 2000)]
    refine_max_tokens: usize,

    /// Text file replacing the built-in extraction prompt.
    #[arg(long, env = "CARD2CONTACT_EXTRACTION_PROMPT")]
    extraction_prompt: Option<PathBuf>,

    /// Text file replacing the built-in refinement context prompt.
    #[arg(long, env = "CARD2CONTACT_CONTEXT_PROMPT")]
    context_prompt: Option<PathBuf>,

    /// Number of cards processed at once.
    #[arg(short, long, env = "CARD2CONTACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "CARD2CONTACT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CARD2CONTACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output JSON (ExtractionOutput with stats) instead of a table.
    #[arg(long, env = "CARD2CONTACT_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "CARD2CONTACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CARD2CONTACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, env = "CARD2CONTACT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RefineArg {
    Always,
    Never,
    WhenIncomplete,
}

impl From<RefineArg> for RefinePolicy {
    fn from(v: RefineArg) -> Self {
        match v {
            RefineArg::Always => RefinePolicy::Always,
            RefineArg::Never => RefinePolicy::Never,
            RefineArg::WhenIncomplete => RefinePolicy::WhenIncomplete,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.inputs.len() > 1;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let stream = extract_stream(cli.inputs.clone(), &config).context("Extraction failed")?;
    let mut results: Vec<CardResult> = stream.collect().await;
    results.sort_by_key(|r| r.index);

    let failed = results.iter().filter(|r| !r.is_success()).count();

    // ── Print results ────────────────────────────────────────────────────
    if cli.json {
        // A single card prints its ExtractionOutput; a batch prints every CardResult.
        let json = match results.as_slice() {
            [CardResult {
                output: Some(output),
                ..
            }] => serde_json::to_string_pretty(output),
            _ => serde_json::to_string_pretty(&results),
        };
        println!("{}", json.context("Failed to serialise output")?);
    } else {
        for result in &results {
            print_result(result, results.len() > 1);
        }
        if !cli.quiet && !show_progress {
            let calls: usize = results
                .iter()
                .filter_map(|r| r.output.as_ref())
                .map(|o| o.stats.model_calls)
                .sum();
            let tokens_in: u64 = results
                .iter()
                .filter_map(|r| r.output.as_ref())
                .map(|o| o.stats.total_input_tokens)
                .sum();
            eprintln!(
                "   {} model calls  /  {} tokens in",
                dim(&calls.to_string()),
                dim(&tokens_in.to_string()),
            );
        }
    }

    if failed == results.len() {
        anyhow::bail!("No card could be read ({} failed)", failed);
    }
    Ok(())
}

/// Print one card as an aligned field table.
fn print_result(result: &CardResult, with_header: bool) {
    if with_header {
        println!("{}", bold(&result.input));
    }
    match (&result.output, &result.error) {
        (Some(output), _) => print_extract(&output.extract),
        (None, Some(error)) => println!("  {} {}", red("✗"), error),
        (None, None) => {}
    }
    if with_header {
        println!();
    }
}

fn print_extract(extract: &FieldExtract) {
    for field in Field::ALL {
        let label = format!("{}:", field_label(field));
        match extract.value(field) {
            Some(value) => {
                let source = extract
                    .source(field)
                    .and_then(|s| serde_json::to_value(s).ok())
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                println!(
                    "  {:<10} {}  {}",
                    label,
                    value,
                    dim(&format!("({:.2} {})", extract.confidence(field), source)),
                );
            }
            None => println!("  {:<10} {}", label, dim("—")),
        }
    }
}

fn field_label(field: Field) -> &'static str {
    match field {
        Field::Name => "Name",
        Field::Email => "Email",
        Field::Phone => "Phone",
        Field::Company => "Company",
        Field::JobTitle => "Job title",
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .phone_requery(!cli.no_phone_requery)
        .refine_policy(cli.refine.into())
        .refine_temperature(cli.refine_temperature)
        .refine_max_tokens(cli.refine_max_tokens)
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = cli.refine_model {
        builder = builder.refine_model(model);
    }
    if let Some(ref provider) = cli.refine_provider {
        builder = builder.refine_provider_name(provider);
    }
    if let Some(ref path) = cli.extraction_prompt {
        builder = builder.extraction_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.context_prompt {
        builder = builder.context_prompt(read_prompt(path).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &PathBuf) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt from {:?}", path))
}
