//! CLI binary for edgequake-pdf2entities.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig`, writes the output directory and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2entities::pipeline::input;
use edgequake_pdf2entities::{
    extract_entities, ElementKind, EntityType, ExtractionMethod, ExtractionProgressCallback,
    PipelineConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over elements plus one log line per entity.
struct CliProgressCallback {
    bar: ProgressBar,
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Reading elements…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            fallbacks: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_elements: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>4}/{len} elements  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_elements as u64);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting entities from {total_elements} elements…"))
        ));
    }

    fn on_element_start(&self, index: usize, _total: usize, kind: ElementKind, page: usize) {
        if index > 1 {
            self.bar.inc(1);
        }
        self.bar.set_message(format!("{kind} on page {page}"));
    }

    fn on_entity_complete(&self, id: &str, entity_type: EntityType, method: ExtractionMethod) {
        let mark = match method {
            ExtractionMethod::Primary => green("✓"),
            ExtractionMethod::VisionFallback => {
                self.fallbacks.fetch_add(1, Ordering::SeqCst);
                yellow("↻")
            }
            ExtractionMethod::Failed => red("✗"),
        };
        self.bar.println(format!(
            "  {} {}  {:<10}  {}",
            mark,
            id,
            entity_type.as_str(),
            dim(method.as_str())
        ));
    }

    fn on_element_failed(&self, index: usize, total: usize, reason: &str) {
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("    {} element {index}/{total}: {}", red("!"), red(&msg)));
    }

    fn on_run_complete(&self, total_entities: usize, failed_entities: usize) {
        self.bar.finish_and_clear();
        let fallbacks = self.fallbacks.load(Ordering::SeqCst);
        if failed_entities == 0 {
            eprintln!(
                "{} {} entities extracted  ({} via vision fallback)",
                green("✔"),
                bold(&total_entities.to_string()),
                fallbacks
            );
        } else {
            eprintln!(
                "{} {} entities extracted  ({} via vision fallback, {} need manual review)",
                yellow("⚠"),
                bold(&total_entities.to_string()),
                fallbacks,
                red(&failed_entities.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Elements next to the PDF (report.elements.json), output in ./output
  pdf2entities report.pdf

  # Explicit element list and output directory
  pdf2entities report.pdf --elements parsed/report.json -o out/report

  # Emit surrounding prose of mixed pictures as separate entities
  pdf2entities --split-mixed report.pdf

  # Manifest as JSON on stdout
  pdf2entities --json --no-progress report.pdf > manifest.yaml

ELEMENT LIST FORMAT:
  A JSON array in document order; bbox is [x1, y1, x2, y2] in PDF points,
  origin bottom-left:
    [{"kind": "text",    "page": 1, "bbox": [72, 700, 540, 720], "text": "..."},
     {"kind": "table",   "page": 3, "bbox": [72, 100, 540, 300], "markdown": "| a | b |..."},
     {"kind": "picture", "page": 4, "bbox": [72, 300, 540, 600], "image": "fig4.png"}]

OUTPUT:
  <dir>/final_document.md        composite document with entity markers
  <dir>/manifest.yaml            entity index with confidence and method
  <dir>/entities/E001_text.md    one file per entity (.md, .yaml, .mmd)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (default: ./ then the system library)
"#;

/// Extract provenance-tagged entities from a parsed PDF.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2entities",
    version,
    about = "Extract text, table and diagram entities from a parsed PDF",
    long_about = "Turn the structural elements of a PDF into Markdown, YAML and Mermaid \
entities. Native tables that fail structural validation are re-read from a rendered \
region by a Vision LLM; pictures are classified and transcribed. Supports OpenAI, \
Anthropic, Google Gemini, Azure OpenAI and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source PDF file.
    input: PathBuf,

    /// Element list from the layout parser. Default: <input>.elements.json
    #[arg(short, long, env = "PDF2ENTITIES_ELEMENTS")]
    elements: Option<PathBuf>,

    /// Output directory.
    #[arg(short, long, env = "PDF2ENTITIES_OUTPUT", default_value = "output")]
    output_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Attempts per vision call, including the first.
    #[arg(long, env = "PDF2ENTITIES_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Wait before the first retry, in ms; doubles per retry.
    #[arg(long, env = "PDF2ENTITIES_RETRY_BACKOFF_MS", default_value_t = 4000)]
    retry_backoff_ms: u64,

    /// Longest wait between retries, in ms.
    #[arg(long, env = "PDF2ENTITIES_MAX_BACKOFF_MS", default_value_t = 16000)]
    max_backoff_ms: u64,

    /// Magnification for table fallback rendering (1–8].
    #[arg(long, env = "PDF2ENTITIES_FALLBACK_SCALE", default_value_t = 2.0)]
    fallback_scale: f32,

    /// Emit surrounding prose of mixed pictures as its own entity.
    #[arg(long, env = "PDF2ENTITIES_SPLIT_MIXED")]
    split_mixed: bool,

    /// Validate tables read from pictures like native tables.
    #[arg(long, env = "PDF2ENTITIES_VALIDATE_PICTURE_TABLES")]
    validate_picture_tables: bool,

    /// Directory for temporary fallback rasters.
    #[arg(long, env = "PDF2ENTITIES_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2ENTITIES_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2ENTITIES_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2ENTITIES_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2ENTITIES_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the manifest as JSON on stdout.
    #[arg(long, env = "PDF2ENTITIES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2ENTITIES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2ENTITIES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2ENTITIES_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v brings them back.
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    let elements_path = cli
        .elements
        .clone()
        .unwrap_or_else(|| default_elements_path(&cli.input));
    let elements = input::load_elements(&elements_path)
        .await
        .with_context(|| format!("Failed to load elements from {}", elements_path.display()))?;

    let output = extract_entities(&cli.input, &elements, &config)
        .await
        .context("Extraction failed")?;
    let document_path = output
        .write_to_dir(&cli.output_dir)
        .await
        .context("Failed to write output")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output.manifest)
            .context("Failed to serialise manifest")?;
        println!("{json}");
    }

    if !cli.quiet {
        let counts: Vec<String> = output
            .manifest
            .entity_type_counts
            .iter()
            .map(|(t, n)| format!("{n} {t}"))
            .collect();
        eprintln!(
            "{}  {} entities ({})  {}ms  →  {}",
            if output.stats.failed_entities == 0 {
                green("✔")
            } else {
                yellow("⚠")
            },
            output.stats.total_entities,
            counts.join(", "),
            output.stats.total_duration_ms,
            bold(&document_path.display().to_string()),
        );
        if output.stats.failed_entities > 0 {
            eprintln!(
                "   {} entities failed; search the manifest for {}",
                red(&output.stats.failed_entities.to_string()),
                dim("\"extraction_method\": \"failed\"")
            );
        }
    }

    Ok(())
}

/// `report.pdf` → `report.elements.json`
fn default_elements_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("elements.json")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .max_backoff_ms(cli.max_backoff_ms)
        .fallback_scale(cli.fallback_scale)
        .split_mixed_entities(cli.split_mixed)
        .validate_picture_tables(cli.validate_picture_tables)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
