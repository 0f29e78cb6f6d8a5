//! # edgequake-pdf2entities
//!
//! Turn the structural elements of a PDF (text blocks, native tables,
//! pictures) into canonical, provenance-tagged entities: Markdown prose,
//! tabular YAML and Mermaid diagrams, plus one composite document and a
//! manifest.
//!
//! ## Why this crate?
//!
//! Layout parsers find tables and figures reliably but often lose their
//! content: a table comes back as an empty or one-column grid, a flowchart as
//! a bare image. This crate checks every native table for structure and, when
//! the check fails, renders the table region and asks a vision model to read
//! it instead. Pictures are classified first so each one is transcribed into
//! the format that fits it. Every entity records how it was obtained and how
//! far it can be trusted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! elements (from the parser)
//!  │
//!  ├─ text     formatted as Markdown                       primary, 1.0
//!  ├─ table    converted, validated                        primary, 1.0
//!  │             └─ invalid: render 2× → vision extract    vision_fallback, 0.85
//!  │                  └─ still no table                    failed, 0.0
//!  └─ picture  classify → extract (text/table/diagram)     primary, classifier confidence
//!  │
//!  └─ entities E001… ─▶ final_document.md + manifest.yaml + entities/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2entities::{extract_to_dir, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let output = extract_to_dir("report.pdf", "report.elements.json", "output", &config).await?;
//!     eprintln!(
//!         "{} entities ({} recovered by fallback, {} need review)",
//!         output.stats.total_entities,
//!         output.stats.fallback_entities,
//!         output.stats.failed_entities
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2entities` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod element;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use convert::{extract_entities, extract_entities_sync, extract_to_dir, process_elements};
pub use element::{BoundingBox, ElementContent, ElementKind, StructuralElement};
pub use error::{PipelineError, RenderError, ServiceError, ValidationFailure};
pub use output::{
    Entity, EntityType, ExtractionMethod, ExtractionOutcome, ExtractionOutput, ExtractionStats,
    Manifest, ManifestEntry,
};
pub use pipeline::render::RegionRenderer;
pub use pipeline::retry::RetryPolicy;
pub use pipeline::vision::VisionBackend;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
