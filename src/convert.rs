//! Top-level entry points.
//!
//! [`extract_entities`] is the usual way in: give it the PDF and the parser's
//! element list, get back entities, the composite document and the manifest.
//! [`process_elements`] runs the same loop with caller-supplied renderer and
//! vision backend, which is how tests and embedders with their own
//! rasteriser use the pipeline.

use crate::config::PipelineConfig;
use crate::element::StructuralElement;
use crate::error::PipelineError;
use crate::output::{ExtractionMethod, ExtractionOutput, ExtractionStats};
use crate::pipeline::assemble::assemble;
use crate::pipeline::entity::EntityBuilder;
use crate::pipeline::input;
use crate::pipeline::render::{PdfiumRegionRenderer, RegionRenderer};
use crate::pipeline::router::ExtractionRouter;
use crate::pipeline::vision::{LlmVisionBackend, VisionBackend, VisionClassifier};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Extract entities from `pdf` using the parser's `elements`.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever the run completes, including runs where
/// some elements degraded to `failed` (check `output.stats.failed_entities`).
///
/// # Errors
/// Returns `Err(PipelineError)` only for fatal errors:
/// - PDF not found, unreadable or not a PDF
/// - no vision provider could be configured
/// - entity ordering corrupted during assembly
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2entities::{extract_entities, PipelineConfig, StructuralElement};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let elements: Vec<StructuralElement> =
///     serde_json::from_str(&std::fs::read_to_string("report.elements.json")?)?;
/// let output = extract_entities("report.pdf", &elements, &PipelineConfig::default()).await?;
/// output.write_to_dir("output").await?;
/// # Ok(())
/// # }
/// ```
pub async fn extract_entities(
    pdf: impl AsRef<Path>,
    elements: &[StructuralElement],
    config: &PipelineConfig,
) -> Result<ExtractionOutput, PipelineError> {
    let pdf_path = input::resolve_local_pdf(pdf)?;
    info!("Starting extraction: {}", pdf_path.display());

    let provider = resolve_provider(config)?;
    let backend: Arc<dyn VisionBackend> = Arc::new(LlmVisionBackend::new(provider, config));
    let renderer: Arc<dyn RegionRenderer> =
        Arc::new(PdfiumRegionRenderer::new(&pdf_path, config.password.clone()));

    let source = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf_path.display().to_string());

    process_elements(elements, renderer, backend, &source, config).await
}

/// Synchronous wrapper around [`extract_entities`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_entities_sync(
    pdf: impl AsRef<Path>,
    elements: &[StructuralElement],
    config: &PipelineConfig,
) -> Result<ExtractionOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_entities(pdf, elements, config))
}

/// Load the element list from `elements_json`, extract, and write all
/// artifacts into `out_dir`.
pub async fn extract_to_dir(
    pdf: impl AsRef<Path>,
    elements_json: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ExtractionOutput, PipelineError> {
    let elements = input::load_elements(elements_json).await?;
    let output = extract_entities(pdf, &elements, config).await?;
    output.write_to_dir(out_dir).await?;
    Ok(output)
}

/// Run the extraction loop with explicit collaborators.
///
/// Elements are handled one at a time in document order; entity ids and
/// positions follow that order. `source` is the document name recorded in the
/// composite front matter and the manifest.
pub async fn process_elements(
    elements: &[StructuralElement],
    renderer: Arc<dyn RegionRenderer>,
    backend: Arc<dyn VisionBackend>,
    source: &str,
    config: &PipelineConfig,
) -> Result<ExtractionOutput, PipelineError> {
    let start = Instant::now();
    let total = elements.len();
    let callback = config.progress_callback.as_ref();

    let router = ExtractionRouter::new(renderer, VisionClassifier::new(backend, config), config);
    let mut builder = EntityBuilder::new();

    if let Some(cb) = callback {
        cb.on_run_start(total);
    }

    for (i, element) in elements.iter().enumerate() {
        let index = i + 1;
        debug!(
            "Element {}/{}: {} on page {}",
            index,
            total,
            element.kind(),
            element.page
        );
        if let Some(cb) = callback {
            cb.on_element_start(index, total, element.kind(), element.page);
        }

        for routed in router.route(element).await {
            let entity = builder.push(element, routed);
            if let Some(cb) = callback {
                cb.on_entity_complete(&entity.id, entity.entity_type, entity.extraction_method());
                if entity.outcome.is_failed() {
                    cb.on_element_failed(index, total, &entity.processing_notes);
                }
            }
        }
    }

    let entities = builder.finish();
    let processed_date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let (document, manifest) = assemble(&entities, source, &processed_date)?;

    let count = |method: ExtractionMethod| {
        entities
            .iter()
            .filter(|e| e.extraction_method() == method)
            .count()
    };
    let stats = ExtractionStats {
        total_elements: total,
        total_entities: entities.len(),
        primary_entities: count(ExtractionMethod::Primary),
        fallback_entities: count(ExtractionMethod::VisionFallback),
        failed_entities: count(ExtractionMethod::Failed),
        total_duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} entities from {} elements ({} fallback, {} failed), {}ms",
        stats.total_entities,
        stats.total_elements,
        stats.fallback_entities,
        stats.failed_entities,
        stats.total_duration_ms
    );

    if let Some(cb) = callback {
        cb.on_run_complete(stats.total_entities, stats.failed_entities);
    }

    Ok(ExtractionOutput {
        document,
        entities,
        manifest,
        stats,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as is
/// 2. `config.provider_name` with `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. OpenAI, when `OPENAI_API_KEY` is set
/// 5. whatever [`ProviderFactory::from_env`] detects
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
