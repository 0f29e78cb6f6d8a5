//! Per-element extraction routing.
//!
//! ```text
//! text ────▶ format ───────────────────────────────────────▶ primary 1.0
//! table ───▶ convert ─▶ validate ─ ok ─────────────────────▶ primary 1.0
//!                            └─ fail ─▶ render 2× ─▶ extract ─▶ vision_fallback 0.85
//!                                                  └─ error ─▶ failed 0.0
//! picture ─▶ raster ─▶ classify ─▶ extract(target) ─▶ split ─▶ primary, classifier confidence
//! ```
//!
//! Routing never aborts the run: every element produces at least one
//! entity, and problems end up in `extraction_method`, confidence and
//! `processing_notes` of that entity.

use crate::config::PipelineConfig;
use crate::element::{BoundingBox, ElementContent, StructuralElement};
use crate::error::{RenderError, ServiceError, ValidationFailure};
use crate::output::{EntityType, ExtractionOutcome};
use crate::pipeline::encode::{encode_file, encode_image};
use crate::pipeline::postprocess::format_text_block;
use crate::pipeline::render::RegionRenderer;
use crate::pipeline::split::{compose, fence_language, split, surrounding_first, SplitContent};
use crate::pipeline::tabular::{convert_markdown_table, render_tabular};
use crate::pipeline::validate::validate;
use crate::pipeline::vision::{
    ClassificationResult, ContentKind, ExtractTarget, ExtractionHint, VisionClassifier,
};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// What routing produced for one entity, before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedContent {
    pub entity_type: EntityType,
    pub outcome: ExtractionOutcome,
    pub has_surrounding_text: bool,
    pub notes: String,
    /// Fence language when a mixed entity holds bare table or diagram content.
    pub content_language: Option<String>,
}

impl RoutedContent {
    fn new(entity_type: EntityType, outcome: ExtractionOutcome, notes: impl Into<String>) -> Self {
        Self {
            entity_type,
            outcome,
            has_surrounding_text: false,
            notes: notes.into(),
            content_language: None,
        }
    }
}

/// How a classified picture is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicturePlan {
    pub entity_type: EntityType,
    pub target: ExtractTarget,
    pub with_surrounding_text: bool,
}

/// Decide entity type, extraction target and prose handling for a picture.
///
/// A picture flagged as both table and diagram with little prose follows the
/// classifier's `primary_content` when it names one.
pub fn plan_picture(c: &ClassificationResult) -> PicturePlan {
    let mut kind = c.kind;
    if matches!(kind, ContentKind::Table | ContentKind::Diagram)
        && c.has_table
        && c.has_diagram
        && !c.text_significance.is_significant()
    {
        if let Some(primary) = c.primary_content {
            kind = primary;
        }
    }

    match kind {
        ContentKind::Text => PicturePlan {
            entity_type: EntityType::ImageText,
            target: ExtractTarget::Text,
            with_surrounding_text: false,
        },
        ContentKind::Table => PicturePlan {
            entity_type: EntityType::Table,
            target: ExtractTarget::Table,
            with_surrounding_text: c.text_significance.is_significant(),
        },
        ContentKind::Diagram => PicturePlan {
            entity_type: EntityType::Diagram,
            target: ExtractTarget::Diagram,
            with_surrounding_text: c.text_significance.is_significant(),
        },
        ContentKind::Mixed => PicturePlan {
            entity_type: EntityType::Mixed,
            target: c
                .primary_content
                .and_then(ContentKind::target)
                .unwrap_or(ExtractTarget::Text),
            with_surrounding_text: true,
        },
    }
}

/// Temporary PNG holding a rendered fallback region.
///
/// The file is removed when the value is dropped, on every path out of the
/// fallback.
pub struct ScratchRaster {
    file: NamedTempFile,
}

impl ScratchRaster {
    pub fn write(image: &DynamicImage, dir: Option<&Path>) -> Result<Self, String> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("temp_table_").suffix(".png");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| format!("cannot create scratch raster: {e}"))?;

        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|e| format!("cannot write scratch raster: {e}"))?;
        debug!("Scratch raster at {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Routes structural elements to their extraction path.
pub struct ExtractionRouter {
    renderer: Arc<dyn RegionRenderer>,
    vision: VisionClassifier,
    fallback_scale: f32,
    picture_scale: f32,
    max_image_pixels: u32,
    fallback_confidence: f32,
    scratch_dir: Option<PathBuf>,
    split_mixed_entities: bool,
    validate_picture_tables: bool,
}

impl ExtractionRouter {
    pub fn new(renderer: Arc<dyn RegionRenderer>, vision: VisionClassifier, config: &PipelineConfig) -> Self {
        Self {
            renderer,
            vision,
            fallback_scale: config.fallback_scale,
            picture_scale: config.picture_scale,
            max_image_pixels: config.max_image_pixels,
            fallback_confidence: config.fallback_confidence,
            scratch_dir: config.scratch_dir.clone(),
            split_mixed_entities: config.split_mixed_entities,
            validate_picture_tables: config.validate_picture_tables,
        }
    }

    /// Route one element. Returns one entity's worth of content, or two when
    /// a mixed picture is split.
    pub async fn route(&self, element: &StructuralElement) -> Vec<RoutedContent> {
        match &element.content {
            ElementContent::Text { text } => vec![self.route_text(text)],
            ElementContent::Table { markdown } => vec![self.route_table(element, markdown).await],
            ElementContent::Picture { image } => self.route_picture(element, image.as_deref()).await,
        }
    }

    // ── Text ────────────────────────────────────────────────────────────────

    fn route_text(&self, text: &str) -> RoutedContent {
        RoutedContent::new(
            EntityType::Text,
            ExtractionOutcome::primary(format_text_block(text)),
            "Native text extraction",
        )
    }

    // ── Tables ──────────────────────────────────────────────────────────────

    async fn route_table(&self, element: &StructuralElement, markdown: &str) -> RoutedContent {
        let converted = convert_markdown_table(markdown);
        match validate(&converted) {
            Ok(shape) => {
                debug!(
                    "Page {}: native table valid ({} rows, {} columns)",
                    element.page, shape.rows, shape.columns
                );
                RoutedContent::new(
                    EntityType::Table,
                    ExtractionOutcome::primary(converted),
                    format!(
                        "Native table extraction ({} rows, {} columns)",
                        shape.rows, shape.columns
                    ),
                )
            }
            Err(reason) => {
                warn!(
                    "Page {}: native table rejected ({}), trying vision fallback",
                    element.page, reason
                );
                self.table_fallback(element, reason).await
            }
        }
    }

    async fn table_fallback(&self, element: &StructuralElement, reason: ValidationFailure) -> RoutedContent {
        match self.run_table_fallback(element).await {
            Ok(content) => {
                info!("Page {}: table recovered by vision fallback", element.page);
                RoutedContent::new(
                    EntityType::Table,
                    ExtractionOutcome::vision_fallback(content, self.fallback_confidence, reason.to_string()),
                    format!("Vision fallback after validation failure: {reason}"),
                )
            }
            Err(fallback_error) => {
                warn!(
                    "Page {}: table extraction failed ({}; fallback: {})",
                    element.page, reason, fallback_error
                );
                let payload = json!({
                    "extraction_error": {
                        "validation_reason": reason.to_string(),
                        "fallback_error": fallback_error,
                        "page": element.page,
                        "bbox": element.bbox,
                        "action": "manual review required",
                    }
                });
                RoutedContent::new(
                    EntityType::Table,
                    ExtractionOutcome::failed(render_tabular(&payload), reason.to_string()),
                    format!("Extraction failed: {reason}; fallback: {fallback_error}"),
                )
            }
        }
    }

    /// Render the table region, keep it as a scratch PNG for the duration of
    /// the call, and ask the vision service for the table.
    async fn run_table_fallback(&self, element: &StructuralElement) -> Result<String, String> {
        let bbox = element
            .bbox
            .ok_or_else(|| "element has no bounding box".to_string())?;
        let region = self
            .render_region(element.page, bbox, self.fallback_scale)
            .await
            .map_err(|e| e.to_string())?;

        let scratch = ScratchRaster::write(&region, self.scratch_dir.as_deref())?;
        let image = encode_file(scratch.path(), self.max_image_pixels).map_err(|e| e.to_string())?;

        let label = format!("page {} table", element.page);
        let response = self
            .vision
            .extract(&image, ExtractTarget::Table, &ExtractionHint::default(), &label)
            .await
            .map_err(|e| e.to_string())?;
        drop(scratch);

        let content = split(&response).primary_content;
        validate(&content).map_err(|r| format!("fallback output rejected: {r}"))?;
        Ok(content)
    }

    async fn render_region(&self, page: usize, bbox: BoundingBox, scale: f32) -> Result<DynamicImage, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || renderer.render(page, &bbox, scale))
            .await
            .map_err(|e| RenderError::Backend {
                page,
                detail: format!("render task failed: {e}"),
            })?
    }

    // ── Pictures ────────────────────────────────────────────────────────────

    async fn route_picture(&self, element: &StructuralElement, image: Option<&Path>) -> Vec<RoutedContent> {
        let page = element.page;
        let label = format!("page {} picture", page);

        let image = match self.picture_raster(element, image).await {
            Ok(image) => image,
            Err(e) => {
                warn!("{}: no raster ({})", label, e);
                return vec![failed_picture(element, EntityType::ImageText, "raster", &e)];
            }
        };

        let classification = match self.vision.classify(&image, &label).await {
            Ok(c) => c,
            Err(e) => {
                warn!("{}: classification failed ({})", label, e);
                return vec![failed_picture(element, EntityType::ImageText, "classify", &e.to_string())];
            }
        };

        let plan = plan_picture(&classification);
        info!(
            "{}: classified {:?} ({:.2}) → {} via {} extraction{}",
            label,
            classification.kind,
            classification.confidence,
            plan.entity_type,
            plan.target,
            if plan.with_surrounding_text { " with surrounding text" } else { "" }
        );

        let hint = ExtractionHint {
            with_surrounding_text: plan.with_surrounding_text,
            description: Some(classification.description.clone()).filter(|d| !d.is_empty()),
        };
        let response = match self.vision.extract(&image, plan.target, &hint, &label).await {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: extraction failed ({})", label, e);
                return vec![failed_picture(element, plan.entity_type, "extract", &e.to_string())];
            }
        };

        let parts = split(&response);
        if self.validate_picture_tables && plan.target == ExtractTarget::Table {
            if let Err(reason) = validate(&parts.primary_content) {
                warn!("{}: picture table rejected ({})", label, reason);
                return vec![failed_picture(element, plan.entity_type, "validate", &reason.to_string())];
            }
        }

        self.place_picture_content(&classification, plan, parts)
    }

    /// Use the parser's crop when there is one, otherwise render the region.
    async fn picture_raster(&self, element: &StructuralElement, image: Option<&Path>) -> Result<ImageData, String> {
        if let Some(path) = image {
            return encode_file(path, self.max_image_pixels).map_err(|e| e.to_string());
        }
        let bbox = element
            .bbox
            .ok_or_else(|| "picture has neither an image nor a bounding box".to_string())?;
        let region = self
            .render_region(element.page, bbox, self.picture_scale)
            .await
            .map_err(|e| e.to_string())?;
        encode_image(&region, self.max_image_pixels).map_err(|e: ServiceError| e.to_string())
    }

    fn place_picture_content(
        &self,
        classification: &ClassificationResult,
        plan: PicturePlan,
        parts: SplitContent,
    ) -> Vec<RoutedContent> {
        let confidence = classification.confidence;
        let notes = picture_notes(classification);

        let Some(prose) = parts.surrounding_text.clone().filter(|_| self.split_mixed_entities) else {
            let content = compose(&parts, plan.entity_type);
            let content_language = (plan.entity_type == EntityType::Mixed && !parts.has_surrounding_text())
                .then(|| fence_language(parts.target))
                .flatten()
                .map(String::from);
            return vec![RoutedContent {
                entity_type: plan.entity_type,
                outcome: ExtractionOutcome::classified(content, confidence),
                has_surrounding_text: parts.has_surrounding_text(),
                notes,
                content_language,
            }];
        };

        let content_type = match plan.target {
            ExtractTarget::Text => EntityType::ImageText,
            ExtractTarget::Table => EntityType::Table,
            ExtractTarget::Diagram => EntityType::Diagram,
        };
        let prose_entity = RoutedContent::new(
            EntityType::ImageText,
            ExtractionOutcome::classified(prose, confidence),
            format!("Surrounding text ({}); {}", classification.text_location, notes),
        );
        let content_entity = RoutedContent {
            entity_type: content_type,
            outcome: ExtractionOutcome::classified(parts.primary_content, confidence),
            has_surrounding_text: true,
            notes,
            content_language: None,
        };

        if surrounding_first(&classification.text_location) {
            vec![prose_entity, content_entity]
        } else {
            vec![content_entity, prose_entity]
        }
    }
}

fn picture_notes(c: &ClassificationResult) -> String {
    let kind = serde_json::to_value(c.kind)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    if c.description.is_empty() {
        format!("Classified as {} ({:.2})", kind, c.confidence)
    } else {
        format!("Classified as {} ({:.2}): {}", kind, c.confidence, c.description)
    }
}

/// A picture that could not be extracted; `stage` names the step that failed.
fn failed_picture(element: &StructuralElement, entity_type: EntityType, stage: &str, error: &str) -> RoutedContent {
    let payload = json!({
        "extraction_error": {
            "stage": stage,
            "error": error,
            "page": element.page,
            "bbox": element.bbox,
            "action": "manual review required",
        }
    });
    RoutedContent::new(
        entity_type,
        ExtractionOutcome::failed(failure_content(entity_type, &payload), error),
        format!("Picture {stage} failed: {error}"),
    )
}

/// Error payload in the syntax of the entity file.
fn failure_content(entity_type: EntityType, payload: &Value) -> String {
    match entity_type {
        EntityType::Table => render_tabular(payload),
        EntityType::Diagram => render_tabular(payload)
            .lines()
            .map(|l| format!("%% {l}"))
            .collect::<Vec<_>>()
            .join("\n"),
        EntityType::Text | EntityType::ImageText | EntityType::Mixed => {
            format!("<!-- extraction error\n{}\n-->", render_tabular(payload))
        }
    }
}
