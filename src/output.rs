//! Output types: entities, the manifest, and the run summary.

use crate::element::BoundingBox;
use crate::error::PipelineError;
use crate::pipeline::entity::render_entity_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the composite artifact inside the output directory.
pub const DOCUMENT_FILE: &str = "final_document.md";
/// Name of the manifest inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";
/// Sub-directory holding one file per entity.
pub const ENTITIES_DIR: &str = "entities";

/// Canonical entity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Text,
    Table,
    Diagram,
    ImageText,
    Mixed,
}

impl EntityType {
    /// File extension of the serialised entity.
    pub fn extension(self) -> &'static str {
        match self {
            EntityType::Text | EntityType::ImageText | EntityType::Mixed => ".md",
            EntityType::Table => ".yaml",
            EntityType::Diagram => ".mmd",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Text => "text",
            EntityType::Table => "table",
            EntityType::Diagram => "diagram",
            EntityType::ImageText => "image_text",
            EntityType::Mixed => "mixed",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extraction path produced an entity's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Primary,
    VisionFallback,
    Failed,
}

impl ExtractionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::Primary => "primary",
            ExtractionMethod::VisionFallback => "vision_fallback",
            ExtractionMethod::Failed => "failed",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest and highest confidence a non-validated, non-failed outcome may carry.
const UNVERIFIED_CONFIDENCE: (f32, f32) = (0.01, 0.99);

/// Extracted content plus how much it can be trusted.
///
/// Only the constructors can build an outcome, which keeps the confidence
/// contract in one place: `1.0` only for validated primary extraction, `0.0`
/// only for failures, strictly between otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    content: String,
    method: ExtractionMethod,
    confidence: f32,
    reason: Option<String>,
}

impl ExtractionOutcome {
    /// Primary extraction whose output was checked (or needs no check).
    pub fn primary(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            method: ExtractionMethod::Primary,
            confidence: 1.0,
            reason: None,
        }
    }

    /// Primary extraction with no independent ground truth; carries the
    /// classifier's confidence.
    pub fn classified(content: impl Into<String>, confidence: f32) -> Self {
        Self {
            content: content.into(),
            method: ExtractionMethod::Primary,
            confidence: clamp_unverified(confidence),
            reason: None,
        }
    }

    /// Content recovered by the vision fallback after primary output failed.
    pub fn vision_fallback(
        content: impl Into<String>,
        confidence: f32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            method: ExtractionMethod::VisionFallback,
            confidence: clamp_unverified(confidence),
            reason: Some(reason.into()),
        }
    }

    /// Every path failed; `content` is an error payload for human review.
    pub fn failed(content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            method: ExtractionMethod::Failed,
            confidence: 0.0,
            reason: Some(reason.into()),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.method == ExtractionMethod::Failed
    }
}

fn clamp_unverified(confidence: f32) -> f32 {
    let (lo, hi) = UNVERIFIED_CONFIDENCE;
    if confidence.is_nan() {
        return lo;
    }
    confidence.clamp(lo, hi)
}

/// One canonical, provenance-tagged unit of extracted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Sequential identifier: `E001`, `E002`, …
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// 1-indexed source page.
    pub source_page: usize,
    /// 1-based ordinal in the document.
    pub position: usize,
    pub original_bbox: Option<BoundingBox>,
    pub outcome: ExtractionOutcome,
    pub has_surrounding_text: bool,
    pub processing_notes: String,
    /// Fence language for the composite document when a mixed entity holds
    /// bare structured content (`yaml`, `mermaid`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
}

impl Entity {
    pub fn extension(&self) -> &'static str {
        self.entity_type.extension()
    }

    /// `E001_table.yaml`
    pub fn file_name(&self) -> String {
        format!("{}_{}{}", self.id, self.entity_type, self.extension())
    }

    /// Path relative to the output directory, as recorded in the manifest.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", ENTITIES_DIR, self.file_name())
    }

    pub fn content(&self) -> &str {
        self.outcome.content()
    }

    pub fn confidence(&self) -> f32 {
        self.outcome.confidence()
    }

    pub fn extraction_method(&self) -> ExtractionMethod {
        self.outcome.method()
    }
}

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub page: usize,
    pub position: usize,
    pub confidence: f32,
    pub extraction_method: ExtractionMethod,
    pub file: String,
}

/// Run-level summary enumerating every entity with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source_document: String,
    pub processed_date: String,
    pub total_entities: usize,
    pub entity_type_counts: BTreeMap<EntityType, usize>,
    pub entities: Vec<ManifestEntry>,
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_elements: usize,
    pub total_entities: usize,
    pub primary_entities: usize,
    pub fallback_entities: usize,
    pub failed_entities: usize,
    pub total_duration_ms: u64,
}

/// Everything a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The composite Markdown artifact.
    pub document: String,
    /// Entities in position order.
    pub entities: Vec<Entity>,
    pub manifest: Manifest,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Persist entity files, the composite document and the manifest.
    ///
    /// Layout:
    /// ```text
    /// <dir>/final_document.md
    /// <dir>/manifest.yaml
    /// <dir>/entities/E001_text.md
    /// <dir>/entities/E002_table.yaml
    /// ```
    ///
    /// Every file is written to a temporary sibling and renamed into place.
    /// Returns the path of the composite document.
    pub async fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, PipelineError> {
        let dir = dir.as_ref();
        let entities_dir = dir.join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&entities_dir)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: entities_dir.clone(),
                source: e,
            })?;

        for entity in &self.entities {
            let path = entities_dir.join(entity.file_name());
            write_atomic(&path, &render_entity_file(entity)).await?;
        }

        // Pretty JSON is a valid YAML document.
        let manifest_yaml = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| PipelineError::Internal(format!("manifest serialisation: {e}")))?;
        write_atomic(&dir.join(MANIFEST_FILE), &manifest_yaml).await?;

        let document_path = dir.join(DOCUMENT_FILE);
        write_atomic(&document_path, &self.document).await?;

        info!(
            "Wrote {} entity files, manifest and document to {}",
            self.entities.len(),
            dir.display()
        );
        Ok(document_path)
    }
}

/// Atomic write: temp file next to the target, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), PipelineError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
