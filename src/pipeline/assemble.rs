//! Composite document and manifest assembly.
//!
//! The composite file lists every entity in position order behind a marker
//! line that keeps its provenance visible:
//!
//! ```text
//! <!-- Entity: E002 | Type: table | Page: 3 -->
//! ```
//!
//! Before anything is emitted the entity list is checked: positions must run
//! 1, 2, 3, … and ids must follow them. A gap or duplicate is a pipeline bug
//! and aborts the run with [`PipelineError::AssemblyInvariantViolation`].

use crate::error::PipelineError;
use crate::output::{Entity, EntityType, Manifest, ManifestEntry};
use crate::pipeline::entity::format_entity_id;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Build the composite document and the manifest for one run.
///
/// `source` is the input file name; `processed_date` is the run timestamp
/// already formatted for display.
pub fn assemble(
    entities: &[Entity],
    source: &str,
    processed_date: &str,
) -> Result<(String, Manifest), PipelineError> {
    check_invariants(entities)?;

    let manifest = build_manifest(entities, source, processed_date);
    check_manifest(&manifest)?;

    let document = render_document(entities, source, processed_date);
    debug!(
        "Assembled {} entities into {} bytes",
        entities.len(),
        document.len()
    );
    Ok((document, manifest))
}

/// Positions are `1..=n` in order and every id matches its position.
pub fn check_invariants(entities: &[Entity]) -> Result<(), PipelineError> {
    let mut seen = HashSet::with_capacity(entities.len());
    for (i, entity) in entities.iter().enumerate() {
        let expected = i + 1;
        if entity.position != expected {
            return Err(PipelineError::AssemblyInvariantViolation {
                detail: format!(
                    "{} has position {} at index {} (expected {})",
                    entity.id, entity.position, i, expected
                ),
            });
        }
        if !seen.insert(entity.id.as_str()) {
            return Err(PipelineError::AssemblyInvariantViolation {
                detail: format!("duplicate entity id {}", entity.id),
            });
        }
        if entity.id != format_entity_id(expected) {
            return Err(PipelineError::AssemblyInvariantViolation {
                detail: format!(
                    "entity at position {} has id {} (expected {})",
                    expected,
                    entity.id,
                    format_entity_id(expected)
                ),
            });
        }
    }
    Ok(())
}

/// `annual_report_2024.pdf` → `Annual Report 2024`.
pub fn document_title(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// `<!-- Entity: E001 | Type: table | Page: 3 -->`
pub fn entity_marker(entity: &Entity) -> String {
    format!(
        "<!-- Entity: {} | Type: {} | Page: {} -->",
        entity.id, entity.entity_type, entity.source_page
    )
}

fn render_document(entities: &[Entity], source: &str, processed_date: &str) -> String {
    let title = document_title(source);
    let mut parts = vec![
        "---".to_string(),
        format!("document_title: {}", quoted(&title)),
        format!("total_entities: {}", entities.len()),
        format!("processed_date: {}", quoted(processed_date)),
        format!("source_file: {}", quoted(source)),
        "---".to_string(),
        String::new(),
        format!("# Document: {}", title),
    ];

    for entity in entities {
        parts.push(format!("\n{}\n", entity_marker(entity)));
        let content = entity.content().trim_end();
        parts.push(match entity.entity_type {
            EntityType::Table => format!("```yaml\n{}\n```", content),
            EntityType::Diagram => format!("```mermaid\n{}\n```", content),
            EntityType::Mixed => match entity.content_language.as_deref() {
                Some(lang) => format!("```{}\n{}\n```", lang, content),
                None => content.to_string(),
            },
            EntityType::Text | EntityType::ImageText => content.to_string(),
        });
    }

    let mut document = parts.join("\n");
    document.push('\n');
    document
}

fn build_manifest(entities: &[Entity], source: &str, processed_date: &str) -> Manifest {
    let mut entity_type_counts = BTreeMap::new();
    for entity in entities {
        *entity_type_counts.entry(entity.entity_type).or_insert(0) += 1;
    }

    Manifest {
        source_document: source.to_string(),
        processed_date: processed_date.to_string(),
        total_entities: entities.len(),
        entity_type_counts,
        entities: entities
            .iter()
            .map(|e| ManifestEntry {
                id: e.id.clone(),
                entity_type: e.entity_type,
                page: e.source_page,
                position: e.position,
                confidence: e.confidence(),
                extraction_method: e.extraction_method(),
                file: e.relative_path(),
            })
            .collect(),
    }
}

fn check_manifest(manifest: &Manifest) -> Result<(), PipelineError> {
    let counted: usize = manifest.entity_type_counts.values().sum();
    if counted != manifest.total_entities || manifest.entities.len() != manifest.total_entities {
        return Err(PipelineError::AssemblyInvariantViolation {
            detail: format!(
                "manifest lists {} entities, counts sum to {}, total is {}",
                manifest.entities.len(),
                counted,
                manifest.total_entities
            ),
        });
    }
    Ok(())
}

fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
