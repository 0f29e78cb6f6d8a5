//! Entity construction and per-entity file rendering.
//!
//! Identifiers come from an explicit [`EntityCounter`] owned by one run, so
//! two runs in the same process never share a sequence.

use crate::element::StructuralElement;
use crate::output::{Entity, EntityType};
use crate::pipeline::router::RoutedContent;
use serde::Serialize;

/// Issues `E001`, `E002`, … together with the matching 1-based position.
#[derive(Debug)]
pub struct EntityCounter {
    next: usize,
}

impl Default for EntityCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl EntityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next identifier and position.
    pub fn next_id(&mut self) -> (String, usize) {
        let position = self.next;
        self.next += 1;
        (format_entity_id(position), position)
    }

    /// How many identifiers have been issued.
    pub fn issued(&self) -> usize {
        self.next - 1
    }
}

/// `7` → `E007`.
pub fn format_entity_id(position: usize) -> String {
    format!("E{:03}", position)
}

/// Turns routed content into entities in document order.
#[derive(Debug, Default)]
pub struct EntityBuilder {
    counter: EntityCounter,
    entities: Vec<Entity>,
}

impl EntityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entity for `routed`, taken from `element`.
    pub fn push(&mut self, element: &StructuralElement, routed: RoutedContent) -> &Entity {
        let (id, position) = self.counter.next_id();
        self.entities.push(Entity {
            id,
            entity_type: routed.entity_type,
            source_page: element.page,
            position,
            original_bbox: element.bbox,
            outcome: routed.outcome,
            has_surrounding_text: routed.has_surrounding_text,
            processing_notes: routed.notes,
            content_language: routed.content_language,
        });
        &self.entities[self.entities.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn finish(self) -> Vec<Entity> {
        self.entities
    }
}

/// Render the standalone file for one entity: metadata header plus content.
///
/// The header syntax follows the file type so every file stays valid:
/// YAML front matter for Markdown, `#` comments for the tabular format and
/// `%%` comments for Mermaid.
pub fn render_entity_file(entity: &Entity) -> String {
    let fields = header_fields(entity);
    let content = entity.content().trim_end();

    match entity.entity_type {
        EntityType::Table => format!("{}\n\n{}\n", comment_header(&fields, "#"), content),
        EntityType::Diagram => format!("{}\n\n{}\n", comment_header(&fields, "%%"), content),
        EntityType::Text | EntityType::ImageText | EntityType::Mixed => {
            let body: Vec<String> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            format!("---\n{}\n---\n\n{}\n", body.join("\n"), content)
        }
    }
}

fn comment_header(fields: &[(&'static str, String)], marker: &str) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{marker} {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Header keys in their fixed order, values as YAML flow scalars.
fn header_fields(entity: &Entity) -> Vec<(&'static str, String)> {
    vec![
        ("entity_id", scalar(&entity.id)),
        ("type", scalar(&entity.entity_type)),
        ("source_page", scalar(&entity.source_page)),
        ("position", scalar(&entity.position)),
        ("original_bbox", scalar(&entity.original_bbox)),
        ("confidence", scalar(&entity.confidence())),
        ("processing_notes", scalar(&entity.processing_notes)),
        ("extraction_method", scalar(&entity.extraction_method())),
        ("has_surrounding_text", scalar(&entity.has_surrounding_text)),
    ]
}

/// JSON scalars and flow sequences are valid YAML flow values.
fn scalar<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
