//! Mixed-content splitting.
//!
//! A picture can hold a table or a diagram plus explanatory prose. The
//! extraction reply then carries the prose in `surrounding_text`. This module
//! separates the two parts and decides how they are laid out:
//!
//! * no surrounding prose: the primary content is used verbatim and
//!   `has_surrounding_text` stays false
//! * one entity (default): the prose becomes a preface in the syntax of the
//!   entity file (`%%` lines for Mermaid, `#` lines for the tabular format,
//!   plain paragraphs followed by a fenced block for `mixed` entities)
//! * two entities: the prose and the content are emitted separately, ordered
//!   by where the classifier saw the prose

use crate::output::EntityType;
use crate::pipeline::tabular::wrap_table_value;
use crate::pipeline::vision::{ExtractTarget, ExtractionResponse};

/// The two parts of an extraction reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitContent {
    /// Prose around the main content; `None` when absent or blank.
    pub surrounding_text: Option<String>,
    /// The main content in its target format.
    pub primary_content: String,
    pub target: ExtractTarget,
}

impl SplitContent {
    pub fn has_surrounding_text(&self) -> bool {
        self.surrounding_text.is_some()
    }
}

/// Separate the surrounding prose from the main content.
pub fn split(response: &ExtractionResponse) -> SplitContent {
    let primary_content = match response {
        ExtractionResponse::Text { content, .. } => content.clone(),
        ExtractionResponse::Table { table, .. } => wrap_table_value(table),
        ExtractionResponse::Diagram { diagram, .. } => diagram.clone(),
    };
    SplitContent {
        surrounding_text: response
            .surrounding_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from),
        primary_content,
        target: response.target(),
    }
}

/// Lay both parts out as the content of one entity of `entity_type`.
pub fn compose(parts: &SplitContent, entity_type: EntityType) -> String {
    let Some(prose) = parts.surrounding_text.as_deref() else {
        return parts.primary_content.clone();
    };

    if entity_type == EntityType::Mixed {
        return match fence_language(parts.target) {
            Some(lang) => format!(
                "{}\n\n```{}\n{}\n```",
                prose,
                lang,
                parts.primary_content.trim_end()
            ),
            None => format!("{}\n\n{}", prose, parts.primary_content),
        };
    }

    match parts.target {
        ExtractTarget::Diagram => format!("{}\n{}", comment_block(prose, "%%"), parts.primary_content),
        ExtractTarget::Table => format!("{}\n{}", comment_block(prose, "#"), parts.primary_content),
        ExtractTarget::Text => format!("{}\n\n{}", prose, parts.primary_content),
    }
}

/// Whether the prose entity comes before the content entity when split.
///
/// Only prose the classifier located above the content precedes it.
pub fn surrounding_first(text_location: &str) -> bool {
    text_location.to_ascii_lowercase().contains("above")
}

/// Code-fence language for a target embedded in prose.
pub fn fence_language(target: ExtractTarget) -> Option<&'static str> {
    match target {
        ExtractTarget::Table => Some("yaml"),
        ExtractTarget::Diagram => Some("mermaid"),
        ExtractTarget::Text => None,
    }
}

fn comment_block(prose: &str, marker: &str) -> String {
    prose
        .lines()
        .map(|l| {
            let l = l.trim_end();
            if l.is_empty() {
                marker.to_string()
            } else {
                format!("{marker} {l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diagram(surrounding: Option<&str>) -> ExtractionResponse {
        ExtractionResponse::Diagram {
            diagram: "graph TD\n  A-->B".into(),
            surrounding_text: surrounding.map(String::from),
        }
    }

    #[test]
    fn absent_or_blank_prose_leaves_content_untouched() {
        for response in [diagram(None), diagram(Some("   \n"))] {
            let parts = split(&response);
            assert!(!parts.has_surrounding_text());
            assert_eq!(compose(&parts, EntityType::Diagram), "graph TD\n  A-->B");
            assert_eq!(compose(&parts, EntityType::Mixed), "graph TD\n  A-->B");
        }
    }

    #[test]
    fn diagram_prose_becomes_mermaid_comments() {
        let parts = split(&diagram(Some("Approval flow.\n\nSee section 4.")));
        assert!(parts.has_surrounding_text());
        assert_eq!(
            compose(&parts, EntityType::Diagram),
            "%% Approval flow.\n%%\n%% See section 4.\ngraph TD\n  A-->B"
        );
    }

    #[test]
    fn table_prose_becomes_yaml_comments() {
        let parts = split(&ExtractionResponse::Table {
            table: json!([{"a": "1", "b": "2"}]),
            surrounding_text: Some("Prices in EUR.".into()),
        });
        let out = compose(&parts, EntityType::Table);
        assert!(out.starts_with("# Prices in EUR.\n{"));
        let body: serde_json::Value = serde_json::from_str(&out["# Prices in EUR.\n".len()..]).unwrap();
        assert_eq!(body, json!({"table": [{"a": "1", "b": "2"}]}));
    }

    #[test]
    fn mixed_entity_gets_prose_then_fence() {
        let parts = split(&diagram(Some("Approval flow.")));
        assert_eq!(
            compose(&parts, EntityType::Mixed),
            "Approval flow.\n\n```mermaid\ngraph TD\n  A-->B\n```"
        );
    }

    #[test]
    fn text_target_prose_is_a_preface() {
        let parts = split(&ExtractionResponse::Text {
            content: "Body of the figure.".into(),
            surrounding_text: Some("Intro prose above.".into()),
        });
        assert!(parts.has_surrounding_text());
        assert_eq!(parts.target, ExtractTarget::Text);
        assert_eq!(
            compose(&parts, EntityType::Mixed),
            "Intro prose above.\n\nBody of the figure."
        );
    }

    #[test]
    fn ordering_follows_text_location() {
        assert!(surrounding_first("above"));
        assert!(surrounding_first("Above the chart"));
        assert!(!surrounding_first("below"));
        assert!(!surrounding_first("around"));
        assert!(!surrounding_first("none"));
    }
}
