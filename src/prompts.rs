//! Prompts for the vision classification and extraction calls.
//!
//! Every response is requested as a single JSON object so the adapter can
//! validate it against a typed schema instead of scraping free text.

/// Classification prompt. The response feeds [`crate::pipeline::vision::ClassificationResult`].
pub const CLASSIFY_PROMPT: &str = r#"Analyze this image and classify its PRIMARY content type:

1. TEXT    - primarily readable text (paragraphs, lists, instructions)
2. TABLE   - structured data in rows and columns
3. DIAGRAM - flowcharts, process diagrams, organisational charts
4. MIXED   - a table or diagram together with a significant amount of prose

Also judge how much prose surrounds the main content and where it sits.

Respond with JSON only:
{
    "type": "text|table|diagram|mixed",
    "confidence": 0.0-1.0,
    "description": "brief description",
    "has_text": true/false,
    "has_table": true/false,
    "has_diagram": true/false,
    "text_significance": "none|low|medium|high",
    "text_location": "above|below|left|right|around|none",
    "primary_content": "text|table|diagram"
}"#;

/// Prose extraction prompt.
pub const EXTRACT_TEXT_PROMPT: &str = r#"Extract ALL text from this image as clean Markdown:
- Headings with ## and ###
- Lists with -
- Bold/italic where the image shows emphasis
- Preserve structure and reading order

Respond with JSON only:
{"type": "text", "content": "<markdown>"}"#;

/// Table extraction prompt.
pub const EXTRACT_TABLE_PROMPT: &str = r#"Extract the table from this image as structured data.

Requirements:
- Use meaningful keys taken from the column headers (not col1, col2)
- One object per data row, every row with the same keys
- Preserve all values exactly as printed

Respond with JSON only:
{"type": "table", "table": [{"name": "John Doe", "role": "Manager"}, {"name": "Jane Smith", "role": "Director"}]}"#;

/// Diagram extraction prompt.
pub const EXTRACT_DIAGRAM_PROMPT: &str = r#"Convert this diagram or flowchart to Mermaid syntax.

Requirements:
- Pick the fitting diagram type (graph, flowchart, sequenceDiagram, …)
- Keep every node and relationship
- Use clear, descriptive labels

Respond with JSON only; the Mermaid code goes in "diagram" without code fences:
{"type": "diagram", "diagram": "graph TD\n  A[Start] --> B[End]"}"#;

/// Appended to an extraction prompt when the picture carries meaningful prose
/// besides its main content.
pub const SURROUNDING_TEXT_SUFFIX: &str = r#"

The image also contains explanatory prose around the main content.
Transcribe that prose as Markdown into an additional "surrounding_text" field
of the same JSON object. Use an empty string if there is none."#;

/// Build the full extraction prompt for a target, with an optional
/// classifier description as a hint.
pub fn extraction_prompt(base: &str, with_surrounding_text: bool, description: Option<&str>) -> String {
    let mut prompt = String::from(base);
    if with_surrounding_text {
        prompt.push_str(SURROUNDING_TEXT_SUFFIX);
    }
    if let Some(desc) = description.filter(|d| !d.trim().is_empty()) {
        prompt.push_str("\n\nContext from a previous look at this image: ");
        prompt.push_str(desc.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prompt_names_every_field() {
        for field in [
            "\"type\"",
            "\"confidence\"",
            "\"has_table\"",
            "\"text_significance\"",
            "\"text_location\"",
            "\"primary_content\"",
        ] {
            assert!(CLASSIFY_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn extraction_prompt_appends_suffix_and_hint() {
        let p = extraction_prompt(EXTRACT_TABLE_PROMPT, true, Some("fuel price table"));
        assert!(p.starts_with(EXTRACT_TABLE_PROMPT));
        assert!(p.contains("surrounding_text"));
        assert!(p.ends_with("fuel price table"));

        let plain = extraction_prompt(EXTRACT_TABLE_PROMPT, false, Some("  "));
        assert_eq!(plain, EXTRACT_TABLE_PROMPT);
    }
}
