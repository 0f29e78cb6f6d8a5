//! Integration tests for the extraction loop.
//!
//! Rendering and the vision service are replaced by in-process doubles, so
//! these run without pdfium or an API key:
//!
//!   cargo test --test pipeline

use edgequake_llm::ImageData;
use edgequake_pdf2entities::{
    process_elements, BoundingBox, ElementKind, EntityType, ExtractionMethod,
    ExtractionProgressCallback, PipelineConfig, RegionRenderer, RenderError, RetryPolicy,
    ServiceError, StructuralElement, VisionBackend,
};
use futures::future::BoxFuture;
use image::DynamicImage;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Replays canned replies in order and records every prompt it sees.
struct ScriptedVision {
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedVision {
    fn new(replies: Vec<Result<&str, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl VisionBackend for ScriptedVision {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        _image: &'a ImageData,
    ) -> BoxFuture<'a, Result<String, ServiceError>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ServiceError::Api {
                detail: "script exhausted".into(),
            })
        });
        Box::pin(async move { next })
    }
}

/// Renders a blank region, or fails every call.
struct StubRenderer {
    fail: bool,
    calls: AtomicUsize,
}

impl StubRenderer {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

impl RegionRenderer for StubRenderer {
    fn render(&self, page: usize, bbox: &BoundingBox, scale: f32) -> Result<DynamicImage, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RenderError::Backend {
                page,
                detail: "stub renderer failure".into(),
            });
        }
        let w = (bbox.width() * scale as f64).max(1.0) as u32;
        let h = (bbox.height() * scale as f64).max(1.0) as u32;
        Ok(DynamicImage::new_rgb8(w.min(200), h.min(200)))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

const EMPTY_TABLE: &str = "| Region | Sales |\n|---|---|";
const GOOD_TABLE: &str = "| Region | Sales |\n|---|---|\n| North | 120 |\n| South | 95 |";

const FALLBACK_TABLE_REPLY: &str = r#"{"type": "table", "table": [{"Region": "North", "Sales": "120"}, {"Region": "South", "Sales": "95"}]}"#;
const DIAGRAM_CLASSIFY_REPLY: &str = r#"{"type": "diagram", "confidence": 0.92, "description": "Approval flow", "has_diagram": true, "text_significance": "low", "text_location": "none"}"#;
const DIAGRAM_EXTRACT_REPLY: &str = r#"{"type": "diagram", "diagram": "graph TD\n  A[Submit] --> B[Approve]"}"#;

fn bbox() -> Option<BoundingBox> {
    Some(BoundingBox::new(72.0, 100.0, 300.0, 300.0))
}

fn three_elements() -> Vec<StructuralElement> {
    vec![
        StructuralElement::text(1, bbox(), "Quarterly results improved across all regions."),
        StructuralElement::table(2, bbox(), EMPTY_TABLE),
        StructuralElement::picture(3, bbox(), None),
    ]
}

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .retry(RetryPolicy::immediate(3))
        .build()
        .unwrap()
}

fn mixed_classify_reply(location: &str) -> String {
    format!(
        r#"{{"type": "mixed", "confidence": 0.7, "description": "Table with notes", "has_text": true, "has_table": true, "text_significance": "high", "text_location": "{location}", "primary_content": "table"}}"#
    )
}

const MIXED_EXTRACT_REPLY: &str = r#"{"type": "table", "table": [{"Item": "Bolts", "Qty": "40"}], "surrounding_text": "Stock counted on 1 March."}"#;

// ── End-to-end scenario ──────────────────────────────────────────────────────

#[tokio::test]
async fn text_table_fallback_and_diagram() {
    let vision = ScriptedVision::new(vec![
        Ok(FALLBACK_TABLE_REPLY),
        Ok(DIAGRAM_CLASSIFY_REPLY),
        Ok(DIAGRAM_EXTRACT_REPLY),
    ]);
    let renderer = StubRenderer::ok();
    let output = process_elements(&three_elements(), renderer.clone(), vision.clone(), "report.pdf", &config())
        .await
        .unwrap();

    assert_eq!(output.entities.len(), 3);
    assert_eq!(vision.calls(), 3);
    // one render for the table fallback, one for the picture
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);

    let text = &output.entities[0];
    assert_eq!(text.id, "E001");
    assert_eq!(text.entity_type, EntityType::Text);
    assert_eq!(text.extraction_method(), ExtractionMethod::Primary);
    assert_eq!(text.confidence(), 1.0);

    let table = &output.entities[1];
    assert_eq!(table.id, "E002");
    assert_eq!(table.entity_type, EntityType::Table);
    assert_eq!(table.extraction_method(), ExtractionMethod::VisionFallback);
    assert_eq!(table.confidence(), 0.85);
    let parsed: Value = serde_json::from_str(table.content()).unwrap();
    assert_eq!(parsed["table"].as_array().unwrap().len(), 2);
    assert_eq!(parsed["table"][1]["Region"], "South");

    let diagram = &output.entities[2];
    assert_eq!(diagram.id, "E003");
    assert_eq!(diagram.entity_type, EntityType::Diagram);
    assert_eq!(diagram.extraction_method(), ExtractionMethod::Primary);
    assert!((diagram.confidence() - 0.92).abs() < 1e-6);
    assert!(!diagram.has_surrounding_text);
    assert!(diagram.content().starts_with("graph TD"));

    assert_eq!(output.stats.total_elements, 3);
    assert_eq!(output.stats.fallback_entities, 1);
    assert_eq!(output.stats.failed_entities, 0);

    let doc = &output.document;
    assert!(doc.contains("# Document: Report"));
    let e1 = doc.find("<!-- Entity: E001 | Type: text | Page: 1 -->").unwrap();
    let e2 = doc.find("<!-- Entity: E002 | Type: table | Page: 2 -->").unwrap();
    let e3 = doc.find("<!-- Entity: E003 | Type: diagram | Page: 3 -->").unwrap();
    assert!(e1 < e2 && e2 < e3);
    assert!(doc.contains("```yaml"));
    assert!(doc.contains("```mermaid"));
}

#[tokio::test]
async fn valid_native_table_skips_the_vision_service() {
    let vision = ScriptedVision::new(vec![]);
    let renderer = StubRenderer::ok();
    let elements = vec![StructuralElement::table(1, bbox(), GOOD_TABLE)];
    let output = process_elements(&elements, renderer.clone(), vision.clone(), "a.pdf", &config())
        .await
        .unwrap();

    assert_eq!(vision.calls(), 0);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    let entity = &output.entities[0];
    assert_eq!(entity.extraction_method(), ExtractionMethod::Primary);
    assert_eq!(entity.confidence(), 1.0);
    assert!(entity.processing_notes.contains("2 rows, 2 columns"));
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_degrades_table_to_failed() {
    let vision = ScriptedVision::new(vec![]);
    let elements = vec![
        StructuralElement::table(4, bbox(), EMPTY_TABLE),
        StructuralElement::text(4, None, "After the table."),
    ];
    let output = process_elements(&elements, StubRenderer::failing(), vision.clone(), "a.pdf", &config())
        .await
        .unwrap();

    assert_eq!(vision.calls(), 0);
    assert_eq!(output.entities.len(), 2);

    let failed = &output.entities[0];
    assert_eq!(failed.entity_type, EntityType::Table);
    assert_eq!(failed.extraction_method(), ExtractionMethod::Failed);
    assert_eq!(failed.confidence(), 0.0);
    let payload: Value = serde_json::from_str(failed.content()).unwrap();
    let err = &payload["extraction_error"];
    assert_eq!(err["action"], "manual review required");
    assert_eq!(err["page"], 4);
    assert!(err["fallback_error"].as_str().unwrap().contains("stub renderer failure"));

    // The run continues past the failure.
    assert_eq!(output.entities[1].extraction_method(), ExtractionMethod::Primary);
    assert_eq!(output.stats.failed_entities, 1);
}

#[tokio::test]
async fn fallback_that_still_finds_no_table_is_failed() {
    let vision = ScriptedVision::new(vec![Ok(r#"{"type": "table", "table": []}"#)]);
    let elements = vec![StructuralElement::table(1, bbox(), EMPTY_TABLE)];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config())
        .await
        .unwrap();

    let entity = &output.entities[0];
    assert_eq!(entity.extraction_method(), ExtractionMethod::Failed);
    assert_eq!(entity.confidence(), 0.0);
    assert!(entity.processing_notes.contains("fallback output rejected"));
}

#[tokio::test]
async fn vision_errors_are_retried_then_degrade() {
    let vision = ScriptedVision::new(vec![
        Err(ServiceError::Api { detail: "503".into() }),
        Ok("not json at all"),
        Err(ServiceError::Timeout { secs: 60 }),
    ]);
    let elements = vec![StructuralElement::picture(2, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision.clone(), "a.pdf", &config())
        .await
        .unwrap();

    assert_eq!(vision.calls(), 3);
    let entity = &output.entities[0];
    assert_eq!(entity.entity_type, EntityType::ImageText);
    assert_eq!(entity.extraction_method(), ExtractionMethod::Failed);
    assert!(entity.content().contains("manual review required"));
}

#[tokio::test]
async fn picture_without_raster_source_fails_without_calls() {
    let vision = ScriptedVision::new(vec![]);
    let elements = vec![StructuralElement::picture(1, None, None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision.clone(), "a.pdf", &config())
        .await
        .unwrap();

    assert_eq!(vision.calls(), 0);
    assert_eq!(output.entities[0].extraction_method(), ExtractionMethod::Failed);
}

// ── Scratch rasters ──────────────────────────────────────────────────────────

#[tokio::test]
async fn scratch_rasters_are_removed_after_success_and_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .retry(RetryPolicy::immediate(2))
        .scratch_dir(scratch.path())
        .build()
        .unwrap();

    let vision = ScriptedVision::new(vec![
        Ok(FALLBACK_TABLE_REPLY),
        Err(ServiceError::Api { detail: "down".into() }),
        Err(ServiceError::Api { detail: "down".into() }),
    ]);
    let elements = vec![
        StructuralElement::table(1, bbox(), EMPTY_TABLE),
        StructuralElement::table(2, bbox(), EMPTY_TABLE),
    ];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config)
        .await
        .unwrap();

    assert_eq!(output.entities[0].extraction_method(), ExtractionMethod::VisionFallback);
    assert_eq!(output.entities[1].extraction_method(), ExtractionMethod::Failed);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

// ── Mixed pictures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_picture_is_one_entity_by_default() {
    let classify = mixed_classify_reply("above");
    let vision = ScriptedVision::new(vec![Ok(classify.as_str()), Ok(MIXED_EXTRACT_REPLY)]);
    let elements = vec![StructuralElement::picture(5, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config())
        .await
        .unwrap();

    assert_eq!(output.entities.len(), 1);
    let entity = &output.entities[0];
    assert_eq!(entity.entity_type, EntityType::Mixed);
    assert!(entity.has_surrounding_text);
    assert!((entity.confidence() - 0.7).abs() < 1e-6);
    assert!(entity.content().starts_with("Stock counted on 1 March.\n\n```yaml\n"));
    assert!(entity.content().ends_with("```"));
}

const MIXED_TEXT_CLASSIFY_REPLY: &str = r#"{"type": "mixed", "confidence": 0.75, "description": "Captioned figure", "has_text": true, "text_significance": "high", "text_location": "above"}"#;
const MIXED_TEXT_EXTRACT_REPLY: &str = r#"{"type": "text", "content": "Body of the figure.", "surrounding_text": "Intro prose above."}"#;

#[tokio::test]
async fn mixed_picture_with_text_target_keeps_prose() {
    let vision = ScriptedVision::new(vec![Ok(MIXED_TEXT_CLASSIFY_REPLY), Ok(MIXED_TEXT_EXTRACT_REPLY)]);
    let elements = vec![StructuralElement::picture(2, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision.clone(), "a.pdf", &config())
        .await
        .unwrap();

    assert!(vision.prompts.lock().unwrap()[1].contains("surrounding_text"));
    assert_eq!(output.entities.len(), 1);
    let entity = &output.entities[0];
    assert_eq!(entity.entity_type, EntityType::Mixed);
    assert!(entity.has_surrounding_text);
    assert_eq!(entity.content(), "Intro prose above.\n\nBody of the figure.");
}

#[tokio::test]
async fn split_mixed_text_target_emits_prose_first() {
    let config = PipelineConfig::builder()
        .retry(RetryPolicy::immediate(1))
        .split_mixed_entities(true)
        .build()
        .unwrap();
    let vision = ScriptedVision::new(vec![Ok(MIXED_TEXT_CLASSIFY_REPLY), Ok(MIXED_TEXT_EXTRACT_REPLY)]);
    let elements = vec![StructuralElement::picture(2, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config)
        .await
        .unwrap();

    let contents: Vec<&str> = output.entities.iter().map(|e| e.content()).collect();
    assert_eq!(contents, ["Intro prose above.", "Body of the figure."]);
    assert!(output.entities.iter().all(|e| e.entity_type == EntityType::ImageText));
    assert!(output.entities[1].has_surrounding_text);
}

#[tokio::test]
async fn mixed_table_without_prose_is_fenced_in_document() {
    let classify = mixed_classify_reply("none");
    let vision = ScriptedVision::new(vec![
        Ok(classify.as_str()),
        Ok(r#"{"type": "table", "table": [{"Item": "Bolts", "Qty": "40"}]}"#),
    ]);
    let elements = vec![StructuralElement::picture(5, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config())
        .await
        .unwrap();

    let entity = &output.entities[0];
    assert_eq!(entity.entity_type, EntityType::Mixed);
    assert!(!entity.has_surrounding_text);
    // The entity keeps the bare table; the composite document fences it.
    assert!(entity.content().starts_with('{'));
    let marker = "<!-- Entity: E001 | Type: mixed | Page: 5 -->\n\n```yaml\n{";
    assert!(output.document.contains(marker), "{}", output.document);
}

#[tokio::test]
async fn split_mixed_orders_prose_by_location() {
    let config = PipelineConfig::builder()
        .retry(RetryPolicy::immediate(1))
        .split_mixed_entities(true)
        .build()
        .unwrap();

    for (location, first) in [("above", EntityType::ImageText), ("below", EntityType::Table)] {
        let classify = mixed_classify_reply(location);
        let vision = ScriptedVision::new(vec![Ok(classify.as_str()), Ok(MIXED_EXTRACT_REPLY)]);
        let elements = vec![
            StructuralElement::text(5, None, "Intro."),
            StructuralElement::picture(5, bbox(), None),
        ];
        let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config)
            .await
            .unwrap();

        assert_eq!(output.entities.len(), 3, "location {location}");
        assert_eq!(output.entities[1].entity_type, first, "location {location}");
        let ids: Vec<&str> = output.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["E001", "E002", "E003"]);

        let table = output
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Table)
            .unwrap();
        assert!(table.has_surrounding_text);
        let parsed: Value = serde_json::from_str(table.content()).unwrap();
        assert_eq!(parsed["table"][0]["Item"], "Bolts");

        let prose = output
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::ImageText)
            .unwrap();
        assert_eq!(prose.content(), "Stock counted on 1 March.");
    }
}

#[tokio::test]
async fn diagram_without_prose_is_unchanged_when_splitting() {
    let config = PipelineConfig::builder()
        .retry(RetryPolicy::immediate(1))
        .split_mixed_entities(true)
        .build()
        .unwrap();
    let vision = ScriptedVision::new(vec![Ok(DIAGRAM_CLASSIFY_REPLY), Ok(DIAGRAM_EXTRACT_REPLY)]);
    let elements = vec![StructuralElement::picture(1, bbox(), None)];
    let output = process_elements(&elements, StubRenderer::ok(), vision, "a.pdf", &config)
        .await
        .unwrap();

    assert_eq!(output.entities.len(), 1);
    assert!(!output.entities[0].has_surrounding_text);
    assert_eq!(output.entities[0].content(), "graph TD\n  A[Submit] --> B[Approve]");
}

// ── Manifest and output directory ────────────────────────────────────────────

#[tokio::test]
async fn manifest_counts_sum_to_total_in_position_order() {
    let vision = ScriptedVision::new(vec![
        Ok(FALLBACK_TABLE_REPLY),
        Ok(DIAGRAM_CLASSIFY_REPLY),
        Ok(DIAGRAM_EXTRACT_REPLY),
    ]);
    let output = process_elements(&three_elements(), StubRenderer::ok(), vision, "report.pdf", &config())
        .await
        .unwrap();

    let manifest = &output.manifest;
    assert_eq!(manifest.source_document, "report.pdf");
    assert_eq!(manifest.total_entities, 3);
    assert_eq!(manifest.entity_type_counts.values().sum::<usize>(), manifest.total_entities);
    for (i, entry) in manifest.entities.iter().enumerate() {
        assert_eq!(entry.position, i + 1);
        assert_eq!(entry.file, output.entities[i].relative_path());
    }
    assert_eq!(manifest.entities[1].extraction_method, ExtractionMethod::VisionFallback);
}

#[tokio::test]
async fn write_to_dir_lays_out_entity_files() {
    let vision = ScriptedVision::new(vec![
        Ok(FALLBACK_TABLE_REPLY),
        Ok(DIAGRAM_CLASSIFY_REPLY),
        Ok(DIAGRAM_EXTRACT_REPLY),
    ]);
    let output = process_elements(&three_elements(), StubRenderer::ok(), vision, "report.pdf", &config())
        .await
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    let doc_path = output.write_to_dir(out.path()).await.unwrap();
    assert_eq!(doc_path, out.path().join("final_document.md"));

    let entities = out.path().join("entities");
    let text = std::fs::read_to_string(entities.join("E001_text.md")).unwrap();
    assert!(text.starts_with("---\n"));
    assert!(text.contains("entity_id: \"E001\""));

    let table = std::fs::read_to_string(entities.join("E002_table.yaml")).unwrap();
    assert!(table.starts_with("# entity_id: \"E002\""));
    assert!(table.contains("# extraction_method: \"vision_fallback\""));

    let diagram = std::fs::read_to_string(entities.join("E003_diagram.mmd")).unwrap();
    assert!(diagram.starts_with("%% entity_id: \"E003\""));

    let manifest: Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("manifest.yaml")).unwrap()).unwrap();
    assert_eq!(manifest["total_entities"], 3);

    // No temporary files survive the atomic writes.
    let leftovers = std::fs::read_dir(&entities)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .count();
    assert_eq!(leftovers, 0);
    assert!(!Path::new(&out.path().join("manifest.yaml.tmp")).exists());
}

// ── Progress callback ────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for RecordingCallback {
    fn on_run_start(&self, total_elements: usize) {
        self.events.lock().unwrap().push(format!("start {total_elements}"));
    }

    fn on_element_start(&self, index: usize, total: usize, kind: ElementKind, page: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("element {index}/{total} {kind} p{page}"));
    }

    fn on_entity_complete(&self, id: &str, entity_type: EntityType, method: ExtractionMethod) {
        self.events
            .lock()
            .unwrap()
            .push(format!("entity {id} {entity_type} {method}"));
    }

    fn on_element_failed(&self, index: usize, _total: usize, _reason: &str) {
        self.events.lock().unwrap().push(format!("failed {index}"));
    }

    fn on_run_complete(&self, total_entities: usize, failed_entities: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {total_entities} {failed_entities}"));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_element_and_entity() {
    let recorder = Arc::new(RecordingCallback::default());
    let config = PipelineConfig::builder()
        .retry(RetryPolicy::immediate(1))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let elements = vec![
        StructuralElement::text(1, None, "Hello."),
        StructuralElement::table(2, bbox(), EMPTY_TABLE),
    ];
    process_elements(&elements, StubRenderer::failing(), ScriptedVision::new(vec![]), "a.pdf", &config)
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 2",
            "element 1/2 text p1",
            "entity E001 text primary",
            "element 2/2 table p2",
            "entity E002 table failed",
            "failed 2",
            "done 2 1",
        ]
    );
}
