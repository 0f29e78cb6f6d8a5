//! Vision classification and extraction.
//!
//! [`VisionClassifier`] makes two kinds of calls against an image:
//!
//! 1. **classify**: what is in the picture (text, table, diagram, mixed),
//!    how much prose surrounds it and where.
//! 2. **extract**: transcribe the picture into one target format.
//!
//! Each call is one prompt plus one image. Responses are JSON and are parsed
//! into typed values here; a reply that does not fit the schema is a
//! [`ServiceError::MalformedResponse`] and is retried like any other
//! service failure. After the last attempt the error is handed back to the
//! router, which degrades that one element and keeps going.
//!
//! The transport is the [`VisionBackend`] trait. [`LlmVisionBackend`] drives
//! an `edgequake_llm` provider; tests plug in scripted backends.

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::pipeline::postprocess::{clean_vlm_output, extract_json_object, strip_code_fences};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::prompts::{
    extraction_prompt, CLASSIFY_PROMPT, EXTRACT_DIAGRAM_PROMPT, EXTRACT_TABLE_PROMPT,
    EXTRACT_TEXT_PROMPT,
};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

// ── Transport ───────────────────────────────────────────────────────────────

/// One prompt + one image in, raw model text out.
pub trait VisionBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a ImageData,
    ) -> BoxFuture<'a, Result<String, ServiceError>>;
}

/// [`VisionBackend`] over an `edgequake_llm` chat provider.
///
/// The request is a system message carrying the prompt followed by a user
/// message holding only the image.
pub struct LlmVisionBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmVisionBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl fmt::Debug for LlmVisionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmVisionBackend")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl VisionBackend for LlmVisionBackend {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a ImageData,
    ) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(async move {
            let start = Instant::now();
            let messages = vec![
                ChatMessage::system(prompt),
                ChatMessage::user_with_images("", vec![image.clone()]),
            ];
            let options = self.options();
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| ServiceError::Api {
                    detail: e.to_string(),
                })?;
            debug!(
                "Vision call: {} input tokens, {} output tokens, {:?}",
                response.prompt_tokens,
                response.completion_tokens,
                start.elapsed()
            );
            Ok(response.content)
        })
    }
}

// ── Classification ──────────────────────────────────────────────────────────

/// Content categories the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Table,
    Diagram,
    Mixed,
}

impl ContentKind {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "table" => Some(Self::Table),
            "diagram" | "flowchart" | "chart" => Some(Self::Diagram),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// The extraction format for this kind; `Mixed` has none of its own.
    pub fn target(self) -> Option<ExtractTarget> {
        match self {
            Self::Text => Some(ExtractTarget::Text),
            Self::Table => Some(ExtractTarget::Table),
            Self::Diagram => Some(ExtractTarget::Diagram),
            Self::Mixed => None,
        }
    }
}

/// How much prose accompanies the main content of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSignificance {
    None,
    Low,
    Medium,
    High,
}

impl TextSignificance {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    /// Medium or high: the prose deserves to be extracted too.
    pub fn is_significant(self) -> bool {
        self >= Self::Medium
    }
}

/// What the classifier saw in a picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub confidence: f32,
    pub description: String,
    pub has_text: bool,
    pub has_table: bool,
    pub has_diagram: bool,
    pub text_significance: TextSignificance,
    /// Free-form position hint: above, below, left, right, around, none.
    pub text_location: String,
    pub primary_content: Option<ContentKind>,
}

/// Confidence assumed when the model omits it.
const DEFAULT_CLASSIFY_CONFIDENCE: f32 = 0.8;

/// Lenient wire shape; normalised into [`ClassificationResult`].
#[derive(Deserialize)]
struct RawClassification {
    #[serde(rename = "type")]
    kind: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    has_text: bool,
    #[serde(default)]
    has_table: bool,
    #[serde(default)]
    has_diagram: bool,
    text_significance: Option<String>,
    text_location: Option<String>,
    primary_content: Option<String>,
}

/// Parse a classification reply.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult, ServiceError> {
    let json = extract_json_object(raw).ok_or_else(|| ServiceError::MalformedResponse {
        detail: "classification reply contains no JSON object".into(),
    })?;
    let parsed: RawClassification =
        serde_json::from_str(&json).map_err(|e| ServiceError::MalformedResponse {
            detail: format!("classification JSON: {e}"),
        })?;

    let label = parsed.kind.unwrap_or_default();
    let kind = ContentKind::from_label(&label).ok_or_else(|| ServiceError::MalformedResponse {
        detail: format!("unknown content type '{label}'"),
    })?;

    let confidence = parsed
        .confidence
        .map(|c| c as f32)
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CLASSIFY_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(ClassificationResult {
        kind,
        confidence,
        description: parsed.description.trim().to_string(),
        has_text: parsed.has_text,
        has_table: parsed.has_table,
        has_diagram: parsed.has_diagram,
        text_significance: parsed
            .text_significance
            .as_deref()
            .map(TextSignificance::from_label)
            .unwrap_or(TextSignificance::Low),
        text_location: parsed
            .text_location
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "none".to_string()),
        primary_content: parsed
            .primary_content
            .as_deref()
            .and_then(ContentKind::from_label)
            .filter(|k| *k != ContentKind::Mixed),
    })
}

// ── Extraction ──────────────────────────────────────────────────────────────

/// Output format of an extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractTarget {
    Text,
    Table,
    Diagram,
}

impl ExtractTarget {
    fn base_prompt(self) -> &'static str {
        match self {
            Self::Text => EXTRACT_TEXT_PROMPT,
            Self::Table => EXTRACT_TABLE_PROMPT,
            Self::Diagram => EXTRACT_DIAGRAM_PROMPT,
        }
    }
}

impl fmt::Display for ExtractTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Diagram => "diagram",
        })
    }
}

/// Extra instructions for one extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionHint {
    /// Also transcribe prose around the main content.
    pub with_surrounding_text: bool,
    /// The classifier's description of the picture.
    pub description: Option<String>,
}

/// A parsed extraction reply, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractionResponse {
    Text {
        content: String,
        #[serde(default)]
        surrounding_text: Option<String>,
    },
    Table {
        table: Value,
        #[serde(default)]
        surrounding_text: Option<String>,
    },
    Diagram {
        diagram: String,
        #[serde(default)]
        surrounding_text: Option<String>,
    },
}

impl ExtractionResponse {
    pub fn target(&self) -> ExtractTarget {
        match self {
            Self::Text { .. } => ExtractTarget::Text,
            Self::Table { .. } => ExtractTarget::Table,
            Self::Diagram { .. } => ExtractTarget::Diagram,
        }
    }

    pub fn surrounding_text(&self) -> Option<&str> {
        match self {
            Self::Text {
                surrounding_text, ..
            }
            | Self::Table {
                surrounding_text, ..
            }
            | Self::Diagram {
                surrounding_text, ..
            } => surrounding_text.as_deref(),
        }
    }
}

/// Parse an extraction reply and check it answers the requested target.
pub fn parse_extraction(raw: &str, expected: ExtractTarget) -> Result<ExtractionResponse, ServiceError> {
    let json = extract_json_object(raw).ok_or_else(|| ServiceError::MalformedResponse {
        detail: format!("{expected} extraction reply contains no JSON object"),
    })?;
    let mut value: Value =
        serde_json::from_str(&json).map_err(|e| ServiceError::MalformedResponse {
            detail: format!("{expected} extraction JSON: {e}"),
        })?;

    if let Some(tag) = value.get_mut("type") {
        if let Some(s) = tag.as_str() {
            *tag = Value::String(s.trim().to_ascii_lowercase());
        }
    }

    let response: ExtractionResponse =
        serde_json::from_value(value).map_err(|e| ServiceError::MalformedResponse {
            detail: format!("{expected} extraction shape: {e}"),
        })?;

    if response.target() != expected {
        return Err(ServiceError::MalformedResponse {
            detail: format!("asked for {expected}, got {}", response.target()),
        });
    }

    Ok(match response {
        ExtractionResponse::Text {
            content,
            surrounding_text,
        } => ExtractionResponse::Text {
            content: clean_vlm_output(&content),
            surrounding_text,
        },
        ExtractionResponse::Diagram {
            diagram,
            surrounding_text,
        } => ExtractionResponse::Diagram {
            diagram: strip_code_fences(&diagram),
            surrounding_text,
        },
        table => table,
    })
}

// ── Classifier ──────────────────────────────────────────────────────────────

/// Retrying, time-bounded client for classify and extract calls.
#[derive(Clone)]
pub struct VisionClassifier {
    backend: Arc<dyn VisionBackend>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl fmt::Debug for VisionClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionClassifier")
            .field("backend", &"<dyn VisionBackend>")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionClassifier {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            retry: config.retry,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Classify a picture.
    pub async fn classify(&self, image: &ImageData, label: &str) -> Result<ClassificationResult, ServiceError> {
        let label = format!("{label}: classify");
        self.call(CLASSIFY_PROMPT, image, &label, parse_classification)
            .await
    }

    /// Transcribe a picture into `target`.
    pub async fn extract(
        &self,
        image: &ImageData,
        target: ExtractTarget,
        hint: &ExtractionHint,
        label: &str,
    ) -> Result<ExtractionResponse, ServiceError> {
        let prompt = extraction_prompt(
            target.base_prompt(),
            hint.with_surrounding_text,
            hint.description.as_deref(),
        );
        let label = format!("{label}: extract {target}");
        self.call(&prompt, image, &label, |raw| parse_extraction(raw, target))
            .await
    }

    async fn call<T>(
        &self,
        prompt: &str,
        image: &ImageData,
        label: &str,
        parse: impl Fn(&str) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let parse = &parse;
        retry_with_backoff(&self.retry, label, || async move {
            let raw = tokio::time::timeout(self.timeout, self.backend.complete(prompt, image))
                .await
                .map_err(|_| ServiceError::Timeout {
                    secs: self.timeout.as_secs(),
                })??;
            parse(&raw)
        })
        .await
    }
}
