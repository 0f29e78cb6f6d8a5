//! Configuration for entity extraction runs.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Defaults match the reference pipeline: three
//! attempts per vision call with 4 s → 8 s → 16 s backoff, 2× fallback
//! rendering and a fixed 0.85 confidence for vision-recovered tables.

use crate::error::PipelineError;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2entities::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_attempts(2)
///     .split_mixed_entities(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// LLM model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for vision calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Bounded retry policy for every vision call. Default: 3 attempts,
    /// 4000 ms initial backoff, capped at 16000 ms.
    pub retry: RetryPolicy,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Magnification used when rendering a table region for the fallback. Default: 2.0.
    pub fallback_scale: f32,

    /// Magnification used when a picture has no parser-supplied raster. Default: 2.0.
    pub picture_scale: f32,

    /// Longest edge, in pixels, of any image sent to the vision service. Default: 2000.
    pub max_image_pixels: u32,

    /// Confidence recorded for tables recovered by the vision fallback. Default: 0.85.
    pub fallback_confidence: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory for temporary fallback rasters. Default: the system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Emit surrounding text of mixed pictures as its own entity. Default: false.
    ///
    /// When false the surrounding text is folded into the content entity as a
    /// preface and `has_surrounding_text` is set.
    pub split_mixed_entities: bool,

    /// Run picture-sourced tables through the structural validator. Default: false.
    ///
    /// Off by default: picture tables keep the classifier confidence with no
    /// independent check, unlike native tables.
    pub validate_picture_tables: bool,

    /// Receives per-element events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            retry: RetryPolicy::default(),
            api_timeout_secs: 60,
            fallback_scale: 2.0,
            picture_scale: 2.0,
            max_image_pixels: 2000,
            fallback_confidence: 0.85,
            password: None,
            scratch_dir: None,
            split_mixed_entities: false,
            validate_picture_tables: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry", &self.retry)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("fallback_scale", &self.fallback_scale)
            .field("picture_scale", &self.picture_scale)
            .field("max_image_pixels", &self.max_image_pixels)
            .field("fallback_confidence", &self.fallback_confidence)
            .field("scratch_dir", &self.scratch_dir)
            .field("split_mixed_entities", &self.split_mixed_entities)
            .field("validate_picture_tables", &self.validate_picture_tables)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_backoff_ms = ms;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn fallback_scale(mut self, scale: f32) -> Self {
        self.config.fallback_scale = scale;
        self
    }

    pub fn picture_scale(mut self, scale: f32) -> Self {
        self.config.picture_scale = scale;
        self
    }

    pub fn max_image_pixels(mut self, px: u32) -> Self {
        self.config.max_image_pixels = px.max(100);
        self
    }

    pub fn fallback_confidence(mut self, c: f32) -> Self {
        self.config.fallback_confidence = c;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn split_mixed_entities(mut self, v: bool) -> Self {
        self.config.split_mixed_entities = v;
        self
    }

    pub fn validate_picture_tables(mut self, v: bool) -> Self {
        self.config.validate_picture_tables = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if !(c.fallback_scale > 1.0 && c.fallback_scale <= 8.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "fallback scale must be in (1, 8], got {}",
                c.fallback_scale
            )));
        }
        if !(c.picture_scale > 0.0 && c.picture_scale <= 8.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "picture scale must be in (0, 8], got {}",
                c.picture_scale
            )));
        }
        if !(c.fallback_confidence > 0.0 && c.fallback_confidence < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "fallback confidence must be strictly between 0 and 1, got {}",
                c.fallback_confidence
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
