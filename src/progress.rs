//! Progress-callback trait for per-element extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the router works through the element list.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2entities::{ExtractionProgressCallback, PipelineConfig};
//! use edgequake_pdf2entities::output::{EntityType, ExtractionMethod};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FallbackCounter {
//!     fallbacks: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for FallbackCounter {
//!     fn on_entity_complete(&self, id: &str, _t: EntityType, method: ExtractionMethod) {
//!         if method == ExtractionMethod::VisionFallback {
//!             self.fallbacks.fetch_add(1, Ordering::SeqCst);
//!             eprintln!("{id} recovered by vision fallback");
//!         }
//!     }
//! }
//!
//! let cb = Arc::new(FallbackCounter { fallbacks: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::element::ElementKind;
use crate::output::{EntityType, ExtractionMethod};
use std::sync::Arc;

/// Called by the pipeline as it processes each structural element.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Elements are processed sequentially, so events
/// arrive in document order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first element.
    fn on_run_start(&self, total_elements: usize) {
        let _ = total_elements;
    }

    /// Called before an element is routed.
    ///
    /// * `index`: 1-indexed element ordinal
    fn on_element_start(&self, index: usize, total_elements: usize, kind: ElementKind, page: usize) {
        let _ = (index, total_elements, kind, page);
    }

    /// Called for every entity built, including degraded ones.
    fn on_entity_complete(&self, id: &str, entity_type: EntityType, method: ExtractionMethod) {
        let _ = (id, entity_type, method);
    }

    /// Called when an element ended with `extraction_method = failed`.
    fn on_element_failed(&self, index: usize, total_elements: usize, reason: &str) {
        let _ = (index, total_elements, reason);
    }

    /// Called once after every element has been attempted.
    fn on_run_complete(&self, total_entities: usize, failed_entities: usize) {
        let _ = (total_entities, failed_entities);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
