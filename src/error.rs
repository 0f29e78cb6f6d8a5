//! Error types for the edgequake-pdf2entities library.
//!
//! Failures fall into two groups:
//!
//! * [`PipelineError`] is **fatal**: the run cannot proceed or its output
//!   cannot be trusted (missing input, unreadable element list, provider not
//!   configured, corrupted entity ordering). Returned as `Err(PipelineError)`
//!   from the top-level `extract*` functions.
//!
//! * [`RenderError`], [`ServiceError`] and [`ValidationFailure`]
//!   are **per-element**: one table or picture could not be extracted the normal
//!   way. The router records them on the entity (`extraction_method`,
//!   `processing_notes`, confidence) and moves on to the next element.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2entities library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The structural element list could not be read or parsed.
    #[error("Invalid element list '{path}': {detail}")]
    InvalidElements { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Provenance errors ─────────────────────────────────────────────────
    /// Entity identifiers or positions are duplicated or out of order.
    ///
    /// This indicates a bug in the pipeline; the run is aborted because the
    /// provenance of every entity after the fault is unreliable.
    #[error("Entity order invariant violated: {detail}")]
    AssemblyInvariantViolation { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Region rendering failed. Never retried.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RenderError {
    /// The element references a page the document does not have.
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The bounding box has zero width or height, or lies outside the page.
    #[error("degenerate bounding box on page {page}: {detail}")]
    DegenerateBox { page: usize, detail: String },

    /// pdfium could not be bound, could not open the file, or failed to render.
    #[error("rasterisation failed for page {page}: {detail}")]
    Backend { page: usize, detail: String },
}

/// A call to the vision service failed.
///
/// Every variant is treated as transient by the retry combinator; after the
/// last attempt the error becomes terminal for that one element.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ServiceError {
    /// The provider returned an error (network, HTTP status, content filter).
    #[error("vision API error: {detail}")]
    Api { detail: String },

    /// The call did not complete within the configured timeout.
    #[error("vision call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response could not be parsed into the expected shape.
    #[error("malformed vision response: {detail}")]
    MalformedResponse { detail: String },

    /// The raster could not be prepared for upload.
    #[error("image encoding failed: {detail}")]
    Encode { detail: String },
}

/// Reason a tabular payload failed structural validation.
///
/// The `Display` strings are stable reason codes: they are copied verbatim
/// into `processing_notes` and the failed-entity error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("empty markdown output")]
    EmptyOutput,
    #[error("invalid structure")]
    InvalidStructure,
    #[error("empty table array")]
    EmptyTableArray,
    #[error("no data rows")]
    NoDataRows,
    #[error("insufficient columns")]
    InsufficientColumns,
}
