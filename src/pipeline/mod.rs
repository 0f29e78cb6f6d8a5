//! Pipeline stages for entity extraction.
//!
//! Each submodule implements one step. Stages talk through plain values, so
//! each one is testable on its own and the rendering or vision backend can be
//! swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ router ──┬─ text ────▶ postprocess
//!                    ├─ table ───▶ tabular ─▶ validate ─▶ (render ─▶ encode ─▶ vision)
//!                    └─ picture ─▶ render/encode ─▶ vision ─▶ split
//!                         │
//!                         ▼
//!                      entity ──▶ assemble
//! ```
//!
//! 1. [`input`]    check the PDF and load the parser's element list
//! 2. [`router`]   pick the extraction path for each element
//! 3. [`tabular`] / [`validate`] convert native tables and check their shape
//! 4. [`render`] / [`encode`] rasterise page regions for the vision service;
//!    rendering runs in `spawn_blocking` because pdfium is not async-safe
//! 5. [`vision`] / [`retry`] classify and transcribe images with bounded retries
//! 6. [`split`]    separate prose from tables and diagrams in mixed pictures
//! 7. [`entity`] / [`assemble`] number the entities, then emit the composite
//!    document and the manifest

pub mod assemble;
pub mod encode;
pub mod entity;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod retry;
pub mod router;
pub mod split;
pub mod tabular;
pub mod validate;
pub mod vision;
