//! Input resolution: the source PDF and the parser's element list.
//!
//! Both are checked up front so a bad path surfaces as one clear fatal error
//! instead of a failed entity for every table on every page.

use crate::element::StructuralElement;
use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Validate that `path` exists, is readable and starts with the `%PDF` magic.
pub fn resolve_local_pdf(path: impl AsRef<Path>) -> Result<PathBuf, PipelineError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(PipelineError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(PipelineError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(_) => return Err(PipelineError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Read the parser's element list: a JSON array of elements in document order.
pub async fn load_elements(path: impl AsRef<Path>) -> Result<Vec<StructuralElement>, PipelineError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::InvalidElements {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    })?;

    let elements = parse_elements(&raw).map_err(|detail| PipelineError::InvalidElements {
        path: path.to_path_buf(),
        detail,
    })?;
    info!("Loaded {} elements from {}", elements.len(), path.display());
    Ok(elements)
}

/// Parse an element list and reject page numbers below 1.
pub fn parse_elements(raw: &str) -> Result<Vec<StructuralElement>, String> {
    let elements: Vec<StructuralElement> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if let Some((i, _)) = elements.iter().enumerate().find(|(_, el)| el.page == 0) {
        return Err(format!("element {} has page 0; pages are 1-indexed", i + 1));
    }
    Ok(elements)
}
