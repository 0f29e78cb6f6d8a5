//! Region rendering: rasterise one bounding box of one PDF page.
//!
//! Element boxes come from the parser in PDF user space (origin bottom-left,
//! y up). Rasters have their origin top-left with y down, so the box is
//! flipped against the page height before cropping:
//!
//! ```text
//! top    = page_height - y2
//! bottom = page_height - y1
//! ```
//!
//! pdfium is not async-safe; callers run [`RegionRenderer::render`] inside
//! `tokio::task::spawn_blocking`.

use crate::element::BoundingBox;
use crate::error::RenderError;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A rectangle in top-left-origin page space, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl PageRect {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Convert a bottom-left-origin box to top-left-origin page space.
///
/// Swapped coordinates (`y1 > y2` or `x1 > x2`) are normalised first.
pub fn flip_bbox(page_height: f64, bbox: &BoundingBox) -> PageRect {
    let (y_low, y_high) = (bbox.y1.min(bbox.y2), bbox.y1.max(bbox.y2));
    PageRect {
        left: bbox.x1.min(bbox.x2),
        top: page_height - y_high,
        right: bbox.x1.max(bbox.x2),
        bottom: page_height - y_low,
    }
}

/// Crop `rect` (points) out of a full-page raster rendered at `scale`.
///
/// The crop is clamped to the raster; a rectangle that ends up empty is a
/// [`RenderError::DegenerateBox`].
pub fn crop_region(
    page_image: &DynamicImage,
    rect: &PageRect,
    scale: f32,
    page: usize,
) -> Result<DynamicImage, RenderError> {
    let scale = f64::from(scale);
    let (img_w, img_h) = (
        f64::from(page_image.width()),
        f64::from(page_image.height()),
    );

    let x0 = (rect.left * scale).floor().clamp(0.0, img_w);
    let y0 = (rect.top * scale).floor().clamp(0.0, img_h);
    let x1 = (rect.right * scale).ceil().clamp(0.0, img_w);
    let y1 = (rect.bottom * scale).ceil().clamp(0.0, img_h);

    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return Err(RenderError::DegenerateBox {
            page,
            detail: format!(
                "crop {:?} is empty on a {}x{} px raster",
                rect, img_w, img_h
            ),
        });
    }

    Ok(page_image.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Renders page regions to rasters.
///
/// The production implementation is [`PdfiumRegionRenderer`]; tests and
/// embedders can supply their own.
pub trait RegionRenderer: Send + Sync {
    /// Render `bbox` of 1-indexed `page` at `scale` (2.0 = 144 DPI).
    fn render(&self, page: usize, bbox: &BoundingBox, scale: f32) -> Result<DynamicImage, RenderError>;
}

/// pdfium-backed renderer bound to one PDF file.
///
/// The file is read once, on the first render, and the bytes are shared by
/// every later call. pdfium still binds and parses the document per region:
/// a `PdfDocument` borrows its `Pdfium` and cannot outlive one blocking call.
#[derive(Clone)]
pub struct PdfiumRegionRenderer {
    pdf_path: PathBuf,
    password: Option<String>,
    bytes: OnceCell<Arc<Vec<u8>>>,
}

impl fmt::Debug for PdfiumRegionRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfiumRegionRenderer")
            .field("pdf_path", &self.pdf_path)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("loaded_bytes", &self.bytes.get().map(|b| b.len()))
            .finish()
    }
}

impl PdfiumRegionRenderer {
    pub fn new(pdf_path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            password,
            bytes: OnceCell::new(),
        }
    }

    pub fn pdf_path(&self) -> &Path {
        &self.pdf_path
    }

    /// The PDF contents, read from disk on first use.
    fn source_bytes(&self, page: usize) -> Result<Arc<Vec<u8>>, RenderError> {
        self.bytes
            .get_or_try_init(|| {
                std::fs::read(&self.pdf_path).map(Arc::new).map_err(|e| RenderError::Backend {
                    page,
                    detail: format!("cannot read {}: {}", self.pdf_path.display(), e),
                })
            })
            .map(Arc::clone)
    }
}

impl RegionRenderer for PdfiumRegionRenderer {
    fn render(&self, page: usize, bbox: &BoundingBox, scale: f32) -> Result<DynamicImage, RenderError> {
        if bbox.is_degenerate() {
            return Err(RenderError::DegenerateBox {
                page,
                detail: format!("bbox {} has zero width or height", bbox),
            });
        }

        let bytes = self.source_bytes(page)?;
        let pdfium = bind_pdfium(page)?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes.as_slice(), self.password.as_deref())
            .map_err(|e| RenderError::Backend {
                page,
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if page == 0 || page > total {
            return Err(RenderError::PageOutOfRange { page, total });
        }

        let pdf_page = pages
            .get((page - 1) as u16)
            .map_err(|e| RenderError::Backend {
                page,
                detail: format!("{:?}", e),
            })?;

        let page_height = f64::from(pdf_page.height().value);
        let rect = flip_bbox(page_height, bbox);

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Backend {
                page,
                detail: format!("{:?}", e),
            })?;

        let full = bitmap.as_image();
        let region = crop_region(&full, &rect, scale, page)?;
        debug!(
            "Rendered page {} region {} → {}x{} px",
            page,
            bbox,
            region.width(),
            region.height()
        );
        Ok(region)
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH` first, then the working directory, then
/// the system library.
fn bind_pdfium(page: usize) -> Result<Pdfium, RenderError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| RenderError::Backend {
        page,
        detail: format!(
            "failed to bind to pdfium ({:?}); set PDFIUM_LIB_PATH=/path/to/libpdfium",
            e
        ),
    })?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn flips_letter_page_coordinates() {
        let bbox = BoundingBox::new(72.0, 100.0, 540.0, 300.0);
        let rect = flip_bbox(792.0, &bbox);
        assert_eq!(rect.top, 492.0);
        assert_eq!(rect.bottom, 692.0);
        assert_eq!(rect.left, 72.0);
        assert_eq!(rect.right, 540.0);
        assert_eq!(rect.height(), 200.0);
    }

    #[test]
    fn flip_normalises_swapped_y() {
        let bbox = BoundingBox::new(72.0, 300.0, 540.0, 100.0);
        let rect = flip_bbox(792.0, &bbox);
        assert_eq!((rect.top, rect.bottom), (492.0, 692.0));
    }

    #[test]
    fn crop_scales_rect() {
        let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 300, Rgba([255; 4])));
        let rect = PageRect {
            left: 10.0,
            top: 20.0,
            right: 60.0,
            bottom: 45.0,
        };
        let region = crop_region(&page, &rect, 2.0, 1).unwrap();
        assert_eq!((region.width(), region.height()), (100, 50));
    }

    #[test]
    fn crop_clamps_to_raster() {
        let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([0; 4])));
        let rect = PageRect {
            left: 40.0,
            top: 40.0,
            right: 500.0,
            bottom: 500.0,
        };
        let region = crop_region(&page, &rect, 1.0, 1).unwrap();
        assert_eq!((region.width(), region.height()), (60, 60));
    }

    #[test]
    fn crop_outside_page_is_degenerate() {
        let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([0; 4])));
        let rect = PageRect {
            left: 10.0,
            top: 150.0,
            right: 50.0,
            bottom: 180.0,
        };
        let err = crop_region(&page, &rect, 1.0, 4).unwrap_err();
        assert!(matches!(err, RenderError::DegenerateBox { page: 4, .. }));
    }

    #[test]
    fn degenerate_bbox_rejected_before_pdfium() {
        let r = PdfiumRegionRenderer::new("/does/not/matter.pdf", None);
        let err = r
            .render(1, &BoundingBox::new(10.0, 10.0, 10.0, 90.0), 2.0)
            .unwrap_err();
        assert!(matches!(err, RenderError::DegenerateBox { page: 1, .. }));
    }

    #[test]
    fn pdf_bytes_are_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        let r = PdfiumRegionRenderer::new(&path, None);

        let first = r.source_bytes(1).unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = r.source_bytes(2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.as_slice(), b"%PDF-1.7\n");
    }

    #[test]
    fn unreadable_pdf_is_backend_error() {
        let r = PdfiumRegionRenderer::new("/no/such/doc.pdf", None);
        let err = r.source_bytes(3).unwrap_err();
        assert!(matches!(err, RenderError::Backend { page: 3, .. }));
        assert!(format!("{r:?}").contains("loaded_bytes: None"));
    }
}
