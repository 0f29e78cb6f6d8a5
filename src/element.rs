//! Structural elements supplied by the external PDF parser.
//!
//! The parser (layout analysis, table structure recognition) runs outside
//! this crate and hands over an ordered list of elements. They are read-only
//! here: the pipeline never reorders, merges or drops them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A rectangle in PDF user space: points, origin at the **bottom-left**
/// corner of the page, y growing upwards.
///
/// Serialised as a `[x1, y1, x2, y2]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    /// True when the box encloses no area.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= f64::EPSILON || self.height() <= f64::EPSILON
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// The three element kinds the parser distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Table,
    Picture,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementKind::Text => "text",
            ElementKind::Table => "table",
            ElementKind::Picture => "picture",
        })
    }
}

/// Raw element payload, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementContent {
    /// A run of text.
    Text { text: String },
    /// A native table exported as a GFM pipe table.
    Table {
        #[serde(default)]
        markdown: String,
    },
    /// An embedded picture. `image` points at a raster the parser already
    /// cropped; when absent the picture is rendered from its page region.
    Picture {
        #[serde(default)]
        image: Option<PathBuf>,
    },
}

/// One parser-identified region of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralElement {
    /// 1-indexed page number.
    #[serde(default = "first_page")]
    pub page: usize,

    /// Region on the page; `None` for elements without native geometry.
    #[serde(default)]
    pub bbox: Option<BoundingBox>,

    #[serde(flatten)]
    pub content: ElementContent,
}

fn first_page() -> usize {
    1
}

impl StructuralElement {
    pub fn text(page: usize, bbox: Option<BoundingBox>, text: impl Into<String>) -> Self {
        Self {
            page,
            bbox,
            content: ElementContent::Text { text: text.into() },
        }
    }

    pub fn table(page: usize, bbox: Option<BoundingBox>, markdown: impl Into<String>) -> Self {
        Self {
            page,
            bbox,
            content: ElementContent::Table {
                markdown: markdown.into(),
            },
        }
    }

    pub fn picture(page: usize, bbox: Option<BoundingBox>, image: Option<PathBuf>) -> Self {
        Self {
            page,
            bbox,
            content: ElementContent::Picture { image },
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self.content {
            ElementContent::Text { .. } => ElementKind::Text,
            ElementContent::Table { .. } => ElementKind::Table,
            ElementContent::Picture { .. } => ElementKind::Picture,
        }
    }
}
