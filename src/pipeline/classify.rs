//! Page classification and routing.
//!
//! Three independent signals decide where a page goes:
//!
//! * **Coverage class** from [`classify_layout`]: how much of the page is
//!   covered by text blocks vs. image blocks.
//! * **Scan signal** from [`is_scanned_page`]: a single image covering
//!   (almost) the whole page is a scan, whatever text layer sits on top.
//! * **Text signal** from [`has_extractable_text`]: enough native characters
//!   to be worth extracting.
//!
//! [`route_page`] combines them. Every doubtful case goes to OCR: a wasted
//! OCR call is cheaper than an empty page.

use crate::config::FanoutConfig;
use crate::output::PageType;
use crate::pipeline::layout::{BlockKind, PageLayout};
use std::fmt;

/// Structural class of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    Text,
    Image,
    Mixed,
    Blank,
    /// The layout could not be read or made no geometric sense.
    Unknown,
}

impl fmt::Display for PageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PageClass::Text => "text",
            PageClass::Image => "image",
            PageClass::Mixed => "mixed",
            PageClass::Blank => "blank",
            PageClass::Unknown => "unknown",
        })
    }
}

/// Coverage thresholds used by the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub image_coverage: f64,
    pub text_coverage: f64,
    pub scan_coverage: f64,
    pub min_text_chars: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            image_coverage: 0.5,
            text_coverage: 0.1,
            scan_coverage: 0.95,
            min_text_chars: 50,
        }
    }
}

impl From<&FanoutConfig> for Thresholds {
    fn from(c: &FanoutConfig) -> Self {
        Self {
            image_coverage: c.image_coverage_threshold,
            text_coverage: c.text_coverage_threshold,
            scan_coverage: c.scan_coverage_threshold,
            min_text_chars: c.min_text_chars,
        }
    }
}

/// Routing decision for one page, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub page_type: PageType,
    pub class: PageClass,
    pub scanned: bool,
    pub has_text: bool,
}

/// Classify a page by how much of it text and image blocks cover.
pub fn classify_layout(layout: &PageLayout, t: &Thresholds) -> PageClass {
    if layout.blocks.is_empty() && (!layout.image_placements.is_empty() || layout.has_drawings) {
        return PageClass::Image;
    }

    let page_area = layout.page_area();
    if !page_area.is_finite() || layout.blocks.iter().any(|b| !b.bbox.is_finite()) {
        return PageClass::Unknown;
    }
    if page_area == 0.0 {
        return PageClass::Blank;
    }

    let (text_area, image_area) =
        layout
            .blocks
            .iter()
            .fold((0.0, 0.0), |(text, image), b| match b.kind {
                BlockKind::Text => (text + b.bbox.area(), image),
                BlockKind::Image => (text, image + b.bbox.area()),
            });
    // Blocks are per pdfium object and may overlap, so sums can pass 1.
    let text_coverage = (text_area / page_area).min(1.0);
    let image_coverage = (image_area / page_area).min(1.0);
    classify_coverage(text_coverage, image_coverage, t)
}

/// The threshold rules on their own, for callers that already have coverages.
pub fn classify_coverage(text_coverage: f64, image_coverage: f64, t: &Thresholds) -> PageClass {
    if !text_coverage.is_finite() || !image_coverage.is_finite() {
        return PageClass::Unknown;
    }
    if image_coverage > t.image_coverage && text_coverage < t.text_coverage {
        PageClass::Image
    } else if text_coverage > t.text_coverage && image_coverage < t.image_coverage {
        PageClass::Text
    } else if text_coverage == 0.0 && image_coverage == 0.0 {
        PageClass::Blank
    } else {
        PageClass::Mixed
    }
}

/// A single image occurrence covers at least `scan_coverage` of the page.
pub fn is_scanned_page(layout: &PageLayout, t: &Thresholds) -> bool {
    let page_area = layout.page_area();
    if page_area <= 0.0 || !page_area.is_finite() {
        return false;
    }
    layout
        .image_placements
        .iter()
        .filter(|r| r.is_finite())
        .any(|r| r.area() / page_area >= t.scan_coverage)
}

/// The trimmed native text has at least `min_text_chars` characters.
pub fn has_extractable_text(text: &str, t: &Thresholds) -> bool {
    text.trim().chars().count() >= t.min_text_chars
}

/// Pick the queue for a page.
///
/// Precedence: scanned or image → OCR; extractable text on a text or mixed
/// page → text; remaining mixed → OCR; blank → text; anything else → OCR.
pub fn route_page(layout: &PageLayout, t: &Thresholds) -> Route {
    let has_text = has_extractable_text(&layout.text, t);
    let scanned = is_scanned_page(layout, t);
    let class = classify_layout(layout, t);
    Route {
        page_type: decide(class, scanned, has_text),
        class,
        scanned,
        has_text,
    }
}

/// Route for a page whose layout could not be read.
pub fn route_unreadable() -> Route {
    Route {
        page_type: decide(PageClass::Unknown, false, false),
        class: PageClass::Unknown,
        scanned: false,
        has_text: false,
    }
}

fn decide(class: PageClass, scanned: bool, has_text: bool) -> PageType {
    match class {
        _ if scanned => PageType::Ocr,
        PageClass::Image => PageType::Ocr,
        PageClass::Text | PageClass::Mixed if has_text => PageType::Text,
        PageClass::Mixed => PageType::Ocr,
        PageClass::Blank => PageType::Text,
        _ => PageType::Ocr,
    }
}
