//! Document source: page count, per-page layout probe, native text, raster.
//!
//! ## Why a trait?
//!
//! Classification and the workers only need four facts about a PDF. Putting
//! them behind [`DocumentBackend`] keeps pdfium out of the coordination logic
//! and lets tests drive the whole fan-out with an in-memory document.
//!
//! All backend methods are blocking. Async callers go through the
//! `spawn_blocking` wrappers at the bottom of this module.

use crate::error::{FanoutError, PageError};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle of the given size anchored at the origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).abs()
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }
}

/// Kind of a layout block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub kind: BlockKind,
    pub bbox: Rect,
}

/// Everything the classifier looks at for one page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageLayout {
    pub width: f64,
    pub height: f64,
    /// Text and image blocks.
    pub blocks: Vec<ContentBlock>,
    /// One rectangle per image occurrence.
    pub image_placements: Vec<Rect>,
    /// Vector paths or shadings are present.
    pub has_drawings: bool,
    /// Natively extractable text.
    pub text: String,
}

impl PageLayout {
    pub fn page_area(&self) -> f64 {
        Rect::sized(self.width, self.height).area()
    }
}

/// Probe result for a whole document. A page whose layout could not be read
/// carries the reason instead of a layout.
#[derive(Debug, Clone, Default)]
pub struct DocumentLayout {
    pub pages: Vec<Result<PageLayout, String>>,
}

impl DocumentLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

// ── Backend trait ────────────────────────────────────────────────────────

/// Blocking access to a PDF on disk.
pub trait DocumentBackend: Send + Sync {
    /// Open the document and probe every page in one pass.
    fn inspect(&self, path: &Path) -> Result<DocumentLayout, FanoutError>;

    /// Native text of one page.
    fn page_text(&self, path: &Path, page_index: usize) -> Result<String, PageError>;

    /// Render one page at `dpi` and write it to `dest` as PNG.
    fn render_page_png(
        &self,
        path: &Path,
        page_index: usize,
        dpi: u32,
        dest: &Path,
    ) -> Result<(), PageError>;
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`DocumentBackend`] on top of `pdfium-render`.
///
/// The library is bound once at construction. `thread_safe` makes
/// pdfium-render serialise calls internally and `sync` marks [`Pdfium`] as
/// `Send + Sync`; together they let one backend be shared by every worker.
pub struct PdfiumBackend {
    pdfium: Pdfium,
    password: Option<String>,
}

impl std::fmt::Debug for PdfiumBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfiumBackend")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PdfiumBackend {
    /// Bind pdfium and create the backend.
    ///
    /// Looks for the library in `PDFIUM_LIB_PATH` (a file or a directory),
    /// then the working directory, then the system library path.
    pub fn new(password: Option<String>) -> Result<Self, FanoutError> {
        Ok(Self {
            pdfium: bind_pdfium()?,
            password,
        })
    }

    fn open(&self, path: &Path) -> Result<PdfDocument<'_>, FanoutError> {
        let password = self.password.as_deref();
        self.pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        FanoutError::WrongPassword {
                            path: path.to_path_buf(),
                        }
                    } else {
                        FanoutError::PasswordRequired {
                            path: path.to_path_buf(),
                        }
                    }
                } else {
                    FanoutError::CorruptPdf {
                        path: path.to_path_buf(),
                        detail: err_str,
                    }
                }
            })
    }
}

fn bind_pdfium() -> Result<Pdfium, FanoutError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let p = PathBuf::from(p);
            let lib = if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&p)
            } else {
                p
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| FanoutError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

impl DocumentBackend for PdfiumBackend {
    fn inspect(&self, path: &Path) -> Result<DocumentLayout, FanoutError> {
        let document = self.open(path)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        info!("PDF loaded: {} pages", total);

        let mut layouts = Vec::with_capacity(total);
        for idx in 0..total {
            let layout = pdfium_index(idx)
                .and_then(|i| pages.get(i).map_err(|e| format!("{:?}", e)))
                .and_then(|page| probe_page(&page));
            if let Err(ref e) = layout {
                warn!("Page {}: layout probe failed: {}", idx, e);
            }
            layouts.push(layout);
        }
        Ok(DocumentLayout { pages: layouts })
    }

    fn page_text(&self, path: &Path, page_index: usize) -> Result<String, PageError> {
        let fail = |detail: String| PageError::ExtractionFailed {
            page: page_index,
            detail,
        };
        let index = pdfium_index(page_index).map_err(fail)?;
        let document = self.open(path).map_err(|e| fail(e.to_string()))?;
        let page = document
            .pages()
            .get(index)
            .map_err(|e| fail(format!("{:?}", e)))?;
        let text = page.text().map_err(|e| fail(format!("{:?}", e)))?;
        Ok(text.all())
    }

    fn render_page_png(
        &self,
        path: &Path,
        page_index: usize,
        dpi: u32,
        dest: &Path,
    ) -> Result<(), PageError> {
        let fail = |detail: String| PageError::RenderFailed {
            page: page_index,
            detail,
        };
        let index = pdfium_index(page_index).map_err(fail)?;
        let document = self.open(path).map_err(|e| fail(e.to_string()))?;
        let page = document
            .pages()
            .get(index)
            .map_err(|e| fail(format!("{:?}", e)))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| fail(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            page_index,
            dpi,
            image.width(),
            image.height()
        );
        image
            .save_with_format(dest, image::ImageFormat::Png)
            .map_err(|e| fail(format!("PNG write failed: {}", e)))
    }
}

/// pdfium addresses pages with `u16`.
fn pdfium_index(page_index: usize) -> Result<u16, String> {
    u16::try_from(page_index)
        .map_err(|_| format!("page index {} exceeds pdfium's range", page_index))
}

fn probe_page(page: &PdfPage<'_>) -> Result<PageLayout, String> {
    let mut layout = PageLayout {
        width: page.width().value as f64,
        height: page.height().value as f64,
        ..Default::default()
    };

    for object in page.objects().iter() {
        let kind = match object.object_type() {
            PdfPageObjectType::Text => BlockKind::Text,
            PdfPageObjectType::Image => BlockKind::Image,
            PdfPageObjectType::Path
            | PdfPageObjectType::Shading
            | PdfPageObjectType::XObjectForm => {
                layout.has_drawings = true;
                continue;
            }
            _ => continue,
        };
        // Only the area enters coverage, so the box is anchored at the origin.
        let (w, h) = match (object.width(), object.height()) {
            (Ok(w), Ok(h)) => (w.value as f64, h.value as f64),
            _ => continue,
        };
        let bbox = Rect::sized(w, h);
        if kind == BlockKind::Image {
            layout.image_placements.push(bbox);
        }
        layout.blocks.push(ContentBlock { kind, bbox });
    }

    layout.text = page.text().map_err(|e| format!("{:?}", e))?.all();
    Ok(layout)
}

// ── Async wrappers ───────────────────────────────────────────────────────

/// [`DocumentBackend::inspect`] on the blocking pool.
pub async fn inspect_document(
    backend: Arc<dyn DocumentBackend>,
    path: PathBuf,
) -> Result<DocumentLayout, FanoutError> {
    tokio::task::spawn_blocking(move || backend.inspect(&path))
        .await
        .map_err(|e| FanoutError::Internal(format!("Inspect task panicked: {}", e)))?
}

/// [`DocumentBackend::page_text`] on the blocking pool.
pub async fn extract_text(
    backend: Arc<dyn DocumentBackend>,
    path: PathBuf,
    page_index: usize,
) -> Result<String, PageError> {
    tokio::task::spawn_blocking(move || backend.page_text(&path, page_index))
        .await
        .map_err(|e| PageError::ExtractionFailed {
            page: page_index,
            detail: format!("extraction task panicked: {}", e),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_area_ignores_orientation() {
        let r = Rect::new(10.0, 20.0, 0.0, 0.0);
        assert_eq!(r.area(), 200.0);
        assert!(r.is_finite());
        assert!(!Rect::new(0.0, 0.0, f64::NAN, 1.0).is_finite());
    }

    #[test]
    fn page_area_of_empty_layout_is_zero() {
        assert_eq!(PageLayout::default().page_area(), 0.0);
        let l = PageLayout {
            width: 612.0,
            height: 792.0,
            ..Default::default()
        };
        assert_eq!(l.page_area(), 612.0 * 792.0);
    }

    #[test]
    fn page_index_beyond_u16_is_rejected() {
        assert_eq!(pdfium_index(0), Ok(0));
        assert_eq!(pdfium_index(65_535), Ok(u16::MAX));
        let err = pdfium_index(65_536).unwrap_err();
        assert!(err.contains("65536"));
    }
}
