//! Page rasterisation for OCR: render one page into a temporary PNG.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why a temp file?
//!
//! OCR engines take an image path. The raster lives in a
//! [`tempfile::NamedTempFile`] which deletes itself when dropped, so the file
//! is gone on every exit path of the worker: success, error, timeout
//! cancellation or panic.

use crate::error::PageError;
use crate::pipeline::layout::DocumentBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Render `page_index` at `dpi` into a new PNG temp file inside `temp_dir`.
pub async fn render_page_to_temp(
    backend: Arc<dyn DocumentBackend>,
    pdf_path: &Path,
    page_index: usize,
    dpi: u32,
    temp_dir: &Path,
) -> Result<NamedTempFile, PageError> {
    let fail = |detail: String| PageError::RenderFailed {
        page: page_index,
        detail,
    };

    std::fs::create_dir_all(temp_dir)
        .map_err(|e| fail(format!("temp dir {}: {}", temp_dir.display(), e)))?;
    let raster = tempfile::Builder::new()
        .prefix(&format!("page_{}_", page_index))
        .suffix(".png")
        .tempfile_in(temp_dir)
        .map_err(|e| fail(format!("temp file: {}", e)))?;

    let path: PathBuf = pdf_path.to_path_buf();
    let dest: PathBuf = raster.path().to_path_buf();
    tokio::task::spawn_blocking(move || backend.render_page_png(&path, page_index, dpi, &dest))
        .await
        .map_err(|e| fail(format!("render task panicked: {}", e)))??;

    debug!(
        "Page {} rasterised to {}",
        page_index,
        raster.path().display()
    );
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FanoutError;
    use crate::pipeline::layout::DocumentLayout;

    struct TinyPng;

    impl DocumentBackend for TinyPng {
        fn inspect(&self, _path: &Path) -> Result<DocumentLayout, FanoutError> {
            Ok(DocumentLayout::default())
        }

        fn page_text(&self, _path: &Path, _page_index: usize) -> Result<String, PageError> {
            Ok(String::new())
        }

        fn render_page_png(
            &self,
            _path: &Path,
            page_index: usize,
            _dpi: u32,
            dest: &Path,
        ) -> Result<(), PageError> {
            if page_index == 9 {
                return Err(PageError::RenderFailed {
                    page: 9,
                    detail: "broken page".into(),
                });
            }
            let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
            img.save_with_format(dest, image::ImageFormat::Png)
                .map_err(|e| PageError::RenderFailed {
                    page: page_index,
                    detail: e.to_string(),
                })
        }
    }

    #[tokio::test]
    async fn raster_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let raster = render_page_to_temp(Arc::new(TinyPng), Path::new("x.pdf"), 0, 300, dir.path())
            .await
            .unwrap();
        let path = raster.path().to_path_buf();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        drop(raster);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_render_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_page_to_temp(Arc::new(TinyPng), Path::new("x.pdf"), 9, 300, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::RenderFailed { page: 9, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
