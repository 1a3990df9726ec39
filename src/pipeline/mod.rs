//! Per-page stages used by the coordinator and the workers.
//!
//! Each submodule implements exactly one step and can be tested on its own.
//! Everything that touches pdfium sits behind [`layout::DocumentBackend`], so
//! the rest of the crate never sees a PDF library type.
//!
//! ## Data Flow
//!
//! ```text
//!                      ┌─▶ classify ──▶ (route to a queue)
//! input ──▶ layout ────┤
//! (URL/path) (probe)   ├─▶ text ──▶ normalize                 text worker
//!                      └─▶ render ──▶ encode ──▶ OCR engine   OCR worker
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`layout`]: open the PDF, probe page geometry, extract native text,
//!    rasterise; runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`classify`]: coverage-based page class plus scan and text signals
//! 4. [`normalize`]: whitespace cleanup for natively extracted text
//! 5. [`render`]: one page into a self-deleting PNG temp file
//! 6. [`encode`]: downscale and base64-wrap a raster for a vision model

pub mod classify;
pub mod encode;
pub mod input;
pub mod layout;
pub mod normalize;
pub mod render;
