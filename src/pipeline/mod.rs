//! Pipeline stages for paper-to-slides conversion.
//!
//! Each submodule implements one stage. The session orchestrator in
//! [`crate::session`] sequences them and owns the retry and convergence loops.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ extract ─▶ planner ─▶ latex ─▶ compile ─▶ verify ⇄ repair ─▶ revise* ─▶ speech
//!          (bundle)   (plan r0)  (.tex)   (PDF)      (reports, plan rN)
//! ```
//!
//! Extraction internals:
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]: rasterise pages; runs in `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`encode`]: PNG-encode and base64-wrap page images for the VLM
//! 4. [`transcribe`]: concurrent per-page VLM transcription with retry
//! 5. [`normalize`]: deterministic cleanup of VLM Markdown quirks
//! 6. [`bundle`]: parse Markdown or the text layer into a `ContentBundle`

pub mod bundle;
pub mod compile;
pub mod encode;
pub mod extract;
pub mod input;
pub mod latex;
pub mod normalize;
pub mod planner;
pub mod render;
pub mod repair;
pub mod revise;
pub mod speech;
pub mod transcribe;
pub mod verify;
