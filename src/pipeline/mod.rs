//! Pipeline stages for article-to-PDF export.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! can be tested on its own and swapped (another row-store, another model
//! backend) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ llm ──▶ [postprocess] ──▶ markdown ──▶ render ──▶ outline
//! (HTML)   (Markdown)  (optional)      (blocks)    (pages)    (PDF bytes)
//! ```
//!
//! 1. [`fetch`]: read one article row from the PostgREST row-store
//! 2. [`llm`]: send instruction + HTML to the model; the only other
//!    stage with network I/O
//! 3. [`postprocess`]: opt-in deterministic clean-up of the response
//! 4. [`markdown`]: parse GFM into a block model
//! 5. [`render`]: lay blocks out on pages; runs in `spawn_blocking`
//!    because layout and serialisation are CPU-bound
//! 6. [`outline`]: nested bookmarks for the placed headings, written into
//!    the serialised PDF

pub mod fetch;
pub mod llm;
pub mod markdown;
pub mod outline;
pub mod postprocess;
pub mod render;
