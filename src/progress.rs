//! Progress-callback trait for export stage events.
//!
//! Inject an [`Arc<dyn ExportProgressCallback>`] via
//! [`crate::config::ExportConfigBuilder::progress_callback`] to be told when
//! each stage starts and finishes. The CLI drives an `indicatif` spinner from
//! it; library users can forward the events anywhere.
//!
//! # Example
//!
//! ```rust
//! use article2pdf::{ExportConfig, ExportProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ExportProgressCallback for Printer {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = ExportConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ExportProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// One step of the export pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the article row from the row-store.
    Fetch,
    /// Asking the model to turn HTML into Markdown.
    Convert,
    /// Laying out the Markdown as PDF pages.
    Render,
    /// Writing the PDF to disk.
    Write,
}

impl Stage {
    /// Short present-participle label for spinners and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Fetch => "Fetching article",
            Stage::Convert => "Converting to Markdown",
            Stage::Render => "Rendering PDF",
            Stage::Write => "Writing file",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Convert => "convert",
            Stage::Render => "render",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Called by the export pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run strictly one after another, but the
/// render stage executes on a blocking thread, so implementations must be
/// `Send + Sync`.
pub trait ExportProgressCallback: Send + Sync {
    /// Called just before a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finished successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called with the model's response exactly as returned, right after the
    /// convert stage and before any clean-up, rendering or writing.
    fn on_generation(&self, raw_markdown: &str) {
        let _ = raw_markdown;
    }

    /// Called once after the PDF has been written.
    ///
    /// # Arguments
    /// * `path`: where the PDF landed
    /// * `page_count`: number of pages in the document
    fn on_export_complete(&self, path: &Path, page_count: usize) {
        let _ = (path, page_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExportProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExportConfig`].
pub type ProgressCallback = Arc<dyn ExportProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ExportProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start:{stage}"));
        }

        fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
            self.events.lock().unwrap().push(format!("done:{stage}"));
        }

        fn on_export_complete(&self, path: &Path, page_count: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("exported:{}:{page_count}", path.display()));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Fetch);
        cb.on_stage_complete(Stage::Fetch, 12);
        cb.on_generation("# Title");
        cb.on_export_complete(Path::new("output.pdf"), 1);
    }

    #[test]
    fn recorder_sees_events_in_order() {
        let rec = Recorder::default();
        rec.on_stage_start(Stage::Render);
        rec.on_stage_complete(Stage::Render, 5);
        rec.on_export_complete(Path::new("out.pdf"), 3);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start:render", "done:render", "exported:out.pdf:3"]
        );
    }

    #[test]
    fn stage_labels_and_names() {
        assert_eq!(Stage::Convert.to_string(), "convert");
        assert_eq!(Stage::Fetch.label(), "Fetching article");
        let json = serde_json::to_string(&Stage::Write).unwrap();
        assert_eq!(json, "\"write\"");
    }
}
