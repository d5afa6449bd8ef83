//! MDG Core - Backend logic for Model Deploy GUI
//!
//! This crate contains the external-tool orchestration engine with zero
//! UI dependencies: it drives multi-stage invocations of command-line
//! tools (package installer, model-conversion compiler, media encoder)
//! and unifies their unstructured output into a single monotonic
//! progress signal with cancellation and bounded automatic fallback
//! retry. The GUI consumes its events; it never renders anything itself.

pub mod cancel;
pub mod config;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod runner;

pub use cancel::CancelHandle;
pub use config::Settings;
pub use pipeline::{
    Pipeline, PipelineError, PipelineRunResult, ProgressEvent, ProgressEventKind, ProgressRange,
    RunState, Stage, Subscription,
};
pub use progress::{ParseRule, ProgressUpdate, StageParser};
pub use retry::{FallbackMetadata, RetryPlan, RetryPolicy, RetryRule};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
