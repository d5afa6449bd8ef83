//! Progress estimation from unstructured tool output.
//!
//! Two progress sources are merged per stage: explicit percentage tokens,
//! rescaled into a phase-local sub-range, and phase-transition keywords
//! that jump to fixed checkpoints when no percentage is printed. The
//! parser guarantees its output never regresses within a stage.

mod presets;
mod rules;

pub use presets::{media_encode_rules, model_convert_rules, pip_install_rules};
pub use rules::{ParseRule, ProgressUpdate, RuleAction, StageParser};
