//! Pipeline orchestration: stages, events, scheduling, errors.
//!
//! A pipeline is an ordered sequence of stages, each a single external
//! process invocation with its own slice of the global 0-100 progress
//! scale. The scheduler runs them sequentially, merges their parsed
//! progress into one monotonic signal, consults the retry policy on
//! failure, and resolves to exactly one terminal result.
//!
//! # Example
//!
//! ```ignore
//! use mdg_core::pipeline::{Pipeline, ProgressRange, Stage};
//! use mdg_core::progress;
//!
//! let pipeline = Pipeline::new()
//!     .with_stage(
//!         Stage::new("Install deps", "pip", ProgressRange::new(0, 30))
//!             .with_args(["install", "-r", "requirements.txt"])
//!             .with_rules(progress::pip_install_rules()),
//!     )
//!     .with_stage(
//!         Stage::new("Convert model", "modelc", ProgressRange::new(30, 70))
//!             .with_args(["--input", "model.onnx", "--output", "model.bin"])
//!             .with_rules(progress::model_convert_rules()),
//!     );
//!
//! let _sub = pipeline.on_progress(|event| println!("{}%: {}", event.percent, event.message));
//! let result = pipeline.run().await;
//! assert!(result.success);
//! ```

mod errors;
mod events;
mod scheduler;
mod stage;

pub use errors::PipelineError;
pub use events::{ProgressBus, ProgressEvent, ProgressEventKind, Subscription};
pub use scheduler::{Pipeline, PipelineRunResult, RunState};
pub use stage::{validate_ranges, ProgressRange, Stage};
