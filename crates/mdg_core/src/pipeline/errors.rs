//! Error taxonomy for pipeline runs.
//!
//! `Spawn` is fatal and never retried; `StageExit` is a nonzero exit no
//! fallback rule matched; `Cancelled` is a distinct terminal state, never
//! logged as an application error. A fallback-applied retry success is
//! not an error at all and is reported on the run result instead.

use std::io;

use thiserror::Error;

/// Terminal error of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The stage executable could not be started.
    #[error("Failed to start '{program}' for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: io::Error,
    },

    /// A stage exited nonzero and no fallback rule matched (or the
    /// single permitted retry also failed).
    #[error("Stage '{stage}' failed with exit code {exit_code}: {excerpt}")]
    StageExit {
        stage: String,
        exit_code: i32,
        /// Last non-empty output lines; the full transcript goes to the
        /// diagnostic log only.
        excerpt: String,
    },

    /// The stage list violates the progress-range invariants.
    #[error("Invalid stage configuration: {0}")]
    InvalidStages(String),

    /// The run was cancelled. Takes priority over success and failure.
    #[error("Pipeline was cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn spawn(stage: impl Into<String>, program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            stage: stage.into(),
            program: program.into(),
            source,
        }
    }

    pub fn stage_exit(
        stage: impl Into<String>,
        exit_code: i32,
        excerpt: impl Into<String>,
    ) -> Self {
        Self::StageExit {
            stage: stage.into(),
            exit_code,
            excerpt: excerpt.into(),
        }
    }

    pub fn invalid_stages(message: impl Into<String>) -> Self {
        Self::InvalidStages(message.into())
    }
}
