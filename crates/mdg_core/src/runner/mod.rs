//! External process execution.
//!
//! This module spawns one external executable at a time, streams its
//! stdout/stderr incrementally with line buffering across chunk
//! boundaries, and resolves with the exit code. It performs no retries
//! and no output interpretation; those belong to the pipeline layer.

mod kill;
mod lines;
mod process;
mod transcript;

pub use lines::LineBuffer;
pub use process::{spawn, LaunchSpec, OutputLine, ProcessHandle, RunningProcess, StreamSource};
pub use transcript::Transcript;
