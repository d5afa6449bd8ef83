//! Stage definition and global-progress mapping.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::PipelineError;
use crate::progress::ParseRule;
use crate::runner::LaunchSpec;

/// A stage's slice of the global 0-100 progress scale.
///
/// Ranges across a pipeline must be disjoint, ascending, and sum to at
/// most 100; 100 itself is reserved for overall completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRange {
    pub offset: u8,
    pub scale: u8,
}

impl ProgressRange {
    pub fn new(offset: u8, scale: u8) -> Self {
        Self { offset, scale }
    }

    /// First global value past this range.
    pub fn end(&self) -> u8 {
        self.offset.saturating_add(self.scale)
    }

    /// Map a stage-local percent onto the global scale (floored).
    pub fn to_global(&self, local: u8) -> u8 {
        let local = u32::from(local.min(100));
        self.offset + (local * u32::from(self.scale) / 100) as u8
    }

    /// Map and clamp so a running stage never claims its slice's top
    /// value; the final stage is additionally held below 100, which only
    /// the pipeline-level completion event may emit.
    pub fn clamped(&self, local: u8, last_stage: bool) -> u8 {
        let cap = if last_stage {
            99
        } else {
            self.end().saturating_sub(1)
        };
        self.to_global(local).min(cap)
    }
}

/// One pipeline step: a single external process invocation with its own
/// progress slice and parser rules.
pub struct Stage {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub range: ProgressRange,
    /// Ordered parser rules; empty means the stage reports no
    /// line-derived progress.
    pub rules: Vec<ParseRule>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Stage {
    pub fn new(name: impl Into<String>, program: impl Into<String>, range: ProgressRange) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            range,
            rules: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_rules(mut self, rules: Vec<ParseRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Launch spec for this stage with the given (possibly adjusted)
    /// argument list.
    pub(crate) fn launch_spec(&self, args: &[String]) -> LaunchSpec {
        LaunchSpec {
            program: self.program.clone(),
            args: args.to_vec(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

/// Check the range invariants over an ordered stage list.
pub fn validate_ranges(stages: &[Stage]) -> Result<(), PipelineError> {
    let mut previous_end: u8 = 0;
    for stage in stages {
        if stage.range.scale == 0 {
            return Err(PipelineError::invalid_stages(format!(
                "stage '{}' has zero progress scale",
                stage.name
            )));
        }
        if stage.range.offset < previous_end {
            return Err(PipelineError::invalid_stages(format!(
                "stage '{}' overlaps the previous stage's range",
                stage.name
            )));
        }
        if u32::from(stage.range.offset) + u32::from(stage.range.scale) > 100 {
            return Err(PipelineError::invalid_stages(format!(
                "stage '{}' extends past 100",
                stage.name
            )));
        }
        previous_end = stage.range.end();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_mapping_floors_within_the_slice() {
        let range = ProgressRange::new(70, 15);
        let globals: Vec<u8> = [0, 10, 50, 100]
            .iter()
            .map(|&local| range.clamped(local, false))
            .collect();
        assert_eq!(globals, vec![70, 71, 77, 84]);
    }

    #[test]
    fn final_stage_is_held_below_100() {
        let range = ProgressRange::new(90, 10);
        assert_eq!(range.clamped(100, true), 99);
        assert_eq!(range.clamped(0, true), 90);
    }

    #[test]
    fn disjoint_ascending_ranges_validate() {
        let stages = vec![
            Stage::new("a", "true", ProgressRange::new(0, 10)),
            Stage::new("b", "true", ProgressRange::new(10, 80)),
            Stage::new("c", "true", ProgressRange::new(90, 10)),
        ];
        assert!(validate_ranges(&stages).is_ok());
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let stages = vec![
            Stage::new("a", "true", ProgressRange::new(0, 50)),
            Stage::new("b", "true", ProgressRange::new(40, 50)),
        ];
        assert!(validate_ranges(&stages).is_err());
    }

    #[test]
    fn range_past_100_is_rejected() {
        let stages = vec![Stage::new("a", "true", ProgressRange::new(95, 10))];
        assert!(validate_ranges(&stages).is_err());
    }

    #[test]
    fn stage_builder_collects_arguments() {
        let stage = Stage::new("Install", "pip", ProgressRange::new(0, 30))
            .with_args(["install", "-r"])
            .arg("requirements.txt")
            .with_env("PIP_NO_INPUT", "1");
        assert_eq!(stage.args, vec!["install", "-r", "requirements.txt"]);
        assert_eq!(stage.env.len(), 1);

        let spec = stage.launch_spec(&stage.args);
        assert_eq!(spec.program, "pip");
        assert_eq!(spec.args.len(), 3);
    }
}
