//! Failure classification for automatic single-attempt fallback.
//!
//! The policy is a pure function over the stage name, its original
//! arguments, and the captured error text; it never spawns anything.
//! Rules are tried in order and the first match decides. The scheduler
//! enforces the other half of the contract: at most one replay per stage.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error signature the converter prints when a model demands a fixed
/// input shape.
pub const FIXED_SHAPE_SIGNATURE: &str = "does not support dynamic shape";

/// Converter flags dropped on the fixed-shape fallback attempt.
const SHAPE_FLAGS: [&str; 2] = ["--dynamic-shape", "--input-shape"];

/// `[1x3x224x224]` style token in converter error output.
const SHAPE_TOKEN: &str = r"\[(?P<shape>\d+(?:x\d+)+)\]";

/// Diagnostic metadata extracted while matching a retry rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackMetadata {
    /// Name of the rule that matched.
    pub rule: String,
    /// Input shape pulled out of the error text, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_shape: Option<String>,
}

/// The replay a matched rule prescribes.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    /// Adjusted argument list for the second attempt.
    pub args: Vec<String>,
    pub metadata: FallbackMetadata,
}

/// One recoverable-failure signature and how to adjust the invocation.
#[derive(Debug, Clone)]
pub struct RetryRule {
    name: String,
    /// Restrict the rule to one stage name; `None` applies everywhere.
    stage: Option<String>,
    /// Substring that marks the failure as recoverable.
    signature: String,
    /// Flags removed (with their values) from the replayed argument list.
    strip_flags: Vec<String>,
    /// Optional pattern with a named `shape` capture for metadata.
    shape_pattern: Option<Regex>,
}

impl RetryRule {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: None,
            signature: signature.into(),
            strip_flags: Vec::new(),
            shape_pattern: None,
        }
    }

    pub fn for_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn strip_flag(mut self, flag: impl Into<String>) -> Self {
        self.strip_flags.push(flag.into());
        self
    }

    /// Pattern must contain a named `shape` capture group.
    ///
    /// Panics on an invalid pattern; rules are built from literals.
    pub fn with_shape_pattern(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => self.shape_pattern = Some(re),
            Err(e) => panic!("invalid retry rule pattern '{}': {}", pattern, e),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, stage: &str) -> bool {
        self.stage.as_deref().map_or(true, |s| s == stage)
    }

    fn matches(&self, stage: &str, error_text: &str) -> bool {
        self.applies_to(stage) && error_text.contains(&self.signature)
    }
}

/// Ordered set of retry rules.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn new(rules: Vec<RetryRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The built-in fixed-shape fallback: strip shape arguments and
    /// record the shape the converter complained about.
    pub fn fixed_shape() -> Self {
        let mut rule = RetryRule::new("fixed-shape", FIXED_SHAPE_SIGNATURE)
            .with_shape_pattern(SHAPE_TOKEN);
        for flag in SHAPE_FLAGS {
            rule = rule.strip_flag(flag);
        }
        Self::none().with_rule(rule)
    }

    /// Decide whether a failed stage should be replayed.
    ///
    /// Returns the adjusted arguments and extracted metadata of the first
    /// matching rule, or `None` when the failure is not recoverable.
    pub fn evaluate(&self, stage: &str, args: &[String], error_text: &str) -> Option<RetryPlan> {
        let rule = self.rules.iter().find(|r| r.matches(stage, error_text))?;

        let detected_shape = rule
            .shape_pattern
            .as_ref()
            .and_then(|re| re.captures(error_text))
            .and_then(|caps| caps.name("shape"))
            .map(|m| m.as_str().to_string());

        Some(RetryPlan {
            args: strip_flags(args, &rule.strip_flags),
            metadata: FallbackMetadata {
                rule: rule.name.clone(),
                detected_shape,
            },
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed_shape()
    }
}

/// Remove each listed flag and its value from an argument list.
///
/// Handles both `--flag value` and `--flag=value` forms; a flag followed
/// by another option keeps the option.
fn strip_flags(args: &[String], flags: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let flag_part = arg.split('=').next().unwrap_or(arg);
        if flags.iter().any(|f| f == flag_part) {
            if !arg.contains('=') {
                if let Some(next) = iter.peek() {
                    if !next.starts_with('-') {
                        iter.next();
                    }
                }
            }
            continue;
        }
        out.push(arg.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fixed_shape_signature_triggers_retry_with_shape() {
        let policy = RetryPolicy::fixed_shape();
        let error = format!(
            "E build: input 'images' {} , expected [1x3x224x224]",
            FIXED_SHAPE_SIGNATURE
        );
        let plan = policy
            .evaluate("Convert", &args(&["--input-shape", "auto", "-o", "out.bin"]), &error)
            .expect("signature should match");

        assert_eq!(plan.metadata.detected_shape.as_deref(), Some("1x3x224x224"));
        assert_eq!(plan.metadata.rule, "fixed-shape");
        assert_eq!(plan.args, args(&["-o", "out.bin"]));
    }

    #[test]
    fn unrelated_error_text_is_not_retried() {
        let policy = RetryPolicy::fixed_shape();
        assert!(policy
            .evaluate("Convert", &args(&["-o", "out.bin"]), "segmentation fault")
            .is_none());
    }

    #[test]
    fn stage_restricted_rule_ignores_other_stages() {
        let policy = RetryPolicy::none()
            .with_rule(RetryRule::new("conv-only", "boom").for_stage("Convert"));
        assert!(policy.evaluate("Convert", &[], "boom").is_some());
        assert!(policy.evaluate("Install", &[], "boom").is_none());
    }

    #[test]
    fn first_matching_rule_decides() {
        let policy = RetryPolicy::none()
            .with_rule(RetryRule::new("first", "shared signature").strip_flag("--a"))
            .with_rule(RetryRule::new("second", "shared signature").strip_flag("--b"));
        let plan = policy
            .evaluate("X", &args(&["--a", "1", "--b", "2"]), "shared signature here")
            .unwrap();
        assert_eq!(plan.metadata.rule, "first");
        assert_eq!(plan.args, args(&["--b", "2"]));
    }

    #[test]
    fn strip_flags_handles_both_argument_forms() {
        let flags = vec!["--input-shape".to_string()];
        assert_eq!(
            strip_flags(&args(&["--input-shape", "1x3x224x224", "-v"]), &flags),
            args(&["-v"])
        );
        assert_eq!(
            strip_flags(&args(&["--input-shape=1x3x224x224", "-v"]), &flags),
            args(&["-v"])
        );
        // A flag followed by another option keeps the option.
        assert_eq!(
            strip_flags(&args(&["--input-shape", "--verbose"]), &flags),
            args(&["--verbose"])
        );
    }
}
