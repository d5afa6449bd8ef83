//! Ordered rule tables for turning tool output into progress estimates.
//!
//! Each stage carries its own table of pattern/action pairs. Rules are
//! tried in order and the first match wins, so a specific rule (say, a
//! package-name line) can be placed ahead of a generic percentage rule
//! that would otherwise shadow it.

use regex::Regex;

/// A progress estimate extracted from one line of output.
///
/// `percent` is stage-local (0-100); the scheduler maps it onto the
/// stage's slice of the global scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// What a matched rule does with the line.
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Rescale a captured `percent` token into a local sub-range.
    ScalePercent { lo: u8, hi: u8 },
    /// Jump to a fixed local checkpoint.
    Checkpoint(u8),
    /// Convert a captured `h`/`m`/`s` timestamp against a known total
    /// duration into the given sub-range (ffmpeg `time=` lines).
    TimeOverDuration { total_secs: f64, lo: u8, hi: u8 },
    /// Message-only update; progress stays where it is.
    Label,
}

/// One pattern/action pair in a stage's rule table.
///
/// A named `item` capture in the pattern updates the parser's current
/// item name; a label template may reference it as `{item}`.
#[derive(Debug, Clone)]
pub struct ParseRule {
    pattern: Regex,
    action: RuleAction,
    label: Option<String>,
}

impl ParseRule {
    /// Rule with an explicit action, for tables the named constructors
    /// below do not cover.
    ///
    /// Panics if the pattern is not a valid regex; rule tables are built
    /// from literals at construction time.
    pub fn new(pattern: &str, action: RuleAction) -> Self {
        Self {
            pattern: compile(pattern),
            action,
            label: None,
        }
    }

    /// Rule that rescales a captured `percent` token into `lo..hi`.
    pub fn percent(pattern: &str, lo: u8, hi: u8) -> Self {
        Self::new(pattern, RuleAction::ScalePercent { lo, hi })
    }

    /// Rule that jumps to a fixed checkpoint when the pattern matches.
    pub fn checkpoint(pattern: &str, percent: u8, label: &str) -> Self {
        Self::new(pattern, RuleAction::Checkpoint(percent)).with_label(label)
    }

    /// Rule that only updates the message, keeping the current percent.
    pub fn label(pattern: &str, label: &str) -> Self {
        Self::new(pattern, RuleAction::Label).with_label(label)
    }

    /// Rule that maps a captured `h`/`m`/`s` timestamp to `lo..hi` as a
    /// fraction of `total_secs`.
    pub fn time_over_duration(pattern: &str, total_secs: f64, lo: u8, hi: u8) -> Self {
        Self::new(pattern, RuleAction::TimeOverDuration { total_secs, lo, hi })
    }

    /// Attach a message label (may reference `{item}`).
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid progress rule pattern '{}': {}", pattern, e),
    }
}

/// Stateful per-stage parser over an ordered rule table.
///
/// Created at stage start and discarded at stage end. Emitted percents
/// are clamped so they never regress below the last value this parser
/// emitted, even given out-of-order or duplicate lines; an exact repeat
/// of the previous update is suppressed entirely.
#[derive(Debug)]
pub struct StageParser {
    rules: Vec<ParseRule>,
    last_percent: u8,
    item: Option<String>,
    phase: Option<String>,
    last_emitted: Option<ProgressUpdate>,
}

impl StageParser {
    pub fn new(rules: Vec<ParseRule>) -> Self {
        Self {
            rules,
            last_percent: 0,
            item: None,
            phase: None,
            last_emitted: None,
        }
    }

    /// The last stage-local percent this parser emitted.
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Consume one line, returning a progress estimate if any rule matched.
    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let idx = self.rules.iter().position(|r| r.pattern.is_match(line))?;
        let rule = self.rules[idx].clone();
        let caps = rule.pattern.captures(line)?;

        if let Some(item) = caps.name("item") {
            self.item = Some(item.as_str().trim().to_string());
        }
        if let Some(template) = &rule.label {
            self.phase = Some(render(template, self.item.as_deref()));
        }

        let local = match &rule.action {
            RuleAction::ScalePercent { lo, hi } => {
                let token = caps.name("percent")?.as_str();
                let value: f64 = token.parse().ok()?;
                scale_fraction(value / 100.0, *lo, *hi)
            }
            RuleAction::Checkpoint(percent) => *percent,
            RuleAction::TimeOverDuration { total_secs, lo, hi } => {
                if *total_secs <= 0.0 {
                    return None;
                }
                let h: f64 = caps.name("h")?.as_str().parse().ok()?;
                let m: f64 = caps.name("m")?.as_str().parse().ok()?;
                let s: f64 = caps.name("s")?.as_str().parse().ok()?;
                let elapsed = h * 3600.0 + m * 60.0 + s;
                scale_fraction(elapsed / total_secs, *lo, *hi)
            }
            RuleAction::Label => self.last_percent,
        };

        let clamped = local.min(100).max(self.last_percent);
        self.last_percent = clamped;

        let message = self
            .phase
            .clone()
            .or_else(|| self.item.clone())
            .unwrap_or_default();
        let update = ProgressUpdate {
            percent: clamped,
            message,
        };

        if self.last_emitted.as_ref() == Some(&update) {
            return None;
        }
        self.last_emitted = Some(update.clone());
        Some(update)
    }
}

fn render(template: &str, item: Option<&str>) -> String {
    template.replace("{item}", item.unwrap_or("")).trim().to_string()
}

fn scale_fraction(fraction: f64, lo: u8, hi: u8) -> u8 {
    let fraction = fraction.clamp(0.0, 1.0);
    let span = f64::from(hi.saturating_sub(lo));
    lo + (fraction * span) as u8
}
