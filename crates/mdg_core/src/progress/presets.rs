//! Rule tables for the tools a model-install run drives.
//!
//! These encode the observed output shapes of pip, the model-conversion
//! compiler, and ffmpeg. Ordering inside each table is part of the
//! contract: specific rules sit ahead of the generic percent rule.

use super::rules::ParseRule;

/// Rules for `pip install` output.
///
/// Downloads occupy the local 10-70% band; the install phase jumps to
/// fixed checkpoints since pip prints no percentages there.
pub fn pip_install_rules() -> Vec<ParseRule> {
    vec![
        ParseRule::checkpoint(r"^Collecting (?P<item>[A-Za-z0-9._\[\]-]+)", 5, "Collecting {item}"),
        ParseRule::checkpoint(r"^Installing collected packages", 80, "Installing packages"),
        ParseRule::checkpoint(r"^Successfully installed", 100, "Packages installed"),
        ParseRule::percent(r"(?P<percent>\d{1,3}(?:\.\d+)?)\s*%", 10, 70)
            .with_label("Downloading {item}"),
    ]
}

/// Rules for the model-conversion compiler.
///
/// The converter prints phase keywords around a percentage-bearing build
/// phase; the build band is 10-90% with export/completion checkpoints
/// above it.
pub fn model_convert_rules() -> Vec<ParseRule> {
    vec![
        ParseRule::checkpoint(r"(?i)^loading (?:model|network)", 5, "Loading model"),
        ParseRule::checkpoint(r"(?i)export(?:ing)?\b", 95, "Exporting model"),
        ParseRule::checkpoint(r"(?i)\b(?:done|success)\b", 100, "Conversion complete"),
        ParseRule::percent(r"(?P<percent>\d{1,3}(?:\.\d+)?)\s*%", 10, 90)
            .with_label("Converting model"),
    ]
}

/// Rules for ffmpeg encode output.
///
/// ffmpeg reports elapsed `time=` rather than percentages, so progress is
/// the elapsed fraction of the known input duration. Status lines carry
/// both `frame=` and `time=`; the time rule is first so it wins.
pub fn media_encode_rules(total_secs: f64) -> Vec<ParseRule> {
    vec![
        ParseRule::time_over_duration(
            r"time=(?P<h>\d+):(?P<m>\d+):(?P<s>\d+(?:\.\d+)?)",
            total_secs,
            0,
            99,
        )
        .with_label("Encoding"),
        ParseRule::checkpoint(r"(?i)^video:.*muxing overhead", 100, "Encode complete"),
        ParseRule::label(r"^frame=\s*(?P<item>\d+)", "Encoding frame {item}"),
    ]
}
