//! Progress scraping for ffmpeg's human-readable diagnostic output.
//!
//! Everything here is pure: a line of text goes in, a number (or nothing)
//! comes out. Lines that do not carry a marker are ignored, never treated
//! as errors.

use std::sync::OnceLock;
use regex::Regex;

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Duration: (\d{2,}):(\d{2}):(\d{2}\.\d{2})").expect("valid duration regex")
    })
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"time=(\d{2,}):(\d{2}):(\d{2}\.\d{2})").expect("valid time regex")
    })
}

fn captures_to_seconds(caps: &regex::Captures<'_>) -> Option<f64> {
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Total duration in seconds from a probe's output, first `Duration:` marker wins
pub fn parse_duration(probe_output: &str) -> Option<f64> {
    duration_pattern()
        .captures(probe_output)
        .and_then(|caps| captures_to_seconds(&caps))
}

/// Elapsed seconds from a `time=HH:MM:SS.ss` marker
pub fn parse_elapsed(line: &str) -> Option<f64> {
    time_pattern()
        .captures(line)
        .and_then(|caps| captures_to_seconds(&caps))
}

/// Completion fraction in `[0, 1]` for one diagnostic line.
///
/// Returns `None` when the line has no timestamp or when `total_duration`
/// is not a positive number (no progress signal is possible then).
pub fn parse_progress_line(line: &str, total_duration: f64) -> Option<f64> {
    if !(total_duration > 0.0) {
        return None;
    }
    let elapsed = parse_elapsed(line)?;
    Some((elapsed / total_duration).clamp(0.0, 1.0))
}
