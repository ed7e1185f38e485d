//! Indexing progress reporting.
//!
//! `index` reports coarse milestones as `(stage, percent)` pairs so a UI or
//! the CLI can show what is happening during a slow build. Reporting is
//! purely observational and never affects control flow.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// Receives `(stage, percent)` milestones during indexing.
///
/// Implemented for any `Fn(&str, u8)` closure, so callers can pass a
/// closure directly.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: &str, percent: u8);
}

impl<F> ProgressReporter for F
where
    F: Fn(&str, u8) + Send + Sync,
{
    fn report(&self, stage: &str, percent: u8) {
        self(stage, percent)
    }
}

/// Percent reported before embedding batch `n` of `total` (65..=80).
pub fn batch_percent(n: usize, total: usize) -> u8 {
    if total == 0 {
        return 65;
    }
    (65 + (n.min(total) * 15) / total) as u8
}

/// Human-friendly progress on stderr: `[ 65%] Processing batch 1/4...`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, stage: &str, percent: u8) {
        let line = format!("[{:>3}%] {}\n", percent, stage);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, stage: &str, percent: u8) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": stage,
            "percent": percent,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _stage: &str, _percent: u8) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }

    /// Parse a `--progress` value: `off`, `human`, or `json`.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}': expected off, human, or json", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn batch_percent_range() {
        assert_eq!(batch_percent(0, 4), 65);
        assert_eq!(batch_percent(1, 4), 68);
        assert_eq!(batch_percent(2, 4), 72);
        assert_eq!(batch_percent(4, 4), 80);
        assert_eq!(batch_percent(9, 4), 80);
        assert_eq!(batch_percent(1, 0), 65);
    }

    #[test]
    fn parse_progress_mode() {
        assert_eq!(ProgressMode::parse("json").unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::parse("off").unwrap(), ProgressMode::Off);
        assert!(ProgressMode::parse("loud").is_err());
    }

    #[test]
    fn closure_is_a_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |stage: &str, percent: u8| seen.lock().unwrap().push((stage.to_string(), percent));
        reporter.report("Indexing complete", 100);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![("Indexing complete".to_string(), 100)]);
    }
}
