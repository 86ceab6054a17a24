//! Positioned diagnostics.
//!
//! A [`Diagnostics`] sink collects `(severity, position, message)` records.
//! Duplicate `(position, message)` pairs are suppressed so fixpoint-driven
//! passes cannot flood the output, warnings stop being recorded past a
//! configurable limit, and `-Werror` escalation happens here. Passes never
//! unwind on recoverable problems; the only error surfaced through `Result`
//! on public entry points is [`FatalError`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::Position;

/// Diagnostic severity, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(text)
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub position: Position,
    pub message: String,
}

/// A non-recoverable condition: internal invariant violation or resource
/// exhaustion. Aborts the translation unit when it reaches a public entry
/// point.
#[derive(Debug, Clone, Error)]
#[error("fatal: {message}")]
pub struct FatalError {
    pub position: Position,
    pub message: String,
}

/// Collector for all diagnostics of one run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    streams: Vec<String>,
    records: Vec<Diagnostic>,
    seen: HashSet<(Position, String)>,
    warning_count: u32,
    error_count: u32,
    max_warnings: u32,
    warnings_clipped: bool,
    werror: bool,
}

const DEFAULT_MAX_WARNINGS: u32 = 100;

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics {
            streams: Vec::new(),
            records: Vec::new(),
            seen: HashSet::new(),
            warning_count: 0,
            error_count: 0,
            max_warnings: DEFAULT_MAX_WARNINGS,
            warnings_clipped: false,
            werror: false,
        }
    }

    /// Escalate warnings to errors (`-Werror`).
    pub fn set_werror(&mut self, werror: bool) {
        self.werror = werror;
    }

    pub fn set_max_warnings(&mut self, max: u32) {
        self.max_warnings = max;
    }

    /// Registers a stream name, returning its index for [`Position::stream`].
    pub fn register_stream(&mut self, name: &str) -> u32 {
        self.streams.push(name.to_string());
        (self.streams.len() - 1) as u32
    }

    pub fn stream_name(&self, stream: u32) -> &str {
        self.streams
            .get(stream as usize)
            .map(|s| s.as_str())
            .unwrap_or("<nostream>")
    }

    pub fn info(&mut self, position: Position, message: impl Into<String>) {
        self.record(Severity::Info, position, message.into());
    }

    pub fn warning(&mut self, position: Position, message: impl Into<String>) {
        let severity = if self.werror {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.record(severity, position, message.into());
    }

    pub fn error(&mut self, position: Position, message: impl Into<String>) {
        self.record(Severity::Error, position, message.into());
    }

    /// Records a fatal diagnostic and returns the error value to propagate.
    pub fn fatal(&mut self, position: Position, message: impl Into<String>) -> FatalError {
        let message = message.into();
        self.record(Severity::Fatal, position, message.clone());
        FatalError { position, message }
    }

    fn record(&mut self, severity: Severity, position: Position, message: String) {
        if !self.seen.insert((position, message.clone())) {
            return;
        }
        match severity {
            Severity::Warning => {
                if self.warning_count >= self.max_warnings {
                    if !self.warnings_clipped {
                        self.warnings_clipped = true;
                        self.records.push(Diagnostic {
                            severity: Severity::Warning,
                            position,
                            message: "too many warnings".to_string(),
                        });
                    }
                    return;
                }
                self.warning_count += 1;
            }
            Severity::Error | Severity::Fatal => self.error_count += 1,
            Severity::Info => {}
        }
        self.records.push(Diagnostic {
            severity,
            position,
            message,
        });
    }

    pub fn warnings(&self) -> u32 {
        self.warning_count
    }

    pub fn errors(&self) -> u32 {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    /// Renders one record as `file:line:col: severity: message`.
    pub fn render(&self, diag: &Diagnostic) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            self.stream_name(diag.position.stream),
            diag.position.line,
            diag.position.col,
            diag.severity,
            diag.message
        )
    }

    /// Renders every record, one per line, in emission order.
    pub fn render_all(&self) -> String {
        let mut out = String::new();
        for diag in &self.records {
            out.push_str(&self.render(diag));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, col: u16) -> Position {
        Position::new(0, line, col)
    }

    #[test]
    fn counters_track_severities() {
        let mut diags = Diagnostics::new();
        diags.register_stream("t.c");
        diags.warning(pos(1, 1), "w1");
        diags.warning(pos(2, 1), "w2");
        diags.error(pos(3, 1), "e1");
        assert_eq!(diags.warnings(), 2);
        assert_eq!(diags.errors(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn duplicate_position_message_is_suppressed() {
        let mut diags = Diagnostics::new();
        diags.register_stream("t.c");
        diags.warning(pos(5, 3), "shift count too large");
        diags.warning(pos(5, 3), "shift count too large");
        assert_eq!(diags.warnings(), 1);
        assert_eq!(diags.records().len(), 1);
        // Same message elsewhere still reports.
        diags.warning(pos(6, 3), "shift count too large");
        assert_eq!(diags.warnings(), 2);
    }

    #[test]
    fn werror_escalates_warnings() {
        let mut diags = Diagnostics::new();
        diags.register_stream("t.c");
        diags.set_werror(true);
        diags.warning(pos(1, 1), "unused");
        assert_eq!(diags.warnings(), 0);
        assert_eq!(diags.errors(), 1);
        assert_eq!(diags.records()[0].severity, Severity::Error);
    }

    #[test]
    fn warning_flood_is_clipped() {
        let mut diags = Diagnostics::new();
        diags.register_stream("t.c");
        diags.set_max_warnings(3);
        for i in 0..10 {
            diags.warning(pos(i, 1), format!("w{i}"));
        }
        assert_eq!(diags.warnings(), 3);
        // 3 real warnings + the clip notice.
        assert_eq!(diags.records().len(), 4);
        assert_eq!(diags.records()[3].message, "too many warnings");
    }

    #[test]
    fn fatal_returns_error_value() {
        let mut diags = Diagnostics::new();
        diags.register_stream("t.c");
        let err = diags.fatal(pos(9, 9), "out of memory");
        assert_eq!(err.message, "out of memory");
        assert!(diags.has_errors());
    }

    #[test]
    fn render_includes_stream_name() {
        let mut diags = Diagnostics::new();
        let s = diags.register_stream("foo.c");
        assert_eq!(s, 0);
        diags.warning(pos(4, 2), "bad escape");
        let rendered = diags.render(&diags.records()[0]);
        assert_eq!(rendered, "foo.c:4:2: warning: bad escape");
    }
}
