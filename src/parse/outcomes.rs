//! Extract per-test outcomes from a step's log text.
//!
//! Three output dialects are recognised in a single scan, without the caller
//! choosing one up front:
//!
//! * Vitest-style: `PASS  <name> (12ms)`, `FAIL  <name>`, `SKIP  <name>`
//! * Jest-style: `PASS  <name>`, `FAIL  <name>` (textually identical to the above)
//! * Playwright-style: `✓ <name> (1.2s)`, `× <name>`
//!
//! Jest and Vitest failure lines are indistinguishable; only the marker
//! shape matters here, never which framework printed it.

use super::{parse_duration, static_regex, TestOutcome, TestStatus};

const NAME_SEPARATOR: &str = " > ";
const ERROR_EVIDENCE: [&str; 4] = ["Error:", "AssertionError", "TypeError", "ReferenceError"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    CapturingError,
}

/// A marker line split into its parts.
struct Marker<'a> {
    status: TestStatus,
    name: &'a str,
    duration: Option<&'a str>,
}

/// Scan state for one extraction pass.
struct Scanner {
    state: ScanState,
    pending: Option<TestOutcome>,
    error_lines: Vec<String>,
    outcomes: Vec<TestOutcome>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            pending: None,
            error_lines: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn feed(&mut self, line: &str) {
        if let Some(marker) = match_marker(line) {
            self.flush();
            self.state = match marker.status {
                TestStatus::Failed => ScanState::CapturingError,
                TestStatus::Passed | TestStatus::Skipped => ScanState::Idle,
            };
            self.pending = Some(start_outcome(&marker));
            return;
        }

        if self.state == ScanState::CapturingError && is_error_evidence(line) {
            self.error_lines.push(line.trim_end().to_string());
        }

        if let Some(outcome) = self.pending.as_mut() {
            if outcome.file.is_none() {
                if let Some((file, line_no)) = match_file_reference(line) {
                    outcome.file = Some(file.to_string());
                    outcome.line = line_no;
                }
            }
        }
    }

    /// Move the pending outcome into the result list, attaching any
    /// buffered error lines when it failed. Lines keep their leading
    /// indentation, so stack frames read as they did in the log.
    fn flush(&mut self) {
        let lines = std::mem::take(&mut self.error_lines);
        let Some(mut outcome) = self.pending.take() else {
            return;
        };
        if outcome.status == TestStatus::Failed && !lines.is_empty() {
            let text = lines.join("\n");
            outcome.error_details = Some(text.clone());
            outcome.error = Some(text);
        }
        self.outcomes.push(outcome);
    }

    fn finish(mut self) -> Vec<TestOutcome> {
        self.flush();
        self.outcomes
    }
}

/// Extract test outcomes from log text, in the order they appear.
pub fn extract_test_outcomes(log_text: &str) -> Vec<TestOutcome> {
    let mut scanner = Scanner::new();
    for line in log_text.lines() {
        scanner.feed(line);
    }
    scanner.finish()
}

fn match_marker(line: &str) -> Option<Marker<'_>> {
    let word = static_regex!(
        r"^\s*(PASS|FAIL|SKIP)\s{2,}(.+?)(?:\s+\((\d+(?:\.\d+)?(?:ms|s|m))\))?\s*$"
    );
    let glyph = static_regex!(r"^\s*(✓|✔|×|✘)\s+(.+?)(?:\s+\((\d+(?:\.\d+)?(?:ms|s|m))\))?\s*$");

    let (caps, status) = if let Some(caps) = word.captures(line) {
        let status = match caps.get(1)?.as_str() {
            "PASS" => TestStatus::Passed,
            "FAIL" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        (caps, status)
    } else {
        let caps = glyph.captures(line)?;
        let status = match caps.get(1)?.as_str() {
            "✓" | "✔" => TestStatus::Passed,
            _ => TestStatus::Failed,
        };
        (caps, status)
    };

    Some(Marker {
        status,
        name: caps.get(2)?.as_str(),
        duration: caps.get(3).map(|m| m.as_str()),
    })
}

fn start_outcome(marker: &Marker<'_>) -> TestOutcome {
    let (file, test_name) = match marker.name.split_once(NAME_SEPARATOR) {
        Some((first, _)) => {
            let last = marker.name.rsplit(NAME_SEPARATOR).next().unwrap_or(marker.name);
            (Some(first.trim().to_string()), last.trim().to_string())
        }
        None => (None, marker.name.trim().to_string()),
    };

    TestOutcome {
        test_name,
        file,
        line: None,
        status: marker.status,
        error: None,
        error_details: None,
        duration_ms: marker.duration.map(parse_duration),
    }
}

fn is_error_evidence(line: &str) -> bool {
    ERROR_EVIDENCE.iter().any(|needle| line.contains(needle))
        || line.trim_start().starts_with("at ")
}

/// Find an `at <path>` / `in <path>` reference to a JS/TS source file.
fn match_file_reference(line: &str) -> Option<(&str, Option<u32>)> {
    let re = static_regex!(r"\b(?:at|in)\s+([^\s():]+\.(?:tsx|ts|jsx|js))\b(?::(\d+))?");
    let caps = re.captures(line)?;
    let file = caps.get(1)?.as_str();
    let line_no = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((file, line_no))
}
