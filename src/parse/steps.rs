//! Split a raw CI job log into named steps using `##[group]` markers.

use super::LogStep;

const GROUP_START: &str = "##[group]";
const GROUP_END: &str = "##[endgroup]";
const ANNOTATIONS: [&str; 3] = ["##[command]", "##[error]", "##[warning]"];

/// Name of the single step produced when no group ever opens.
pub const ALL_STEPS: &str = "All Steps";

/// Split a raw job log into steps.
///
/// A `##[group]` line opens a step named by the rest of the line. The step
/// ends at `##[endgroup]`, at the next `##[group]` (malformed logs), or at
/// end of input. Step numbers count group starts, so an unterminated
/// trailing step keeps the number it was opened with.
///
/// When the log has groups, lines outside them belong to no step.
/// GitHub Actions raw logs often wrap only the `Run ...` header in a group
/// and print the command output after `##[endgroup]`; for those logs the
/// test output falls outside every step and no outcomes are found in it.
///
/// Any non-empty input yields at least one step: when no group ever opens,
/// the whole log becomes one step called `"All Steps"`.
pub fn split_into_steps(raw_log: &str) -> Vec<LogStep> {
    if raw_log.is_empty() {
        return Vec::new();
    }

    let mut steps = Vec::new();
    // (name, number, buffered lines) of the step being collected.
    let mut current: Option<(String, u32, Vec<&str>)> = None;
    let mut ungrouped: Vec<&str> = Vec::new();
    let mut next_number = 0u32;

    for raw_line in raw_log.lines() {
        let line = strip_timestamp(raw_line);

        if let Some(rest) = line.strip_prefix(GROUP_START) {
            if let Some((name, number, lines)) = current.take() {
                steps.push(finish(name, number, &lines));
            }
            next_number += 1;
            let name = match rest.trim() {
                "" => format!("Step {next_number}"),
                name => name.to_string(),
            };
            current = Some((name, next_number, Vec::new()));
            continue;
        }

        if line.starts_with(GROUP_END) {
            if let Some((name, number, lines)) = current.take() {
                steps.push(finish(name, number, &lines));
            }
            continue;
        }

        let line = strip_annotation(line);
        match current.as_mut() {
            Some((_, _, lines)) => lines.push(line),
            None => ungrouped.push(line),
        }
    }

    if let Some((name, number, lines)) = current.take() {
        steps.push(finish(name, number, &lines));
    }

    // Only a group start creates a step, so this covers logs whose sole
    // markers are stray end markers.
    if steps.is_empty() {
        steps.push(finish(ALL_STEPS.to_string(), 1, &ungrouped));
    }

    steps
}

fn finish(name: String, step_number: u32, lines: &[&str]) -> LogStep {
    LogStep {
        name,
        step_number,
        log_text: lines.join("\n"),
    }
}

fn strip_annotation(line: &str) -> &str {
    ANNOTATIONS
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .unwrap_or(line)
}

/// Drop a leading RFC 3339 timestamp token, as GitHub Actions prefixes
/// every raw job log line with one.
fn strip_timestamp(line: &str) -> &str {
    let Some((head, rest)) = line.split_once(' ') else {
        return line;
    };
    if head.len() >= 20
        && head.as_bytes()[0].is_ascii_digit()
        && chrono::DateTime::parse_from_rfc3339(head).is_ok()
    {
        rest
    } else {
        line
    }
}
