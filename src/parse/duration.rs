//! Human-readable duration tokens (`123ms`, `1.5s`, `2m`) to milliseconds.

use super::static_regex;

/// Convert a duration token to milliseconds.
///
/// Accepts `<number><unit>` with unit `ms`, `s` or `m` and no space between
/// them. Anything else yields `0.0`: duration is an enrichment field, so a
/// malformed token should never fail a parse.
pub fn parse_duration(token: &str) -> f64 {
    let re = static_regex!(r"^(\d+(?:\.\d+)?)(ms|s|m)$");
    let Some(caps) = re.captures(token) else {
        return 0.0;
    };

    let value = caps[1].parse::<f64>().unwrap_or(0.0);
    match &caps[2] {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        _ => 0.0,
    }
}
