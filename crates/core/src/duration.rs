//! Compound duration strings such as `30m`, `24h`, `7d` or `1d2h30m`, on top of `humantime`.
//!
//! Calendar units are fixed-width: `d` = 24h, `w` = 7d, `mo`/`M` = 30.44d, `y` = 365.25d.

use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Syntax(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
    #[error("duration {0:?} out of range")]
    Overflow(String),
}

fn parse_error(err: humantime::DurationError, input: &str) -> ParseError {
    use humantime::DurationError as E;
    match err {
        E::Empty => ParseError::Empty,
        E::NumberOverflow => ParseError::Overflow(input.to_string()),
        E::UnknownUnit { unit, .. } if unit.is_empty() => ParseError::MissingUnit(input.to_string()),
        E::UnknownUnit { unit, .. } => ParseError::UnknownUnit { unit, input: input.to_string() },
        _ => ParseError::Syntax(input.to_string()),
    }
}

/// Spellings humantime does not know: `mo` for months and the micro sign.
fn normalize_units(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(char::is_alphabetic) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail.find(|c: char| !c.is_alphabetic()).unwrap_or(tail.len());
        out.push_str(match &tail[..end] {
            "mo" => "M",
            "µs" | "μs" => "us",
            unit => unit,
        });
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

/// Parse a compound duration. A bare `0` is accepted; every other term needs a unit.
pub fn parse(text: &str) -> Result<Duration, ParseError> {
    let input = text.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(&normalize_units(input)).map_err(|e| parse_error(e, input))
}

/// Canonical rendering, e.g. `1day 2h 30m`. Zero renders as `0s`.
pub fn format(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Round to whole seconds for human-facing output.
pub fn format_rounded(duration: Duration) -> String {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() >= 500_000_000);
    format(Duration::from_secs(secs))
}
