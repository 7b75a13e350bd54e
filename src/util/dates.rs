use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// A single date-parsing attempt: `Some(normalized)` on a full match.
type Attempt = fn(&str) -> Option<String>;

/// Parsing attempts in priority order. RFC-2822 is the dominant RSS
/// convention; the ISO variants cover Atom and the rest. The first attempt
/// that fully matches wins — the order is deliberate and changing it changes
/// which reading wins for ambiguous inputs.
const ATTEMPTS: &[Attempt] = &[
    rfc2822,
    iso_offset,
    iso_zulu,
    iso_fractional_offset,
    iso_spaced_offset,
    date_only,
];

/// Best-effort normalization of a feed date string into ISO-8601.
///
/// Returns `None` for absent or empty input. When every attempt fails, the
/// raw input is returned unchanged so a downstream consumer can still take a
/// shot at it with a more generic parser. Never fails.
pub fn normalize(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }
    let trimmed = raw.trim();
    let normalized = ATTEMPTS.iter().find_map(|attempt| attempt(trimmed));
    Some(normalized.unwrap_or_else(|| raw.to_string()))
}

fn rfc2822(s: &str) -> Option<String> {
    DateTime::parse_from_rfc2822(s).ok().map(|dt| dt.to_rfc3339())
}

fn iso_offset(s: &str) -> Option<String> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|dt| dt.to_rfc3339())
}

fn iso_zulu(s: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|dt| dt.and_utc().to_rfc3339())
}

fn iso_fractional_offset(s: &str) -> Option<String> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.to_rfc3339())
}

fn iso_spaced_offset(s: &str) -> Option<String> {
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z")
        .ok()
        .map(|dt| dt.to_rfc3339())
}

fn date_only(s: &str) -> Option<String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| format!("{}T00:00:00", d.format("%Y-%m-%d")))
}
