use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::BASE64_ENGINE;

/// Normalises a certificate thumbprint to upper case hex, dropping the
/// separators providers like to format them with.
pub fn normalize_thumbprint(thumbprint: &str) -> String {
    thumbprint
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Generates a fresh, unguessable challenge session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"];

/// Parses a date reported by a provider. Dates without an offset are taken
/// as UTC.
pub fn parse_provider_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }

    // eg: "Mon Jan 01 2024 03:00:00 GMT+0300 (Moscow Standard Time)"
    let without_zone_name = s.split(" (").next().unwrap_or(s);
    if let Ok(d) = DateTime::parse_from_str(without_zone_name, "%a %b %d %Y %H:%M:%S GMT%z") {
        return Some(d.with_timezone(&Utc));
    }

    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|d| d.and_utc())
}

/// Decodes base64 text returned by a provider, which may be wrapped over
/// several lines.
pub fn decode_provider_base64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_ENGINE.decode(compact)
}
