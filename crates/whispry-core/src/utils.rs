use chrono::{SecondsFormat, Utc};

/// RFC3339 timestamp in UTC with millisecond precision (wire timestamps).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Truncate to at most `max` chars, for log/error previews of response bodies.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
