//! Timestamp parsing utilities.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Parse an ISO8601 / RFC3339 timestamp, a naive `YYYY-MM-DD HH:MM:SS[.f]`
/// (taken as UTC), or unix seconds / nanoseconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if s.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(Utc.from_utc_datetime(&naive));
    }
  }
  let n: i64 = s.parse().ok()?;
  // Loki reports nanoseconds; anything that large cannot be seconds.
  if n.abs() >= 1_000_000_000_000_000 {
    Some(DateTime::from_timestamp_nanos(n))
  } else {
    DateTime::from_timestamp(n, 0)
  }
}

/// Leading timestamp of a log line, if it starts with one.
pub fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
  let head = line.trim_start().trim_start_matches('[');
  // "2025-01-15T10:30:00.123Z" or "2025-01-15 10:30:00,123"
  let candidate: String = head.chars().take(35).collect();
  let end = candidate
    .find(|c: char| c == ' ' || c == ']')
    .map(|i| {
      // Allow one space between date and time.
      if candidate[i + 1..].starts_with(|c: char| c.is_ascii_digit()) && i == 10 {
        candidate[i + 1..]
          .find(|c: char| c == ' ' || c == ']')
          .map(|j| i + 1 + j)
          .unwrap_or(candidate.len())
      } else {
        i
      }
    })
    .unwrap_or(candidate.len());
  parse_timestamp(&candidate[..end].replace(',', "."))
}
