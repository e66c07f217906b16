//! Normalize raw log messages into stable comparison keys and coarse error categories.

use serde::{Deserialize, Serialize};

/// Longest normalized message kept; the rest is noise for grouping.
const MAX_NORMALIZED_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
  AuthFailure,
  DatabaseConnection,
  NullReference,
  MemoryPressure,
  RateLimit,
  ServerError,
}

impl ErrorCategory {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::AuthFailure => "auth_failure",
      Self::DatabaseConnection => "database_connection",
      Self::NullReference => "null_reference",
      Self::MemoryPressure => "memory_pressure",
      Self::RateLimit => "rate_limit",
      Self::ServerError => "server_error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "auth_failure" => Some(Self::AuthFailure),
      "database_connection" => Some(Self::DatabaseConnection),
      "null_reference" => Some(Self::NullReference),
      "memory_pressure" => Some(Self::MemoryPressure),
      "rate_limit" => Some(Self::RateLimit),
      "server_error" => Some(Self::ServerError),
      _ => None,
    }
  }

  /// Risky commit tags that plausibly produce this category of error.
  pub fn related_tags(self) -> &'static [&'static str] {
    use feature_engine::risk::*;
    match self {
      Self::AuthFailure => &[AUTH_LOGIC, SECRETS],
      Self::DatabaseConnection => &[DB_MIGRATION, CONFIG_CHANGE],
      Self::NullReference => &[API_CONTRACT, DB_MIGRATION],
      Self::MemoryPressure => &[DEPENDENCY_VERSION, CONFIG_CHANGE],
      Self::RateLimit => &[CONFIG_CHANGE, API_CONTRACT],
      Self::ServerError => &[API_CONTRACT, DEPENDENCY_VERSION, PAYMENT],
    }
  }
}

/// Normalize a message for grouping:
/// - lowercase
/// - UUIDs, hex ids and digit runs -> `#`
/// - collapse whitespace, trim, cap length
pub fn normalize_message(msg: &str) -> String {
  let lowered = msg.to_lowercase();
  let mut out = String::with_capacity(lowered.len());
  for token in lowered.split_whitespace() {
    if !out.is_empty() {
      out.push(' ');
    }
    mask_token(token, &mut out);
  }
  if out.len() > MAX_NORMALIZED_LEN {
    let mut cut = MAX_NORMALIZED_LEN;
    while !out.is_char_boundary(cut) {
      cut -= 1;
    }
    out.truncate(cut);
  }
  out
}

/// Replace variable parts of one whitespace-free token.
fn mask_token(token: &str, out: &mut String) {
  // Whole-token ids: uuids, 0x-prefixed and long hex strings.
  let core = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-');
  if !core.is_empty() && is_id_like(core) {
    if let Some(start) = token.find(core) {
      out.push_str(&token[..start]);
      out.push('#');
      out.push_str(&token[start + core.len()..]);
      return;
    }
  }

  let mut in_digits = false;
  for ch in token.chars() {
    if ch.is_ascii_digit() {
      if !in_digits {
        out.push('#');
        in_digits = true;
      }
    } else {
      in_digits = false;
      out.push(ch);
    }
  }
}

fn is_id_like(s: &str) -> bool {
  if let Some(hex) = s.strip_prefix("0x") {
    return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
  }
  let hexish = s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
  let has_digit = s.chars().any(|c| c.is_ascii_digit());
  hexish && has_digit && s.chars().filter(|c| c.is_ascii_hexdigit()).count() >= 8
}

/// Coarse category for an error message (first matching rule wins).
pub fn categorize(msg: &str) -> Option<ErrorCategory> {
  let m = msg.to_lowercase();
  let has = |needle: &str| m.contains(needle);

  if ((has("auth") || has("login") || has("token"))
    && (has("fail") || has("denied") || has("invalid")))
    || has("unauthorized")
    || has("forbidden")
  {
    Some(ErrorCategory::AuthFailure)
  } else if (has("database") || has("db ") || has("postgres") || has("sql"))
    && (has("timeout") || has("connection") || has("refused"))
  {
    Some(ErrorCategory::DatabaseConnection)
  } else if has("null") || has("undefined") || has("nonetype") || has("nil pointer") {
    Some(ErrorCategory::NullReference)
  } else if has("out of memory") || has("memory") || has("heap") || has("oomkill") {
    Some(ErrorCategory::MemoryPressure)
  } else if has("429") || has("rate limit") || has("too many requests") {
    Some(ErrorCategory::RateLimit)
  } else if has("500") || has("internal server") || has("503") || has("502") {
    Some(ErrorCategory::ServerError)
  } else {
    None
  }
}
