use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Time-sortable opaque id for rows that benefit from insertion-order keys
/// (turn workspaces, prepare-turn records, archival memory ids).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Opaque handle id (session tokens, prepare ids shown over the wire) where
/// time-sortability isn't useful and a plain v4 reads more naturally.
pub fn new_handle() -> String {
    Uuid::new_v4().to_string()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Lowercase, trim, and strip any character outside `[a-z0-9_-]`.
///
/// Returns `None` if the result is empty.
pub fn sanitize_mode_id(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_and_lowercases() {
        assert_eq!(sanitize_mode_id(" My Mode! "), Some("mymode".to_string()));
        assert_eq!(sanitize_mode_id("a_b-c123"), Some("a_b-c123".to_string()));
        assert_eq!(sanitize_mode_id("   "), None);
        assert_eq!(sanitize_mode_id("!!!"), None);
    }
}
