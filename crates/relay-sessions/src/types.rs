use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Structured key identifying one conversation slot on one agent engine.
///
/// Unlike a chat-platform-centric key, this is `(user, context, engine)` —
/// the same user talking in the same context (e.g. a channel or thread) has
/// one session per engine, so switching engines doesn't clobber the other's
/// resume state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub context_id: String,
    pub engine: String,
}

impl SessionKey {
    pub fn new(
        user_id: impl Into<String>,
        context_id: impl Into<String>,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            context_id: context_id.into(),
            engine: engine.into(),
        }
    }

    /// Canonical wire-format string: `user:{user_id}:context:{context_id}:engine:{engine}`.
    ///
    /// `context_id` may itself contain colons; `engine` must not (enforced by
    /// `parse`, since it's always the final, unambiguous segment).
    pub fn format(&self) -> String {
        format!(
            "user:{}:context:{}:engine:{}",
            self.user_id, self.context_id, self.engine
        )
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("user:")
            .ok_or_else(|| SessionError::InvalidKey(format!("missing 'user:' prefix: {s}")))?;

        let context_marker = ":context:";
        let context_pos = rest.find(context_marker).ok_or_else(|| {
            SessionError::InvalidKey(format!("missing ':context:' segment: {s}"))
        })?;
        let user_id = &rest[..context_pos];
        let after_context = &rest[context_pos + context_marker.len()..];

        let engine_marker = ":engine:";
        let engine_pos = after_context.rfind(engine_marker).ok_or_else(|| {
            SessionError::InvalidKey(format!("missing ':engine:' segment: {s}"))
        })?;
        let context_id = &after_context[..engine_pos];
        let engine = &after_context[engine_pos + engine_marker.len()..];

        if user_id.is_empty() || context_id.is_empty() || engine.is_empty() {
            return Err(SessionError::InvalidKey(format!(
                "key components must not be empty: {s}"
            )));
        }
        if engine.contains(':') {
            return Err(SessionError::InvalidKey(format!(
                "engine segment must not contain ':': {s}"
            )));
        }

        Ok(Self {
            user_id: user_id.to_string(),
            context_id: context_id.to_string(),
            engine: engine.to_string(),
        })
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    /// Opaque id the agent CLI assigned for `--resume`. `None` until the
    /// first successful run reports one.
    pub session_id: Option<String>,
    pub created_at: String,
    pub last_used_at: String,
    pub message_count: u32,
    pub cumulative_context_tokens: u64,
    pub context_window: Option<u32>,
}

/// A rotation summary pending consumption by the next fresh-session turn
/// for a given `(user, context, engine)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationSummary {
    pub summary_text: String,
    pub source_session_id: String,
    pub context_tokens_at_rotation: u64,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_key() {
        let key = SessionKey::new("u-123", "ch-1", "primary");
        let s = key.format();
        assert_eq!(s, "user:u-123:context:ch-1:engine:primary");
        let parsed = SessionKey::parse(&s).expect("parse failed");
        assert_eq!(parsed, key);
    }

    #[test]
    fn roundtrip_context_with_colons() {
        let key = SessionKey::new("u-999", "guild:123:thread:456", "secondary");
        let s = key.format();
        let parsed = SessionKey::parse(&s).expect("parse failed");
        assert_eq!(parsed.context_id, "guild:123:thread:456");
    }

    #[test]
    fn parse_missing_engine_returns_err() {
        assert!(SessionKey::parse("user:u-1:context:ch-1").is_err());
    }

    #[test]
    fn parse_missing_user_prefix_returns_err() {
        assert!(SessionKey::parse("context:ch-1:engine:primary").is_err());
    }
}
