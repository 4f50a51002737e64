use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::types::Disposition;

const DEDUP_WINDOW_HOURS: i64 = 24;

/// Per-channel "what did we last actually deliver, and when" memory, used by
/// the reply interceptor to decide whether a fresh heartbeat report is worth
/// forwarding.
pub struct HeartbeatDedup {
    last_delivered: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl HeartbeatDedup {
    pub fn new() -> Self {
        Self {
            last_delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Decide disposition for `text` on `channel`, given `now`. Records
    /// `text` as the new "last delivered" only when the decision is
    /// [`Disposition::Forward`].
    pub fn disposition_at(&self, channel: &str, text: &str, ok_token: &str, now: DateTime<Utc>) -> Disposition {
        if text.trim() == ok_token {
            return Disposition::Suppress;
        }

        let mut last = self.last_delivered.lock().unwrap();
        if let Some((last_text, last_at)) = last.get(channel) {
            if last_text == text && now - *last_at < Duration::hours(DEDUP_WINDOW_HOURS) {
                return Disposition::Suppress;
            }
        }

        last.insert(channel.to_string(), (text.to_string(), now));
        Disposition::Forward
    }

    pub fn disposition(&self, channel: &str, text: &str, ok_token: &str) -> Disposition {
        self.disposition_at(channel, text, ok_token, Utc::now())
    }
}

impl Default for HeartbeatDedup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_text_is_suppressed() {
        let dedup = HeartbeatDedup::new();
        assert_eq!(dedup.disposition("general", "OK-token", "OK-token"), Disposition::Suppress);
    }

    #[test]
    fn first_report_is_forwarded() {
        let dedup = HeartbeatDedup::new();
        assert_eq!(dedup.disposition("general", "disk at 90%", "OK-token"), Disposition::Forward);
    }

    #[test]
    fn identical_report_within_24h_is_suppressed() {
        let dedup = HeartbeatDedup::new();
        let t0 = Utc::now();
        assert_eq!(
            dedup.disposition_at("general", "disk at 90%", "OK-token", t0),
            Disposition::Forward
        );
        assert_eq!(
            dedup.disposition_at("general", "disk at 90%", "OK-token", t0 + Duration::hours(1)),
            Disposition::Suppress
        );
    }

    #[test]
    fn identical_report_after_24h_is_forwarded_again() {
        let dedup = HeartbeatDedup::new();
        let t0 = Utc::now();
        dedup.disposition_at("general", "disk at 90%", "OK-token", t0);
        assert_eq!(
            dedup.disposition_at("general", "disk at 90%", "OK-token", t0 + Duration::hours(25)),
            Disposition::Forward
        );
    }

    #[test]
    fn different_text_is_forwarded_even_if_recent() {
        let dedup = HeartbeatDedup::new();
        let t0 = Utc::now();
        dedup.disposition_at("general", "disk at 90%", "OK-token", t0);
        assert_eq!(
            dedup.disposition_at("general", "disk at 95%", "OK-token", t0 + Duration::minutes(5)),
            Disposition::Forward
        );
    }

    #[test]
    fn dedup_is_scoped_per_channel() {
        let dedup = HeartbeatDedup::new();
        let t0 = Utc::now();
        dedup.disposition_at("general", "disk at 90%", "OK-token", t0);
        assert_eq!(
            dedup.disposition_at("ops", "disk at 90%", "OK-token", t0 + Duration::minutes(1)),
            Disposition::Forward
        );
    }
}
