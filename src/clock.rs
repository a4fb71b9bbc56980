//! Time and nonce source for outbound payloads.
//!
//! Every payload builder takes a [`Stamp`] produced per call, so no
//! timestamp or nonce is ever shared between two requests.

use chrono::{DateTime, Datelike, Local, Utc};
use uuid::Uuid;

const NONCE_LEN: usize = 8;

/// Per-request timestamp, sequence and nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// Unix timestamp in seconds
    pub ts: i64,
    /// Unix timestamp in milliseconds, sent as a string
    pub sequence: String,
    /// Random lowercase alphanumeric nonce
    pub nonce: String,
}

/// Source of wall-clock time and nonces
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Fresh nonce
    fn nonce(&self) -> String;

    /// Days elapsed in the current month, today included
    fn day_of_month(&self) -> u32 {
        self.now().with_timezone(&Local).day()
    }

    /// Build a stamp for one outbound payload
    fn stamp(&self) -> Stamp {
        let now = self.now();
        Stamp {
            ts: now.timestamp(),
            sequence: now.timestamp_millis().to_string(),
            nonce: self.nonce(),
        }
    }
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn nonce(&self) -> String {
        let mut nonce = Uuid::new_v4().simple().to_string();
        nonce.truncate(NONCE_LEN);
        nonce
    }
}

/// Clock frozen at a given instant, for reproducible payloads
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
    nonce: String,
}

impl FixedClock {
    /// Create a clock that always reports `now` and `nonce`
    pub fn new(now: DateTime<Utc>, nonce: impl Into<String>) -> Self {
        Self {
            now,
            nonce: nonce.into(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn nonce(&self) -> String {
        self.nonce.clone()
    }

    fn day_of_month(&self) -> u32 {
        self.now.day()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_uses_seconds_and_millis() {
        let now = Utc.timestamp_opt(1_234_567_890, 0).unwrap();
        let stamp = FixedClock::new(now, "nonce123").stamp();
        assert_eq!(stamp.ts, 1_234_567_890);
        assert_eq!(stamp.sequence, "1234567890000");
        assert_eq!(stamp.nonce, "nonce123");
    }

    #[test]
    fn system_nonce_is_short_and_alphanumeric() {
        let nonce = SystemClock.nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(nonce, SystemClock.nonce());
    }

    #[test]
    fn fixed_clock_reports_utc_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 30, 12, 0, 0).unwrap();
        assert_eq!(FixedClock::new(now, "n").day_of_month(), 30);
    }
}
