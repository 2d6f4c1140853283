//! Injectable clock
//!
//! Wall-clock timestamps are derived from tokio's monotonic clock plus a fixed
//! anchor, so a paused tokio runtime (`#[tokio::test(start_paused = true)]`)
//! drives both timers and recorded timestamps deterministically.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl Clock {
    /// Clock anchored at the current system time
    pub fn system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock whose `now()` starts at `wall` and advances with tokio time
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall_anchor: wall,
            mono_anchor: Instant::now(),
        }
    }

    /// Current wall-clock time
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono_anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_anchor + elapsed
    }

    /// Current monotonic instant (for deadlines and rate limiting)
    pub fn instant(&self) -> Instant {
        Instant::now()
    }

    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Format a timestamp the way every table stores it
pub fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp back into UTC
pub fn from_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn test_now_follows_paused_time() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Clock::starting_at(start);

        assert_eq!(clock.now(), start);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_db_timestamp_roundtrip_keeps_millis() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        let stored = to_db_timestamp(at);

        assert_eq!(stored, "2024-05-01T12:00:00.250Z");
        assert_eq!(from_db_timestamp(&stored), Some(at));
    }
}
