//! Single pending wake-up per supervisor
//!
//! Replaces chains of self-rescheduling timers: the driving loop owns one
//! `Schedule`, and setting a new wake-up overwrites the old one. Dropping the
//! supervisor drops the pending wake-up with it.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Why the next cycle was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum WakeReason {
    /// First cycle after spawn
    Initial,
    /// Previous live check was too recent
    RateLimited,
    /// Exponential backoff after a failed cycle
    Retry { attempt: u32 },
    /// Reconnect after stream end, disconnect or a failed connect
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    pub at: Instant,
    pub reason: WakeReason,
}

#[derive(Debug, Default)]
pub struct Schedule {
    next: Option<Wake>,
}

impl Schedule {
    pub fn at(&mut self, at: Instant, reason: WakeReason) {
        self.next = Some(Wake { at, reason });
    }

    pub fn after(&mut self, now: Instant, delay: Duration, reason: WakeReason) {
        self.at(now + delay, reason);
    }

    pub fn clear(&mut self) {
        self.next = None;
    }

    pub fn next(&self) -> Option<Wake> {
        self.next
    }

    /// Resolves at the pending deadline; never resolves when nothing is scheduled
    pub async fn wait(&self) {
        match self.next {
            Some(wake) => tokio::time::sleep_until(wake.at).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Consume the pending wake-up
    pub fn take(&mut self) -> Option<Wake> {
        self.next.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_later_schedule_replaces_earlier() {
        let mut schedule = Schedule::default();
        let now = Instant::now();

        schedule.after(now, Duration::from_secs(5), WakeReason::Cooldown);
        schedule.after(now, Duration::from_secs(60), WakeReason::Retry { attempt: 1 });

        schedule.wait().await;
        assert_eq!(Instant::now(), now + Duration::from_secs(60));
        assert_eq!(
            schedule.take().map(|w| w.reason),
            Some(WakeReason::Retry { attempt: 1 })
        );
        assert!(schedule.next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_schedule_never_fires() {
        let mut schedule = Schedule::default();
        schedule.after(Instant::now(), Duration::from_secs(1), WakeReason::Initial);
        schedule.clear();

        let fired = tokio::time::timeout(Duration::from_secs(3600), schedule.wait()).await;
        assert!(fired.is_err());
    }
}
