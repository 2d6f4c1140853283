//! Connection phases and the transition table

use crate::sessions::OpenSession;
use serde::Serialize;
use tokio::time::Instant;

/// Where a supervisor is in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing in flight and nothing scheduled (fresh, or retries exhausted)
    Idle,
    CheckingLive,
    WaitingForLive,
    Connecting,
    Live,
    /// A retry or reconnect cooldown is pending
    Backoff,
    /// Retired by the reconciler; terminal
    Removed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingLive => "checking_live",
            Self::WaitingForLive => "waiting_for_live",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Backoff => "backoff",
            Self::Removed => "removed",
        }
    }

    /// Phase after `transition`, or `None` if it does not apply here
    pub fn next(self, transition: Transition) -> Option<Phase> {
        use Phase::*;
        use Transition::*;

        match (self, transition) {
            (Removed, _) => None,
            (_, Retired) => Some(Removed),

            (Idle | Backoff, CheckStarted) => Some(CheckingLive),
            (CheckingLive, FoundLive) => Some(Connecting),
            (CheckingLive, FoundOffline) => Some(WaitingForLive),
            (WaitingForLive, WentLive) => Some(Connecting),
            (CheckingLive | WaitingForLive, CheckFailed) => Some(Backoff),
            (CheckingLive | WaitingForLive, RetriesExhausted) => Some(Idle),

            (Connecting, Connected) => Some(Live),
            (Connecting, ConnectFailed) => Some(Backoff),

            (Live, StreamEnded | Disconnected) => Some(Backoff),

            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CheckStarted,
    FoundLive,
    FoundOffline,
    WentLive,
    CheckFailed,
    RetriesExhausted,
    Connected,
    ConnectFailed,
    StreamEnded,
    Disconnected,
    Retired,
}

/// Per-identity connection state, owned by exactly one supervisor task
#[derive(Debug)]
pub struct ConnectionState {
    pub phase: Phase,
    /// Set for the duration of one live-check-and-connect cycle
    pub is_connecting: bool,
    pub last_live_check: Option<Instant>,
    /// Consecutive failed cycles
    pub retry_count: u32,
    pub is_live: bool,
    pub room_id: Option<String>,
    pub session: Option<OpenSession>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            is_connecting: false,
            last_live_check: None,
            retry_count: 0,
            is_live: false,
            room_id: None,
            session: None,
        }
    }
}
