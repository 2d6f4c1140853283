//! Connection supervisor: one driving loop per monitored identity
//!
//! Each supervisor owns its identity's [`ConnectionState`], a single pending
//! wake-up ([`Schedule`]) and the receiving end of the platform event queue.
//! The loop waits for whichever comes first:
//!
//! ```text
//!            ┌──────────── retire signal ──────────────→ retire() → Removed
//!            │
//! run() ─────┼──── schedule fires ──→ run_cycle()
//!            │                          ├─ rate limited? → reschedule
//!            │                          ├─ fetch_is_live ─┬─ live ───→ connect()
//!            │                          │                 └─ offline → wait_until_live → connect()
//!            │                          └─ failure → retry after min(base·2^n, cap)
//!            │
//!            └──── platform event ───→ interaction → event row + fan stat + session counter
//!                                      stream end / disconnect → close session, cooldown
//! ```
//!
//! Retirement only interrupts waits on the platform (live check, wait for
//! live, connect) and idle waits. Storage work always runs to completion, so a
//! session row is never written without the supervisor knowing about it.
//!
//! Nothing here is shared with other supervisors except the persistence
//! gateway and the session-id sequence.

mod schedule;
mod state;

pub use schedule::{Schedule, Wake, WakeReason};
pub use state::{ConnectionState, Phase, Transition};

use crate::clock::Clock;
use crate::config::SupervisorConfig;
use crate::events::{Interaction, LiveEvent, RawEvent};
use crate::platform::{PlatformConnector, PlatformError, PlatformHandle};
use crate::sessions::SessionTracker;
use crate::store::{PersistenceGateway, StoreError};
use crate::util::exponential_delay;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// A platform wait was abandoned because the supervisor is being retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("supervisor retired")]
pub struct Retired;

/// Failure of the live-check half of a cycle (drives exponential backoff)
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    LiveCheck(#[from] PlatformError),

    #[error(transparent)]
    Retired(#[from] Retired),
}

/// Failure of the connect half of a cycle (drives the reconnect cooldown)
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("session storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Retired(#[from] Retired),
}

/// Timing and retry knobs, resolved from `[supervisor]`
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub min_check_interval: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub reconnect_cooldown: Duration,
    pub teardown_grace: Duration,
    pub event_buffer: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            min_check_interval: Duration::from_secs(config.min_check_interval_secs),
            max_retries: config.max_retries,
            base_retry_delay: Duration::from_secs(config.base_retry_delay_secs),
            max_retry_delay: Duration::from_secs(config.max_retry_delay_secs),
            reconnect_cooldown: Duration::from_secs(config.reconnect_cooldown_secs),
            teardown_grace: Duration::from_millis(config.teardown_grace_ms),
            event_buffer: config.event_buffer.max(1),
        }
    }
}

/// Everything a supervisor needs besides its platform handle
#[derive(Clone)]
pub struct SupervisorContext {
    pub store: PersistenceGateway,
    pub tracker: SessionTracker,
    pub clock: Clock,
    pub settings: SupervisorSettings,
}

/// Snapshot published on every state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub phase: Phase,
    pub is_connecting: bool,
    pub is_live: bool,
    pub retry_count: u32,
    pub room_id: Option<String>,
    pub session_id: Option<String>,
    pub next_wake: Option<WakeReason>,
    /// Platform events consumed so far
    pub events_handled: u64,
}

/// Registry-side handle to a running supervisor task
pub struct SupervisorHandle {
    retire: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    status: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    /// Ask the supervisor to stop; it disconnects and discards its state
    pub fn retire(&mut self) {
        if let Some(tx) = self.retire.take() {
            let _ = tx.send(());
        }
    }

    /// The task ended on its own (panic) or after retirement
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Wait for the task to end, aborting it after `grace`
    pub async fn join(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            tracing::warn!("Supervisor did not stop within {:?}, aborting", grace);
            self.task.abort();
        }
    }
}

/// Open a platform handle for `identity` and start its driving loop
pub fn spawn(
    identity: &str,
    connector: &dyn PlatformConnector,
    ctx: &SupervisorContext,
) -> SupervisorHandle {
    let (events_tx, events_rx) = mpsc::channel(ctx.settings.event_buffer);
    let platform = connector.open(identity, events_tx);
    let supervisor = Supervisor::new(identity, platform, events_rx, ctx);
    let status = supervisor.status.subscribe();

    let (retire_tx, retire_rx) = oneshot::channel();
    let task = tokio::spawn(supervisor.run(retire_rx));

    SupervisorHandle {
        retire: Some(retire_tx),
        task,
        status,
    }
}

pub struct Supervisor {
    identity: String,
    platform: Arc<dyn PlatformHandle>,
    events: mpsc::Receiver<RawEvent>,
    events_open: bool,
    store: PersistenceGateway,
    tracker: SessionTracker,
    clock: Clock,
    settings: SupervisorSettings,
    state: ConnectionState,
    schedule: Schedule,
    events_handled: u64,
    status: watch::Sender<SupervisorStatus>,
    retire: Option<oneshot::Receiver<()>>,
    retired: bool,
}

impl Supervisor {
    pub fn new(
        identity: &str,
        platform: Arc<dyn PlatformHandle>,
        events: mpsc::Receiver<RawEvent>,
        ctx: &SupervisorContext,
    ) -> Self {
        let state = ConnectionState::default();
        let (status, _) = watch::channel(SupervisorStatus {
            phase: state.phase,
            is_connecting: false,
            is_live: false,
            retry_count: 0,
            room_id: None,
            session_id: None,
            next_wake: None,
            events_handled: 0,
        });

        Self {
            identity: identity.to_string(),
            platform,
            events,
            events_open: true,
            store: ctx.store.clone(),
            tracker: ctx.tracker.clone(),
            clock: ctx.clock,
            settings: ctx.settings.clone(),
            state,
            schedule: Schedule::default(),
            events_handled: 0,
            status,
            retire: None,
            retired: false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Drive the state machine until `retire` fires (or its sender is dropped)
    pub async fn run(mut self, retire: oneshot::Receiver<()>) {
        tracing::info!(identity = %self.identity, "Supervisor started");
        self.retire = Some(retire);
        self.schedule.at(self.clock.instant(), WakeReason::Initial);
        self.publish();

        while !self.retired {
            tokio::select! {
                biased;
                _ = retire_requested(&mut self.retire) => self.retired = true,
                received = self.events.recv(), if self.events_open => match received {
                    Some(raw) => self.handle_raw(raw).await,
                    None => {
                        tracing::debug!(identity = %self.identity, "Platform event queue closed");
                        self.events_open = false;
                    }
                },
                _ = self.schedule.wait() => {
                    if let Some(wake) = self.schedule.take() {
                        tracing::debug!(
                            identity = %self.identity,
                            reason = ?wake.reason,
                            "Wake-up"
                        );
                    }
                    self.run_cycle().await;
                }
            }
        }

        self.retire().await;
    }

    /// Await a platform call, giving up as soon as retirement is requested
    async fn until_retired<T>(&mut self, call: impl Future<Output = T>) -> Result<T, Retired> {
        if self.retired {
            return Err(Retired);
        }

        tokio::select! {
            biased;
            _ = retire_requested(&mut self.retire) => {
                self.retired = true;
                Err(Retired)
            }
            value = call => Ok(value),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Live check & connect
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_cycle(&mut self) {
        let now = self.clock.instant();

        if let Some(last) = self.state.last_live_check {
            let since = now.saturating_duration_since(last);
            if since < self.settings.min_check_interval {
                let wait = self.settings.min_check_interval - since;
                tracing::debug!(
                    identity = %self.identity,
                    wait_ms = wait.as_millis() as u64,
                    "Live check rate limited"
                );
                self.schedule.after(now, wait, WakeReason::RateLimited);
                self.publish();
                return;
            }
        }

        if self.state.is_connecting {
            tracing::debug!(identity = %self.identity, "Cycle already in progress, skipping");
            return;
        }

        if self.state.is_live && self.platform.is_connected() {
            tracing::debug!(identity = %self.identity, "Already live, skipping cycle");
            return;
        }

        self.state.is_connecting = true;
        self.state.last_live_check = Some(now);
        self.apply(Transition::CheckStarted);

        let outcome = self.check_and_connect().await;

        self.state.is_connecting = false;
        if let Err(err) = outcome {
            self.handle_cycle_failure(err);
        }
        self.publish();
    }

    async fn check_and_connect(&mut self) -> Result<(), CycleError> {
        let platform = self.platform.clone();
        let live = self.until_retired(platform.fetch_is_live()).await??;
        self.state.retry_count = 0;

        if live {
            self.apply(Transition::FoundLive);
        } else {
            self.apply(Transition::FoundOffline);
            self.publish();
            tracing::info!(identity = %self.identity, "Offline, waiting for stream to start");
            self.until_retired(platform.wait_until_live()).await??;
            self.apply(Transition::WentLive);
        }

        self.connect().await;
        Ok(())
    }

    fn handle_cycle_failure(&mut self, err: CycleError) {
        if matches!(err, CycleError::Retired(_)) {
            return;
        }

        self.state.retry_count += 1;
        let attempt = self.state.retry_count;

        if attempt <= self.settings.max_retries {
            let delay = exponential_delay(
                self.settings.base_retry_delay,
                attempt,
                self.settings.max_retry_delay,
            );
            tracing::warn!(
                identity = %self.identity,
                error = %err,
                attempt,
                max_retries = self.settings.max_retries,
                delay_secs = delay.as_secs(),
                "Live check failed, retrying"
            );
            self.apply(Transition::CheckFailed);
            self.schedule
                .after(self.clock.instant(), delay, WakeReason::Retry { attempt });
        } else {
            // Nothing further is scheduled; a later termination event or a
            // respawn by the reconciler is the only way out of Idle.
            tracing::error!(
                identity = %self.identity,
                error = %err,
                attempts = attempt,
                "Retries exhausted, supervisor idle"
            );
            self.state.retry_count = 0;
            self.apply(Transition::RetriesExhausted);
        }
    }

    async fn connect(&mut self) {
        match self.try_connect().await {
            Ok(()) => self.enrich().await,
            Err(ConnectError::Retired(_)) => {
                tracing::debug!(identity = %self.identity, "Connect abandoned, retiring");
            }
            Err(err) => {
                let cooldown = self.settings.reconnect_cooldown;
                tracing::warn!(
                    identity = %self.identity,
                    error = %err,
                    cooldown_secs = cooldown.as_secs(),
                    "Connect failed"
                );

                self.state.is_live = false;
                self.state.room_id = None;
                if self.platform.is_connected() {
                    self.platform.disconnect().await;
                }
                self.apply(Transition::ConnectFailed);
                self.schedule
                    .after(self.clock.instant(), cooldown, WakeReason::Cooldown);
            }
        }
    }

    async fn try_connect(&mut self) -> Result<(), ConnectError> {
        // A previous connection that never delivered a termination event.
        // Opening a second session while that one is still open is not allowed.
        self.close_open_session().await?;

        let platform = self.platform.clone();
        if platform.is_connected() {
            tracing::debug!(identity = %self.identity, "Still connected, tearing down first");
            platform.disconnect().await;
            let clock = self.clock;
            self.until_retired(clock.sleep(self.settings.teardown_grace))
                .await?;
        }

        let room = self.until_retired(platform.connect()).await??;
        let session = self
            .tracker
            .open_session(&self.identity, &room.room_id)
            .await?;

        self.state.session = Some(session);
        self.state.room_id = Some(room.room_id.clone());
        self.state.is_live = true;
        self.state.retry_count = 0;
        self.apply(Transition::Connected);
        self.publish();

        tracing::info!(identity = %self.identity, room = %room.room_id, "Connected");

        let now = self.clock.now();
        if let Err(err) = self
            .store
            .upsert_stream_info(&self.identity, &room.room_id, now)
            .await
        {
            tracing::warn!(
                identity = %self.identity,
                error = %err,
                "Failed to record stream info"
            );
        }
        if let Err(err) = self.store.touch_last_seen(&self.identity, now).await {
            tracing::warn!(
                identity = %self.identity,
                error = %err,
                "Failed to update last seen"
            );
        }

        Ok(())
    }

    /// Best-effort room details; a failure never affects the connection
    async fn enrich(&mut self) {
        let info = match self.platform.fetch_room_info().await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(
                    identity = %self.identity,
                    error = %err,
                    "Room info unavailable, continuing without it"
                );
                return;
            }
        };

        if let Err(err) = self
            .store
            .enrich_stream_info(&self.identity, &info, self.clock.now())
            .await
        {
            tracing::warn!(
                identity = %self.identity,
                error = %err,
                "Failed to store room info"
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Platform events
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_raw(&mut self, raw: RawEvent) {
        self.events_handled += 1;

        match LiveEvent::ingest(raw, self.clock.now()) {
            LiveEvent::Interaction(interaction) => self.handle_interaction(interaction).await,
            LiveEvent::StreamEnded => {
                self.handle_termination(Transition::StreamEnded, "stream ended")
                    .await
            }
            LiveEvent::Disconnected { reason } => {
                self.handle_termination(Transition::Disconnected, &reason)
                    .await
            }
        }

        self.publish();
    }

    /// Event row, fan statistic (+1) and session counter (+magnitude)
    async fn handle_interaction(&mut self, interaction: Interaction) {
        let kind = interaction.payload.kind();
        tracing::debug!(
            identity = %self.identity,
            actor = %interaction.actor,
            kind = %kind,
            "Interaction"
        );

        if let Err(err) = self.store.insert_event(&self.identity, &interaction).await {
            tracing::warn!(
                identity = %self.identity,
                kind = %kind,
                error = %err,
                "Dropped event record"
            );
        }

        if let Err(err) = self
            .store
            .bump_user_stat(&self.identity, &interaction.actor, kind, interaction.timestamp)
            .await
        {
            tracing::warn!(
                identity = %self.identity,
                kind = %kind,
                error = %err,
                "Dropped fan statistic"
            );
        }

        if let Err(err) = self
            .tracker
            .record_event(
                self.state.session.as_ref(),
                kind,
                interaction.payload.magnitude(),
            )
            .await
        {
            tracing::warn!(
                identity = %self.identity,
                kind = %kind,
                error = %err,
                "Dropped session counter"
            );
        }
    }

    async fn handle_termination(&mut self, transition: Transition, reason: &str) {
        let cooldown = self.settings.reconnect_cooldown;
        tracing::info!(
            identity = %self.identity,
            reason,
            cooldown_secs = cooldown.as_secs(),
            "Stream terminated"
        );

        // On failure the session stays held and the next connect or retire
        // closes it
        let _ = self.close_open_session().await;
        self.state.is_live = false;
        self.state.room_id = None;

        if let Err(err) = self
            .store
            .mark_stream_offline(&self.identity, self.clock.now())
            .await
        {
            tracing::warn!(
                identity = %self.identity,
                error = %err,
                "Failed to mark stream offline"
            );
        }

        if self.platform.is_connected() {
            self.platform.disconnect().await;
        }

        if self.apply(transition) {
            self.schedule
                .after(self.clock.instant(), cooldown, WakeReason::Cooldown);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Close the held session, if any
    ///
    /// The session is released only once the close has been persisted.
    async fn close_open_session(&mut self) -> Result<(), StoreError> {
        let Some(session) = self.state.session.as_ref() else {
            return Ok(());
        };

        match self.tracker.close_session(&self.identity, session).await {
            Ok(_) => {
                self.state.session = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    identity = %self.identity,
                    session = %session.session_id,
                    error = %err,
                    "Failed to close session"
                );
                Err(err)
            }
        }
    }

    async fn retire(mut self) {
        self.apply(Transition::Retired);
        self.schedule.clear();

        if self.close_open_session().await.is_err() {
            tracing::error!(identity = %self.identity, "Retired with its session still open");
        }
        self.state.is_live = false;
        if self.platform.is_connected() {
            self.platform.disconnect().await;
        }

        self.publish();
        tracing::info!(identity = %self.identity, "Supervisor retired");
    }

    /// Apply `transition`; returns false (and leaves the phase alone) if it
    /// does not apply to the current phase. Does not publish.
    fn apply(&mut self, transition: Transition) -> bool {
        match self.state.phase.next(transition) {
            Some(next) => {
                if next != self.state.phase {
                    tracing::debug!(
                        identity = %self.identity,
                        from = %self.state.phase,
                        to = %next,
                        "Phase change"
                    );
                }
                self.state.phase = next;
                true
            }
            None => {
                tracing::debug!(
                    identity = %self.identity,
                    phase = %self.state.phase,
                    ?transition,
                    "Ignoring transition"
                );
                false
            }
        }
    }

    fn publish(&self) {
        self.status.send_replace(SupervisorStatus {
            phase: self.state.phase,
            is_connecting: self.state.is_connecting,
            is_live: self.state.is_live,
            retry_count: self.state.retry_count,
            room_id: self.state.room_id.clone(),
            session_id: self
                .state
                .session
                .as_ref()
                .map(|s| s.session_id.clone()),
            next_wake: self.schedule.next().map(|w| w.reason),
            events_handled: self.events_handled,
        });
    }
}

/// Resolves once retirement is requested or the handle is dropped, then
/// stays pending
async fn retire_requested(retire: &mut Option<oneshot::Receiver<()>>) {
    match retire.as_mut() {
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending::<()>().await,
    }
    *retire = None;
}
