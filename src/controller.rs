//! Top-level controller: follows the `job_control` run signal
//!
//! Polls the desired run state and starts the monitor subsystem exactly once
//! on `stopped → started`, stops it exactly once on `started → stopped`.

use crate::platform::PlatformConnector;
use crate::registry::{IdentityRegistry, Reconciler, SupervisorRegistry, SHUTDOWN_GRACE};
use crate::store::{PersistenceGateway, RunState, StoreError};
use crate::supervisor::SupervisorContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// External desired-state store
#[async_trait]
pub trait RunSignal: Send + Sync {
    async fn desired_state(&self) -> Result<RunState, StoreError>;
}

#[async_trait]
impl RunSignal for PersistenceGateway {
    async fn desired_state(&self) -> Result<RunState, StoreError> {
        self.run_state().await
    }
}

/// Something the controller can switch on and off
#[async_trait]
pub trait Subsystem: Send {
    async fn start(&mut self);
    async fn stop(&mut self);
}

/// The monitor: a reconciler task owning every supervisor
pub struct MonitorService {
    connector: Arc<dyn PlatformConnector>,
    source: Arc<dyn IdentityRegistry>,
    ctx: SupervisorContext,
    refresh_interval: Duration,
    running: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl MonitorService {
    pub fn new(
        connector: Arc<dyn PlatformConnector>,
        source: Arc<dyn IdentityRegistry>,
        ctx: SupervisorContext,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            connector,
            source,
            ctx,
            refresh_interval,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

#[async_trait]
impl Subsystem for MonitorService {
    async fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let registry = SupervisorRegistry::new(self.connector.clone(), self.ctx.clone());
        let reconciler = Reconciler::new(registry, self.source.clone(), self.refresh_interval);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(reconciler.run(shutdown_rx));
        self.running = Some((shutdown_tx, task));

        tracing::info!(
            platform = self.connector.name(),
            refresh_secs = self.refresh_interval.as_secs(),
            "Monitor started"
        );
    }

    async fn stop(&mut self) {
        let Some((shutdown_tx, mut task)) = self.running.take() else {
            return;
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE * 2, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Reconciler task failed"),
            Err(_) => {
                tracing::warn!("Reconciler did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!("Monitor stopped");
    }
}

pub struct Controller<S: Subsystem> {
    signal: Arc<dyn RunSignal>,
    subsystem: S,
    poll_interval: Duration,
    running: bool,
}

impl<S: Subsystem> Controller<S> {
    pub fn new(signal: Arc<dyn RunSignal>, subsystem: S, poll_interval: Duration) -> Self {
        Self {
            signal,
            subsystem,
            poll_interval,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn subsystem(&self) -> &S {
        &self.subsystem
    }

    /// Read the signal once; returns the new state if a transition happened
    pub async fn poll_once(&mut self) -> Option<RunState> {
        let desired = match self.signal.desired_state().await {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read run signal");
                return None;
            }
        };

        match (desired, self.running) {
            (RunState::Started, false) => {
                tracing::info!("Run signal: started");
                self.subsystem.start().await;
                self.running = true;
                Some(RunState::Started)
            }
            (RunState::Stopped, true) => {
                tracing::info!("Run signal: stopped");
                self.subsystem.stop().await;
                self.running = false;
                Some(RunState::Stopped)
            }
            _ => None,
        }
    }

    /// Poll until `shutdown` resolves, then stop the subsystem if it is running
    pub async fn run<F>(mut self, shutdown: F) -> S
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        if self.running {
            tracing::info!("Shutting down monitor");
            self.subsystem.stop().await;
            self.running = false;
        }

        self.subsystem
    }
}
