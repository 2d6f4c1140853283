//! Identity registry reconciliation
//!
//! [`SupervisorRegistry`] is the single owner of every running supervisor,
//! keyed by identity. [`Reconciler`] periodically reads the desired identity
//! set and diffs it against the registry both ways: new identities get a
//! supervisor, vanished ones are retired, everything else is left alone.

use crate::platform::PlatformConnector;
use crate::store::{PersistenceGateway, StoreError};
use crate::supervisor::{self, Phase, SupervisorContext, SupervisorHandle, SupervisorStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// How long retired supervisors get to finish before being aborted
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Source of the desired identity set
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Active identity names, in registry order
    async fn list_active(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl IdentityRegistry for PersistenceGateway {
    async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        self.active_identities().await
    }
}

/// What one reconcile pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Supervisors whose task had already ended (respawned if still desired)
    pub pruned: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.pruned.is_empty()
    }
}

pub struct SupervisorRegistry {
    connector: Arc<dyn PlatformConnector>,
    ctx: SupervisorContext,
    running: HashMap<String, SupervisorHandle>,
    retiring: Vec<SupervisorHandle>,
}

impl SupervisorRegistry {
    pub fn new(connector: Arc<dyn PlatformConnector>, ctx: SupervisorContext) -> Self {
        Self {
            connector,
            ctx,
            running: HashMap::new(),
            retiring: Vec::new(),
        }
    }

    /// Make the running set equal `desired`
    ///
    /// Idempotent: a second call with the same input changes nothing.
    pub fn reconcile(&mut self, desired: &[String]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        self.retiring.retain(|handle| !handle.is_finished());

        let mut finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        finished.sort();
        for name in finished {
            self.running.remove(&name);
            tracing::error!(identity = %name, "Supervisor task ended unexpectedly, pruning");
            report.pruned.push(name);
        }

        let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

        let mut gone: Vec<String> = self
            .running
            .keys()
            .filter(|name| !wanted.contains(name.as_str()))
            .cloned()
            .collect();
        gone.sort();
        for name in gone {
            if let Some(mut handle) = self.running.remove(&name) {
                handle.retire();
                self.retiring.push(handle);
                tracing::info!(identity = %name, "Supervisor retired");
                report.removed.push(name);
            }
        }

        for name in desired {
            if self.running.contains_key(name) {
                continue;
            }
            let handle = supervisor::spawn(name, self.connector.as_ref(), &self.ctx);
            self.running.insert(name.clone(), handle);
            tracing::info!(
                identity = %name,
                platform = self.connector.name(),
                "Supervisor spawned"
            );
            report.added.push(name.clone());
        }

        report
    }

    /// Running identities, sorted
    pub fn identities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self, identity: &str) -> Option<SupervisorStatus> {
        self.running.get(identity).map(SupervisorHandle::status)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Count of running supervisors per phase
    pub fn phase_counts(&self) -> HashMap<Phase, usize> {
        let mut counts = HashMap::new();
        for handle in self.running.values() {
            *counts.entry(handle.status().phase).or_insert(0) += 1;
        }
        counts
    }

    /// Wait for supervisors retired by earlier reconciles to finish
    pub async fn drain_retired(&mut self, grace: Duration) {
        let retiring = std::mem::take(&mut self.retiring);
        futures::future::join_all(retiring.into_iter().map(|h| h.join(grace))).await;
    }

    /// Retire every supervisor and wait for them to finish
    pub async fn shutdown(&mut self, grace: Duration) {
        let count = self.running.len();
        for (_, mut handle) in self.running.drain() {
            handle.retire();
            self.retiring.push(handle);
        }
        self.drain_retired(grace).await;
        tracing::info!(supervisors = count, "All supervisors stopped");
    }
}

/// Periodic reconcile loop
pub struct Reconciler {
    registry: SupervisorRegistry,
    source: Arc<dyn IdentityRegistry>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: SupervisorRegistry,
        source: Arc<dyn IdentityRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
        }
    }

    /// One pass; a failed registry read leaves the running set untouched
    pub async fn tick(&mut self) -> Option<ReconcileReport> {
        let desired = match self.source.list_active().await {
            Ok(desired) => desired,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    running = self.registry.len(),
                    "Failed to read identity registry, keeping current supervisors"
                );
                return None;
            }
        };

        let report = self.registry.reconcile(&desired);
        let counts = self.registry.phase_counts();
        let live = counts.get(&Phase::Live).copied().unwrap_or(0);

        if report.is_empty() {
            tracing::debug!(running = self.registry.len(), live, "Reconciled, no changes");
        } else {
            tracing::info!(
                running = self.registry.len(),
                live,
                added = report.added.len(),
                removed = report.removed.len(),
                pruned = report.pruned.len(),
                "Reconciled identity set"
            );
        }

        Some(report)
    }

    pub fn registry(&self) -> &SupervisorRegistry {
        &self.registry
    }

    /// Reconcile on every interval until `shutdown` fires, then stop all supervisors
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.registry.shutdown(SHUTDOWN_GRACE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::events::RawEvent;
    use crate::platform::{PlatformError, PlatformHandle, RoomInfo, RoomState};
    use crate::sessions::SessionTracker;
    use crate::store::tests::test_gateway;
    use crate::supervisor::SupervisorSettings;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Counts opens and drops per identity; platforms never go live
    #[derive(Default)]
    struct CountingConnector {
        opened: Arc<Mutex<HashMap<String, u32>>>,
        dropped: Arc<Mutex<HashMap<String, u32>>>,
        /// Identities whose first handle panics on the live check
        panic_first: Mutex<HashSet<String>>,
    }

    impl CountingConnector {
        fn opened(&self, identity: &str) -> u32 {
            self.opened.lock().unwrap().get(identity).copied().unwrap_or(0)
        }

        fn dropped(&self, identity: &str) -> u32 {
            self.dropped.lock().unwrap().get(identity).copied().unwrap_or(0)
        }
    }

    impl PlatformConnector for CountingConnector {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn open(&self, identity: &str, _events: mpsc::Sender<RawEvent>) -> Arc<dyn PlatformHandle> {
            *self
                .opened
                .lock()
                .unwrap()
                .entry(identity.to_string())
                .or_insert(0) += 1;
            Arc::new(NeverLive {
                identity: identity.to_string(),
                panics: self.panic_first.lock().unwrap().remove(identity),
                dropped: self.dropped.clone(),
            })
        }
    }

    struct NeverLive {
        identity: String,
        panics: bool,
        dropped: Arc<Mutex<HashMap<String, u32>>>,
    }

    #[async_trait]
    impl PlatformHandle for NeverLive {
        async fn fetch_is_live(&self) -> Result<bool, PlatformError> {
            if self.panics {
                panic!("client crashed for {}", self.identity);
            }
            Ok(false)
        }

        async fn wait_until_live(&self) -> Result<(), PlatformError> {
            std::future::pending().await
        }

        async fn connect(&self) -> Result<RoomState, PlatformError> {
            Err(PlatformError::Connect("never live".to_string()))
        }

        async fn fetch_room_info(&self) -> Result<RoomInfo, PlatformError> {
            Err(PlatformError::NotConnected)
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            false
        }
    }

    impl Drop for NeverLive {
        fn drop(&mut self) {
            if let Ok(mut dropped) = self.dropped.lock() {
                *dropped.entry(self.identity.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Registry returning scripted results, repeating the last one
    struct ScriptedRegistry {
        results: Mutex<VecDeque<Option<Vec<String>>>>,
    }

    #[async_trait]
    impl IdentityRegistry for ScriptedRegistry {
        async fn list_active(&self) -> Result<Vec<String>, StoreError> {
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.pop_front().flatten()
            } else {
                results.front().cloned().flatten()
            };
            next.ok_or(StoreError::Closed)
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn context() -> (tempfile::TempDir, SupervisorContext) {
        let (dir, store) = test_gateway();
        let clock = Clock::system();
        let ctx = SupervisorContext {
            tracker: SessionTracker::new(store.clone(), clock),
            store,
            clock,
            settings: SupervisorSettings::default(),
        };
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_reconcile_spawns_new_and_retires_removed_only() {
        let (_dir, ctx) = context();
        let connector = Arc::new(CountingConnector::default());
        let mut registry = SupervisorRegistry::new(connector.clone(), ctx);

        let first = registry.reconcile(&names(&["alice", "bob"]));
        assert_eq!(first.added, names(&["alice", "bob"]));
        assert!(first.removed.is_empty());

        let second = registry.reconcile(&names(&["bob", "carol"]));
        assert_eq!(second.added, names(&["carol"]));
        assert_eq!(second.removed, names(&["alice"]));

        let third = registry.reconcile(&names(&["bob", "carol"]));
        assert!(third.is_empty());

        registry.drain_retired(SHUTDOWN_GRACE).await;

        assert_eq!(registry.identities(), names(&["bob", "carol"]));
        assert_eq!(connector.opened("alice"), 1);
        assert_eq!(connector.dropped("alice"), 1);
        assert_eq!(connector.opened("bob"), 1);
        assert_eq!(connector.dropped("bob"), 0);
        assert_eq!(connector.opened("carol"), 1);
        assert_eq!(connector.dropped("carol"), 0);

        registry.shutdown(SHUTDOWN_GRACE).await;
        assert!(registry.is_empty());
        assert_eq!(connector.dropped("bob"), 1);
        assert_eq!(connector.dropped("carol"), 1);
    }

    #[tokio::test]
    async fn test_crashed_supervisor_is_pruned_and_respawned() {
        let (_dir, ctx) = context();
        let connector = Arc::new(CountingConnector::default());
        connector
            .panic_first
            .lock()
            .unwrap()
            .insert("alice".to_string());
        let mut registry = SupervisorRegistry::new(connector.clone(), ctx);
        let desired = names(&["alice", "bob"]);

        registry.reconcile(&desired);

        let mut pruned = Vec::new();
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let report = registry.reconcile(&desired);
            if !report.pruned.is_empty() {
                assert_eq!(report.added, names(&["alice"]));
                pruned = report.pruned;
                break;
            }
        }

        assert_eq!(pruned, names(&["alice"]));
        assert_eq!(connector.opened("alice"), 2);
        assert_eq!(connector.opened("bob"), 1);

        registry.shutdown(SHUTDOWN_GRACE).await;
    }

    #[tokio::test]
    async fn test_registry_read_failure_keeps_running_set() {
        let (_dir, ctx) = context();
        let connector = Arc::new(CountingConnector::default());
        let source = Arc::new(ScriptedRegistry {
            results: Mutex::new(VecDeque::from([Some(names(&["alice"])), None])),
        });
        let mut reconciler = Reconciler::new(
            SupervisorRegistry::new(connector.clone(), ctx),
            source,
            Duration::from_secs(60),
        );

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.added, names(&["alice"]));

        assert!(reconciler.tick().await.is_none());
        assert_eq!(reconciler.registry().identities(), names(&["alice"]));
        assert_eq!(connector.opened("alice"), 1);

        reconciler.registry.shutdown(SHUTDOWN_GRACE).await;
    }

    #[tokio::test]
    async fn test_run_retires_everything_on_shutdown() {
        let (_dir, ctx) = context();
        let store = ctx.store.clone();
        store
            .add_identity("alice", None, chrono::Utc::now())
            .await
            .unwrap();
        let connector = Arc::new(CountingConnector::default());
        let reconciler = Reconciler::new(
            SupervisorRegistry::new(connector.clone(), ctx),
            Arc::new(store),
            Duration::from_millis(20),
        );

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(reconciler.run(rx));

        for _ in 0..200 {
            if connector.opened("alice") > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.opened("alice"), 1);

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(connector.dropped("alice"), 1);
    }
}
