//! Request-then-poll reconciliation of instance power state.
//!
//! The poller:
//! - Sends a toggle request to the status provider
//! - Registers one watch per resource, replacing any live watch for that id
//! - Polls the provider on a fixed interval until the target state shows up
//! - Resolves every watch to exactly one terminal [`Outcome`]
//!
//! Each watch runs as its own tokio task. The registry decides who ends a
//! watch: whoever removes the registry entry (the task itself, `cancel`, or a
//! replacing request) fixes the outcome, so a watch can never both converge
//! and be cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{PolicyError, PollError, ProviderError, RequestError};
use crate::policy::{PollPolicy, TargetResolution};
use crate::provider::StatusProvider;
use crate::state::{PowerState, WatchPhase};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Unique id of a single watch, distinct across replacements of the same
/// resource.
pub type WatchId = u64;

/// Terminal result of a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target state was observed.
    Converged(PowerState),

    /// The watch was cancelled or replaced.
    Cancelled,

    /// Too many consecutive status reads failed.
    Failed(PollError),

    /// The attempt or duration bound ran out before convergence.
    TimedOut { attempts: u32, elapsed: Duration },
}

impl Outcome {
    pub fn phase(&self) -> WatchPhase {
        match self {
            Self::Converged(_) => WatchPhase::Converged,
            Self::Cancelled => WatchPhase::Cancelled,
            Self::Failed(_) => WatchPhase::Failed,
            Self::TimedOut { .. } => WatchPhase::TimedOut,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged(state) => write!(f, "converged ({state})"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::TimedOut { attempts, elapsed } => {
                write!(f, "timed out after {attempts} polls ({elapsed:?})")
            }
        }
    }
}

/// Lifecycle events broadcast to subscribers (UI layers, CLI progress).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A transition request is about to be sent.
    Requesting {
        resource_id: String,
        target: PowerState,
    },

    /// The request was acknowledged and polling has started.
    Polling {
        resource_id: String,
        watch_id: WatchId,
        target: PowerState,
    },

    /// A poll returned a state.
    Observed {
        resource_id: String,
        watch_id: WatchId,
        attempt: u32,
        state: PowerState,
    },

    /// A poll failed.
    PollFailed {
        resource_id: String,
        watch_id: WatchId,
        attempt: u32,
        consecutive_failures: u32,
        error: PollError,
    },

    /// The watch reached a terminal outcome.
    Finished {
        resource_id: String,
        watch_id: WatchId,
        outcome: Outcome,
    },
}

impl WatchEvent {
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Requesting { resource_id, .. }
            | Self::Polling { resource_id, .. }
            | Self::Observed { resource_id, .. }
            | Self::PollFailed { resource_id, .. }
            | Self::Finished { resource_id, .. } => resource_id,
        }
    }
}

/// Handle to a live or finished watch.
///
/// Dropping the handle does not cancel the watch.
#[derive(Debug, Clone)]
pub struct TransitionHandle {
    watch_id: WatchId,
    resource_id: String,
    target: PowerState,
    outcome_rx: watch::Receiver<Option<Outcome>>,
}

impl TransitionHandle {
    pub fn watch_id(&self) -> WatchId {
        self.watch_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn target(&self) -> PowerState {
        self.target
    }

    /// The outcome, if the watch has already finished.
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(&self) -> Outcome {
        let mut rx = self.outcome_rx.clone();
        if let Ok(value) = rx.wait_for(Option::is_some).await {
            if let Some(outcome) = value.as_ref() {
                return outcome.clone();
            }
        }
        // The watch task is gone without publishing; nothing can converge.
        Outcome::Cancelled
    }
}

/// Registry entry for a live watch.
struct WatchEntry {
    watch_id: WatchId,
    target: PowerState,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchEntry {
    fn signal_cancel(&self) {
        // The task may already be settling; a closed channel is fine.
        let _ = self.cancel_tx.send(true);
    }
}

struct Shared<P> {
    provider: P,
    policy: PollPolicy,
    registry: RwLock<HashMap<String, WatchEntry>>,
    next_watch_id: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl<P: StatusProvider> Shared<P> {
    fn emit(&self, event: WatchEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Run a provider call under the request timeout.
    async fn call<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let limit = self.policy.request_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(limit)),
        }
    }

    async fn poll_once(&self, resource_id: &str) -> Result<PowerState, PollError> {
        self.call(self.provider.get_state(resource_id))
            .await
            .map_err(|source| PollError {
                resource: resource_id.to_string(),
                source,
            })
    }

    /// Remove the watch's own registry entry and fix its outcome.
    ///
    /// If the entry is already gone (or belongs to a newer watch), the watch
    /// was cancelled or replaced and that is its outcome.
    async fn settle(&self, resource_id: &str, watch_id: WatchId, outcome: Outcome) -> Outcome {
        let mut registry = self.registry.write().await;
        let owned = registry
            .get(resource_id)
            .is_some_and(|entry| entry.watch_id == watch_id);
        if owned {
            registry.remove(resource_id);
            outcome
        } else {
            Outcome::Cancelled
        }
    }
}

/// Reconciliation poller over a status provider.
///
/// Cheap to clone; clones share the same registry.
pub struct Poller<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for Poller<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: StatusProvider> Poller<P> {
    /// Create a poller with the given policy.
    pub fn new(provider: P, policy: PollPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                provider,
                policy,
                registry: RwLock::new(HashMap::new()),
                next_watch_id: AtomicU64::new(1),
                events,
            }),
        })
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.shared.policy
    }

    pub fn provider(&self) -> &P {
        &self.shared.provider
    }

    /// Subscribe to lifecycle events of every watch started afterwards.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.shared.events.subscribe()
    }

    /// Request a toggle of `resource_id` and start watching for convergence.
    ///
    /// Any live watch for the same resource is cancelled first. If the
    /// request itself fails no watch is created.
    pub async fn request_transition(
        &self,
        resource_id: &str,
        current: PowerState,
    ) -> Result<TransitionHandle, RequestError> {
        if resource_id.trim().is_empty() {
            return Err(RequestError::InvalidResource);
        }

        self.cancel_resource(resource_id).await;

        let current = match self.shared.policy.target_resolution {
            TargetResolution::CallerState => current,
            TargetResolution::Authoritative => self
                .shared
                .call(self.shared.provider.get_state(resource_id))
                .await
                .map_err(|source| RequestError::StateRead {
                    resource: resource_id.to_string(),
                    source,
                })?,
        };
        let target = current.toggle_target();

        self.shared.emit(WatchEvent::Requesting {
            resource_id: resource_id.to_string(),
            target,
        });

        if let Err(source) = self
            .shared
            .call(self.shared.provider.request_transition(resource_id))
            .await
        {
            warn!(resource_id, error = %source, "Transition request failed");
            return Err(RequestError::Provider {
                resource: resource_id.to_string(),
                source,
            });
        }

        let watch_id = self.shared.next_watch_id.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        // Hold the lock across spawn + insert so the task cannot settle
        // before its entry exists.
        let mut registry = self.shared.registry.write().await;
        let task = tokio::spawn(run_watch(
            Arc::clone(&self.shared),
            resource_id.to_string(),
            watch_id,
            target,
            cancel_rx,
            outcome_tx,
        ));
        let entry = WatchEntry {
            watch_id,
            target,
            cancel_tx,
            task,
        };
        if let Some(previous) = registry.insert(resource_id.to_string(), entry) {
            debug!(
                resource_id,
                replaced_watch_id = previous.watch_id,
                "Replacing live watch"
            );
            previous.signal_cancel();
        }
        self.shared.emit(WatchEvent::Polling {
            resource_id: resource_id.to_string(),
            watch_id,
            target,
        });
        drop(registry);

        info!(
            resource_id,
            watch_id,
            from = %current,
            target = %target,
            interval_ms = self.shared.policy.interval.as_millis() as u64,
            "Transition requested, watching for convergence"
        );

        Ok(TransitionHandle {
            watch_id,
            resource_id: resource_id.to_string(),
            target,
            outcome_rx,
        })
    }

    /// Send a toggle request without watching for convergence.
    ///
    /// Live watches for the resource are left alone.
    pub async fn request_only(&self, resource_id: &str) -> Result<(), RequestError> {
        if resource_id.trim().is_empty() {
            return Err(RequestError::InvalidResource);
        }

        self.shared
            .call(self.shared.provider.request_transition(resource_id))
            .await
            .map_err(|source| {
                warn!(resource_id, error = %source, "Transition request failed");
                RequestError::Provider {
                    resource: resource_id.to_string(),
                    source,
                }
            })
    }

    /// Read the current state of a resource once.
    pub async fn poll_once(&self, resource_id: &str) -> Result<PowerState, PollError> {
        self.shared.poll_once(resource_id).await
    }

    /// Cancel the watch behind `handle`.
    ///
    /// Idempotent: finished, replaced or unknown handles are ignored.
    /// Returns true if a live watch was cancelled.
    pub async fn cancel(&self, handle: &TransitionHandle) -> bool {
        let mut registry = self.shared.registry.write().await;
        let owned = registry
            .get(&handle.resource_id)
            .is_some_and(|entry| entry.watch_id == handle.watch_id);
        if !owned {
            return false;
        }

        if let Some(entry) = registry.remove(&handle.resource_id) {
            entry.signal_cancel();
        }
        debug!(
            resource_id = %handle.resource_id,
            watch_id = handle.watch_id,
            "Watch cancelled"
        );
        true
    }

    /// Cancel whatever watch is live for `resource_id`.
    pub async fn cancel_resource(&self, resource_id: &str) -> bool {
        let removed = self.shared.registry.write().await.remove(resource_id);
        match removed {
            Some(entry) => {
                entry.signal_cancel();
                debug!(resource_id, watch_id = entry.watch_id, "Watch cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every live watch and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<WatchEntry> = {
            let mut registry = self.shared.registry.write().await;
            registry.drain().map(|(_, entry)| entry).collect()
        };

        if !entries.is_empty() {
            info!(count = entries.len(), "Cancelling live watches");
        }

        for entry in &entries {
            entry.signal_cancel();
        }
        for entry in entries {
            if let Err(e) = entry.task.await {
                warn!(watch_id = entry.watch_id, error = %e, "Watch task ended abnormally");
            }
        }
    }

    /// Current phase of the watch for `resource_id`.
    ///
    /// Live watches report `Polling`; resources without one are `Idle`.
    pub async fn phase(&self, resource_id: &str) -> WatchPhase {
        if self.shared.registry.read().await.contains_key(resource_id) {
            WatchPhase::Polling
        } else {
            WatchPhase::Idle
        }
    }

    /// Target of the live watch for `resource_id`.
    pub async fn target_of(&self, resource_id: &str) -> Option<PowerState> {
        self.shared
            .registry
            .read()
            .await
            .get(resource_id)
            .map(|entry| entry.target)
    }

    /// Number of live watches.
    pub async fn live_watches(&self) -> usize {
        self.shared.registry.read().await.len()
    }
}

/// Wait until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive one watch to a terminal outcome.
async fn run_watch<P: StatusProvider>(
    shared: Arc<Shared<P>>,
    resource_id: String,
    watch_id: WatchId,
    target: PowerState,
    mut cancel_rx: watch::Receiver<bool>,
    outcome_tx: watch::Sender<Option<Outcome>>,
) {
    let policy = &shared.policy;
    let started = Instant::now();

    // A bound too large to represent is no bound.
    let deadline = policy.max_duration.and_then(|d| started.checked_add(d));

    // First poll one period after the request, like a plain interval timer.
    // The interval is capped by `PollPolicy::validate`.
    let mut ticker = tokio::time::interval_at(started + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts: u32 = 0;
    let mut consecutive_failures: u32 = 0;

    let outcome = loop {
        if *cancel_rx.borrow() {
            break Outcome::Cancelled;
        }

        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break Outcome::Cancelled,
            _ = sleep_until_opt(deadline) => {
                break Outcome::TimedOut { attempts, elapsed: started.elapsed() };
            }
            _ = ticker.tick() => {}
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = cancel_rx.changed() => break Outcome::Cancelled,
            result = shared.poll_once(&resource_id) => result,
        };

        // A result that lands after cancellation is discarded.
        if *cancel_rx.borrow() {
            break Outcome::Cancelled;
        }

        // Space the next poll a full period after this one completed.
        ticker.reset();

        match result {
            Ok(state) => {
                consecutive_failures = 0;
                debug!(resource_id = %resource_id, watch_id, attempt = attempts, state = %state, "Observed state");
                shared.emit(WatchEvent::Observed {
                    resource_id: resource_id.clone(),
                    watch_id,
                    attempt: attempts,
                    state,
                });

                if state == target {
                    break Outcome::Converged(state);
                }
            }
            Err(error) => {
                consecutive_failures += 1;
                warn!(
                    resource_id = %resource_id,
                    watch_id,
                    attempt = attempts,
                    consecutive_failures,
                    error = %error.source,
                    "Status poll failed"
                );
                shared.emit(WatchEvent::PollFailed {
                    resource_id: resource_id.clone(),
                    watch_id,
                    attempt: attempts,
                    consecutive_failures,
                    error: error.clone(),
                });

                if consecutive_failures >= policy.max_consecutive_failures {
                    break Outcome::Failed(error);
                }
            }
        }

        if policy.is_exhausted(attempts, started.elapsed()) {
            break Outcome::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            };
        }
    };

    let outcome = shared.settle(&resource_id, watch_id, outcome).await;
    match &outcome {
        Outcome::Converged(state) => {
            info!(resource_id = %resource_id, watch_id, attempts, state = %state, "Watch converged")
        }
        Outcome::Cancelled => debug!(resource_id = %resource_id, watch_id, "Watch ended: cancelled"),
        Outcome::Failed(error) => {
            warn!(resource_id = %resource_id, watch_id, error = %error, "Watch failed")
        }
        Outcome::TimedOut { attempts, elapsed } => warn!(
            resource_id = %resource_id,
            watch_id,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Watch timed out"
        ),
    }

    outcome_tx.send_replace(Some(outcome.clone()));
    shared.emit(WatchEvent::Finished {
        resource_id,
        watch_id,
        outcome,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn fast_policy() -> PollPolicy {
        PollPolicy::default().with_interval(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_resource_id_rejected() {
        let poller = Poller::new(MockProvider::new(PowerState::Stopped), fast_policy()).unwrap();
        let err = poller
            .request_transition("  ", PowerState::Stopped)
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::InvalidResource);
        assert_eq!(poller.provider().request_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_tracks_registry() {
        let poller = Poller::new(MockProvider::new(PowerState::Stopped), fast_policy()).unwrap();
        assert_eq!(poller.phase("i-1").await, WatchPhase::Idle);

        let handle = poller
            .request_transition("i-1", PowerState::Stopped)
            .await
            .unwrap();
        assert_eq!(poller.phase("i-1").await, WatchPhase::Polling);
        assert_eq!(poller.target_of("i-1").await, Some(PowerState::Running));

        poller.cancel(&handle).await;
        assert_eq!(handle.outcome().await, Outcome::Cancelled);
        assert_eq!(poller.phase("i-1").await, WatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_policy_rejected() {
        let policy = fast_policy().with_interval(Duration::ZERO);
        assert!(Poller::new(MockProvider::new(PowerState::Stopped), policy).is_err());
    }

    #[test]
    fn test_outcome_phase() {
        assert_eq!(
            Outcome::Converged(PowerState::Running).phase(),
            WatchPhase::Converged
        );
        assert_eq!(Outcome::Cancelled.phase(), WatchPhase::Cancelled);
        assert!(Outcome::TimedOut {
            attempts: 3,
            elapsed: Duration::from_secs(15)
        }
        .phase()
        .is_terminal());
    }
}
