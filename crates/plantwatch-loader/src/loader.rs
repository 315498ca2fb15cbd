//! Phased data loader
//!
//! Runs one load cycle for an entity:
//! - tiers strictly in order, requests inside a tier concurrently
//! - per-field loading flags raised before dispatch, lowered when the tier
//!   settles
//! - failed fields keep their previous value
//! - cancellation checked before every tier and before every commit
//! - at most one cycle in flight per loader (and per entity when a
//!   [`CycleRegistry`] is attached)
//!
//! State is published through a `watch` channel ([`PhasedLoader::subscribe`])
//! and progress through a `broadcast` channel ([`PhasedLoader::events`]).

use crate::config::LoaderConfig;
use crate::error::{FetchError, LoaderError};
use crate::fetcher::FetcherRegistry;
use crate::plan::{FetchPhase, TierPlan};
use crate::registry::CycleRegistry;
use crate::types::{CycleId, EntityId, FieldName, FieldValue, LoadSnapshot};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How a call to [`PhasedLoader::start_load`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every tier settled
    Completed {
        /// Cycle identifier
        cycle: CycleId,
        /// Fields whose fetch failed (previous values kept)
        failed: Vec<FieldName>,
    },
    /// Cancellation observed before `tier` ran or before its results were
    /// committed
    Cancelled {
        /// Cycle identifier
        cycle: CycleId,
        /// Tier at which the cycle stopped
        tier: usize,
    },
    /// Another cycle was already in flight; nothing happened
    Skipped,
}

impl CycleOutcome {
    /// Check if cycle ran to completion
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Check if cycle was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if call was a no-op
    #[inline]
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Failed fields of a completed cycle
    #[must_use]
    pub fn failed_fields(&self) -> &[FieldName] {
        match self {
            Self::Completed { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Progress notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoaderEvent {
    /// A cycle began
    CycleStarted { entity: EntityId, cycle: CycleId },
    /// A start request was dropped because a cycle was in flight
    CycleSkipped { entity: EntityId },
    /// Loading flags raised and requests dispatched
    TierStarted { cycle: CycleId, tier: usize },
    /// A field value was committed
    FieldCommitted { cycle: CycleId, field: FieldName },
    /// A field fetch failed
    FieldFailed {
        cycle: CycleId,
        field: FieldName,
        error: String,
    },
    /// All requests of a tier settled and were committed
    TierSettled { cycle: CycleId, tier: usize },
    /// All tiers settled
    CycleCompleted { cycle: CycleId, failed: usize },
    /// Cancellation observed; no further writes
    CycleCancelled { cycle: CycleId, tier: usize },
}

/// Loader statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    /// Cycles that began
    pub cycles_started: u64,
    /// Cycles that ran to completion
    pub cycles_completed: u64,
    /// Cycles stopped by cancellation
    pub cycles_cancelled: u64,
    /// Start requests dropped by the re-entrancy guard
    pub cycles_skipped: u64,
    /// Field values committed
    pub fields_committed: u64,
    /// Field fetches that failed
    pub fields_failed: u64,
}

/// Phased, cancellable, re-entrancy-guarded loader
///
/// Cloning is cheap; clones share the same plan, guard and state.
#[derive(Debug, Clone)]
pub struct PhasedLoader {
    inner: Arc<LoaderInner>,
}

#[derive(Debug)]
struct LoaderInner {
    plan: TierPlan,
    running: AtomicBool,
    idle: Notify,
    registry: Option<CycleRegistry>,
    state: watch::Sender<LoadSnapshot>,
    events: broadcast::Sender<LoaderEvent>,
    stats: Mutex<LoaderStats>,
}

/// Builder for [`PhasedLoader`]
#[derive(Debug)]
pub struct LoaderBuilder {
    plan: TierPlan,
    registry: Option<CycleRegistry>,
    event_capacity: usize,
}

impl LoaderBuilder {
    /// Share a cycle registry with other loaders
    #[inline]
    #[must_use]
    pub fn registry(mut self, registry: CycleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Capacity of the event channel (minimum 1)
    #[inline]
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Build loader
    #[must_use]
    pub fn build(self) -> PhasedLoader {
        let (state, _) = watch::channel(LoadSnapshot::empty(self.plan.fields()));
        let (events, _) = broadcast::channel(self.event_capacity);

        PhasedLoader {
            inner: Arc::new(LoaderInner {
                plan: self.plan,
                running: AtomicBool::new(false),
                idle: Notify::new(),
                registry: self.registry,
                state,
                events,
                stats: Mutex::new(LoaderStats::default()),
            }),
        }
    }
}

/// Re-entrancy guard; clears the running flag on every exit path and wakes
/// anyone waiting for the loader to go idle
struct RunGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool, idle: &'a Notify) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, idle })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

impl PhasedLoader {
    /// Create loader with default settings
    #[inline]
    #[must_use]
    pub fn new(plan: TierPlan) -> Self {
        Self::builder(plan).build()
    }

    /// Start building a loader
    #[inline]
    #[must_use]
    pub fn builder(plan: TierPlan) -> LoaderBuilder {
        LoaderBuilder {
            plan,
            registry: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Create loader from configuration
    ///
    /// # Errors
    /// - `LoaderError::Config` if the configuration is invalid
    /// - `LoaderError::Plan` if the layout names an unregistered field
    pub fn from_config(
        config: &LoaderConfig,
        fetchers: &FetcherRegistry,
    ) -> Result<Self, LoaderError> {
        config.validate()?;
        let plan = TierPlan::from_layout(&config.layout, fetchers)?;
        Ok(Self::builder(plan)
            .event_capacity(config.event_capacity)
            .build())
    }

    /// Tier plan
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &TierPlan {
        &self.inner.plan
    }

    /// Attached cycle registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> Option<&CycleRegistry> {
        self.inner.registry.as_ref()
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> LoadSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state write
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadSnapshot> {
        self.inner.state.subscribe()
    }

    /// Receiver of progress events from now on
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    /// Statistics so far
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        self.inner.stats.lock().clone()
    }

    /// Check if this loader has a cycle in flight
    #[inline]
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Check if a start for `entity` would be dropped right now
    #[must_use]
    pub fn is_busy(&self, entity: &EntityId) -> bool {
        self.is_loading()
            || self
                .inner
                .registry
                .as_ref()
                .is_some_and(|registry| registry.is_active(entity))
    }

    /// Wait until a start for `entity` would no longer be dropped
    ///
    /// Returns immediately when nothing is in flight. A cancelled cycle
    /// still holds the loader until its in-flight requests drain.
    pub async fn wait_until_idle(&self, entity: &EntityId) {
        loop {
            let local = self.inner.idle.notified();
            tokio::pin!(local);
            local.as_mut().enable();

            let mut shared = self
                .inner
                .registry
                .as_ref()
                .map(|registry| Box::pin(registry.released().notified()));
            if let Some(shared) = shared.as_mut() {
                shared.as_mut().enable();
            }

            if !self.is_busy(entity) {
                return;
            }

            match shared {
                Some(shared) => {
                    tokio::select! {
                        () = &mut local => {}
                        () = shared => {}
                    }
                }
                None => local.await,
            }
        }
    }

    /// Drop all held data and loading flags
    ///
    /// For view teardown, after the cycle token has been cancelled.
    pub fn clear(&self) {
        let empty = LoadSnapshot::empty(self.inner.plan.fields());
        self.inner.state.send_replace(empty);
    }

    /// Run one load cycle for `entity`
    ///
    /// A no-op returning [`CycleOutcome::Skipped`] if a cycle is already in
    /// flight. Never fails: fetch errors are logged and leave the field at
    /// its previous value; cancellation stops the cycle without further
    /// writes.
    pub async fn start_load(&self, entity: &EntityId, token: &CancellationToken) -> CycleOutcome {
        let Some(_guard) = RunGuard::acquire(&self.inner.running, &self.inner.idle) else {
            self.note_skipped(entity);
            return CycleOutcome::Skipped;
        };

        let cycle = CycleId::new();
        let _claim = match &self.inner.registry {
            Some(registry) => match registry.try_claim(entity, cycle) {
                Some(claim) => Some(claim),
                None => {
                    self.note_skipped(entity);
                    return CycleOutcome::Skipped;
                }
            },
            None => None,
        };

        let span = info_span!("load_cycle", entity = %entity, cycle_id = %cycle);
        self.run_cycle(entity, cycle, token).instrument(span).await
    }

    async fn run_cycle(
        &self,
        entity: &EntityId,
        cycle: CycleId,
        token: &CancellationToken,
    ) -> CycleOutcome {
        if token.is_cancelled() {
            self.inner.stats.lock().cycles_started += 1;
            return self.cancelled(cycle, 0);
        }

        let started = Instant::now();
        self.begin(entity, cycle);

        let mut failed = Vec::new();
        for phase in self.inner.plan.phases() {
            if token.is_cancelled() {
                return self.cancelled(cycle, phase.index());
            }

            self.set_loading(phase, true);
            self.emit(LoaderEvent::TierStarted {
                cycle,
                tier: phase.index(),
            });
            debug!(tier = phase.index(), fields = phase.len(), "dispatching tier");

            let results = join_all(phase.requests().iter().map(|request| async move {
                let outcome = AssertUnwindSafe(request.fetcher().fetch(entity))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(FetchError::Panicked(panic_message(&*panic))));
                (request.field().clone(), outcome)
            }))
            .await;

            // In-flight requests ran to completion; their results are
            // discarded if the token fired meanwhile.
            if token.is_cancelled() {
                return self.cancelled(cycle, phase.index());
            }

            self.commit(cycle, phase, results, &mut failed);
        }

        self.complete(cycle, failed, started)
    }

    fn begin(&self, entity: &EntityId, cycle: CycleId) {
        let plan = &self.inner.plan;
        self.inner.state.send_modify(|state| {
            if state.entity.as_ref() == Some(entity) {
                // Flags left raised by a cancelled predecessor
                for loading in state.loading.values_mut() {
                    *loading = false;
                }
            } else {
                if state.entity.is_some() {
                    debug!(previous = ?state.entity, "entity changed; dropping held data");
                }
                *state = LoadSnapshot::empty(plan.fields());
                state.entity = Some(entity.clone());
            }
        });

        self.inner.stats.lock().cycles_started += 1;
        self.emit(LoaderEvent::CycleStarted {
            entity: entity.clone(),
            cycle,
        });
    }

    fn set_loading(&self, phase: &FetchPhase, loading: bool) {
        self.inner.state.send_modify(|state| {
            for field in phase.fields() {
                state.loading.insert(field.clone(), loading);
            }
        });
    }

    fn commit(
        &self,
        cycle: CycleId,
        phase: &FetchPhase,
        results: Vec<(FieldName, Result<Value, FetchError>)>,
        failed: &mut Vec<FieldName>,
    ) {
        let mut committed = Vec::new();
        let mut errors = Vec::new();

        self.inner.state.send_modify(|state| {
            for (field, outcome) in results {
                match outcome {
                    Ok(value) => {
                        state.results.insert(field.clone(), FieldValue::now(value));
                        committed.push(field);
                    }
                    Err(err) => {
                        warn!(field = %field, error = %err, "field fetch failed; keeping previous value");
                        errors.push((field, err));
                    }
                }
            }
            for field in phase.fields() {
                state.loading.insert(field.clone(), false);
            }
        });

        {
            let mut stats = self.inner.stats.lock();
            stats.fields_committed += committed.len() as u64;
            stats.fields_failed += errors.len() as u64;
        }

        for field in committed {
            self.emit(LoaderEvent::FieldCommitted { cycle, field });
        }
        for (field, err) in errors {
            metrics::counter!("plantwatch_field_failures_total", "field" => field.to_string())
                .increment(1);
            self.emit(LoaderEvent::FieldFailed {
                cycle,
                field: field.clone(),
                error: err.to_string(),
            });
            failed.push(field);
        }

        debug!(tier = phase.index(), "tier settled");
        self.emit(LoaderEvent::TierSettled {
            cycle,
            tier: phase.index(),
        });
    }

    fn complete(&self, cycle: CycleId, failed: Vec<FieldName>, started: Instant) -> CycleOutcome {
        self.inner.state.send_modify(|state| {
            state.last_cycle = Some(cycle);
            state.last_completed_at = Some(Utc::now());
        });

        self.inner.stats.lock().cycles_completed += 1;
        metrics::counter!("plantwatch_load_cycles_total", "outcome" => "completed").increment(1);
        info!(
            failed = failed.len(),
            elapsed_ms = saturating_millis(started.elapsed()),
            "load cycle completed"
        );
        self.emit(LoaderEvent::CycleCompleted {
            cycle,
            failed: failed.len(),
        });

        CycleOutcome::Completed { cycle, failed }
    }

    fn cancelled(&self, cycle: CycleId, tier: usize) -> CycleOutcome {
        self.inner.stats.lock().cycles_cancelled += 1;
        metrics::counter!("plantwatch_load_cycles_total", "outcome" => "cancelled").increment(1);
        info!(tier, "load cycle cancelled");
        self.emit(LoaderEvent::CycleCancelled { cycle, tier });
        CycleOutcome::Cancelled { cycle, tier }
    }

    pub(crate) fn note_skipped(&self, entity: &EntityId) {
        self.inner.stats.lock().cycles_skipped += 1;
        metrics::counter!("plantwatch_load_cycles_total", "outcome" => "skipped").increment(1);
        debug!(entity = %entity, "load already in progress; skipping");
        self.emit(LoaderEvent::CycleSkipped {
            entity: entity.clone(),
        });
    }

    fn emit(&self, event: LoaderEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn saturating_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{fetcher_fn, FieldFetcher};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn plant(id: &str) -> EntityId {
        EntityId::new(id).unwrap()
    }

    fn ok_after(ms: u64, value: Value) -> Arc<dyn FieldFetcher> {
        fetcher_fn(move |_| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, FetchError>(value)
            }
        })
    }

    fn fail_after(ms: u64) -> Arc<dyn FieldFetcher> {
        fetcher_fn(move |_| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err::<Value, _>(FetchError::transport("connection reset"))
        })
    }

    struct PanickingFetcher;

    #[async_trait]
    impl FieldFetcher for PanickingFetcher {
        async fn fetch(&self, _entity: &EntityId) -> Result<Value, FetchError> {
            panic!("inverter gateway exploded")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_cycle_commits_and_lowers_flags() {
        let plan = TierPlan::builder()
            .tier([("alerts", ok_after(10, json!([]))), ("kpis", ok_after(5, json!({"kw": 812})))])
            .tier([("weather", fail_after(5))])
            .build()
            .unwrap();
        let loader = PhasedLoader::new(plan);

        let outcome = loader
            .start_load(&plant("plant-1"), &CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.failed_fields(), &[FieldName::from("weather")]);

        let snapshot = loader.snapshot();
        assert_eq!(snapshot.value("kpis"), Some(&json!({"kw": 812})));
        assert!(snapshot.get("weather").is_none());
        assert!(!snapshot.any_loading());
        assert!(snapshot.last_cycle.is_some());
        assert!(!loader.is_loading());

        let stats = loader.stats();
        assert_eq!(stats.cycles_started, 1);
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.fields_committed, 2);
        assert_eq!(stats.fields_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_writes_nothing() {
        let plan = TierPlan::builder()
            .tier([("alerts", ok_after(1, json!([])))])
            .build()
            .unwrap();
        let loader = PhasedLoader::new(plan);
        let before = loader.snapshot();

        let token = CancellationToken::new();
        token.cancel();
        let outcome = loader.start_load(&plant("plant-1"), &token).await;

        assert!(matches!(outcome, CycleOutcome::Cancelled { tier: 0, .. }));
        assert_eq!(loader.snapshot(), before);
        let stats = loader.stats();
        assert_eq!(stats.cycles_started, 1);
        assert_eq!(stats.cycles_cancelled, 1);
        assert!(!loader.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetcher_is_a_field_failure() {
        let plan = TierPlan::builder()
            .tier([
                ("alerts", Arc::new(PanickingFetcher) as Arc<dyn FieldFetcher>),
                ("kpis", ok_after(1, json!({"kw": 1}))),
            ])
            .build()
            .unwrap();
        let loader = PhasedLoader::new(plan);
        let mut events = loader.events();

        let outcome = loader
            .start_load(&plant("plant-1"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.failed_fields(), &[FieldName::from("alerts")]);
        assert!(loader.snapshot().get("kpis").is_some());

        let mut saw_panic = false;
        while let Ok(event) = events.try_recv() {
            if let LoaderEvent::FieldFailed { error, .. } = event {
                saw_panic = error.contains("inverter gateway exploded");
            }
        }
        assert!(saw_panic);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_released_after_cycle() {
        let plan = TierPlan::builder()
            .tier([("alerts", ok_after(3, json!([])))])
            .build()
            .unwrap();
        let loader = PhasedLoader::new(plan);
        let token = CancellationToken::new();

        assert!(loader.start_load(&plant("plant-1"), &token).await.is_completed());
        assert!(loader.start_load(&plant("plant-1"), &token).await.is_completed());
        assert_eq!(loader.stats().cycles_skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_to_empty() {
        let plan = TierPlan::builder()
            .tier([("alerts", ok_after(1, json!([1, 2])))])
            .build()
            .unwrap();
        let loader = PhasedLoader::new(plan);
        let _ = loader
            .start_load(&plant("plant-1"), &CancellationToken::new())
            .await;
        assert!(loader.snapshot().entity.is_some());

        loader.clear();

        let snapshot = loader.snapshot();
        assert!(snapshot.entity.is_none());
        assert!(snapshot.results.is_empty());
        assert_eq!(snapshot.loading.len(), 1);
    }

    #[test]
    fn outcome_helpers() {
        let skipped = CycleOutcome::Skipped;
        assert!(skipped.is_skipped());
        assert!(skipped.failed_fields().is_empty());

        let cancelled = CycleOutcome::Cancelled {
            cycle: CycleId::new(),
            tier: 2,
        };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_completed());
    }

    #[test]
    fn events_serialize_tagged() {
        let event = LoaderEvent::TierStarted {
            cycle: CycleId::new(),
            tier: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "tier_started");
        assert_eq!(json["tier"], 1);
    }

    #[test]
    fn millis_saturate() {
        assert_eq!(saturating_millis(std::time::Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(std::time::Duration::MAX), u64::MAX);
    }
}
