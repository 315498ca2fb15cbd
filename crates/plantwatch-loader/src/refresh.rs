//! Recurring refresh
//!
//! [`PhasedLoader::schedule_recurring`] starts one cycle immediately and
//! another on every timer tick. The immediate cycle waits for a cycle still
//! draining (typically the cancelled load of the previous plant); a timer
//! tick that finds a cycle in flight is skipped entirely. The returned [`RefreshHandle`] owns the timer: cancel
//! it or drop it and both the timer and the current cycle stop.

use crate::error::LoaderError;
use crate::loader::{saturating_millis, PhasedLoader};
use crate::types::EntityId;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Handle to a recurring refresh
///
/// Dropping the handle cancels the refresh.
#[derive(Debug)]
pub struct RefreshHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    entity: EntityId,
    interval: Duration,
}

impl RefreshHandle {
    /// Stop the timer and cancel the cycle in flight
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(entity = %self.entity, "cancelling recurring refresh");
        }
        self.token.cancel();
    }

    /// Check if the refresh was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Entity being refreshed
    #[inline]
    #[must_use]
    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Refresh interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cancel and wait for the timer task to exit
    ///
    /// Cycles already spawned finish their in-flight requests on their
    /// own and commit nothing.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl PhasedLoader {
    /// Load `entity` now and then every `interval`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `LoaderError::ZeroInterval` if `interval` is zero
    pub fn schedule_recurring(
        &self,
        entity: &EntityId,
        interval: Duration,
    ) -> Result<RefreshHandle, LoaderError> {
        if interval.is_zero() {
            return Err(LoaderError::ZeroInterval);
        }

        let token = CancellationToken::new();
        let span = info_span!(
            "refresh",
            entity = %entity,
            interval_ms = saturating_millis(interval)
        );
        let task = tokio::spawn(
            refresh_loop(self.clone(), entity.clone(), interval, token.clone()).instrument(span),
        );

        Ok(RefreshHandle {
            token,
            task: Some(task),
            entity: entity.clone(),
            interval,
        })
    }
}

async fn refresh_loop(
    loader: PhasedLoader,
    entity: EntityId,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::select! {
        biased;
        () = token.cancelled() => {
            debug!("refresh stopped before first load");
            return;
        }
        () = loader.wait_until_idle(&entity) => {}
    }
    spawn_cycle(&loader, &entity, &token);
    // Period counts from the first load, not from scheduling
    ticker.reset();

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if loader.is_busy(&entity) {
            debug!("previous cycle still running; skipping tick");
            loader.note_skipped(&entity);
            continue;
        }

        spawn_cycle(&loader, &entity, &token);
    }

    debug!("refresh stopped");
}

/// Each cycle gets a child token so cancelling the refresh also cancels the
/// cycle in flight.
fn spawn_cycle(loader: &PhasedLoader, entity: &EntityId, token: &CancellationToken) {
    let cycle_token = token.child_token();
    let loader = loader.clone();
    let entity = entity.clone();
    tokio::spawn(
        async move {
            let _ = loader.start_load(&entity, &cycle_token).await;
        }
        .in_current_span(),
    );
}
