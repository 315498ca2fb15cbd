//! Shared cycle registry
//!
//! Tracks which entities have a load cycle in flight across several
//! loader instances. Exclusivity is per entity: loaders polling different
//! plants never wait on each other.

use crate::types::{CycleId, EntityId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Process-shareable set of entities with an active cycle
///
/// Cloning is cheap; clones share the same underlying set.
#[derive(Debug, Clone, Default)]
pub struct CycleRegistry {
    active: Arc<DashMap<EntityId, CycleId>>,
    released: Arc<Notify>,
}

impl CycleRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the entity for a cycle
    ///
    /// Returns `None` if another cycle already holds the entity. The claim
    /// is released when the returned guard is dropped.
    #[must_use]
    pub fn try_claim(&self, entity: &EntityId, cycle: CycleId) -> Option<CycleClaim> {
        match self.active.entry(entity.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(cycle);
                Some(CycleClaim {
                    active: Arc::clone(&self.active),
                    released: Arc::clone(&self.released),
                    entity: entity.clone(),
                    cycle,
                })
            }
        }
    }

    /// Check if the entity has a cycle in flight
    #[inline]
    #[must_use]
    pub fn is_active(&self, entity: &EntityId) -> bool {
        self.active.contains_key(entity)
    }

    /// Cycle currently holding the entity
    #[inline]
    #[must_use]
    pub fn active_cycle(&self, entity: &EntityId) -> Option<CycleId> {
        self.active.get(entity).map(|entry| *entry.value())
    }

    /// Signalled whenever a claim is released
    pub(crate) fn released(&self) -> &Notify {
        &self.released
    }

    /// Number of entities with a cycle in flight
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if no cycle is in flight
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// RAII claim on an entity; releases on drop
#[derive(Debug)]
pub struct CycleClaim {
    active: Arc<DashMap<EntityId, CycleId>>,
    released: Arc<Notify>,
    entity: EntityId,
    cycle: CycleId,
}

impl CycleClaim {
    /// Claimed entity
    #[inline]
    #[must_use]
    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Cycle holding the claim
    #[inline]
    #[must_use]
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }
}

impl Drop for CycleClaim {
    fn drop(&mut self) {
        let cycle = self.cycle;
        self.active.remove_if(&self.entity, |_, holder| *holder == cycle);
        self.released.notify_waiters();
    }
}
