//! Core types for the phased loader
//!
//! Defines:
//! - Entity and field identifiers
//! - Load cycle identifiers
//! - Committed field values and the snapshot views read

use crate::error::EntityIdError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of the polled entity (e.g. a plant)
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create entity identifier
    ///
    /// # Errors
    /// - `EntityIdError::Empty` if `id` is empty or whitespace only
    pub fn new(id: impl Into<String>) -> Result<Self, EntityIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EntityIdError::Empty);
        }
        Ok(Self(id))
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one display field (`alerts`, `kpis`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    /// Create field name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for FieldName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique load cycle identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId(pub Ulid);

impl CycleId {
    /// Generate new cycle ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last successfully fetched value of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Payload as returned by the fetcher
    pub value: Value,
    /// When the value was committed
    pub fetched_at: DateTime<Utc>,
}

impl FieldValue {
    /// Wrap a value committed now
    #[inline]
    #[must_use]
    pub fn now(value: Value) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of a loader's session state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// Entity the held data belongs to (`None` before the first cycle)
    pub entity: Option<EntityId>,
    /// Per-field in-flight flags
    pub loading: BTreeMap<FieldName, bool>,
    /// Per-field last committed values
    pub results: BTreeMap<FieldName, FieldValue>,
    /// Last cycle that ran to completion
    pub last_cycle: Option<CycleId>,
    /// When that cycle completed
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl LoadSnapshot {
    /// Empty snapshot with every field present and not loading
    #[must_use]
    pub fn empty<'a>(fields: impl IntoIterator<Item = &'a FieldName>) -> Self {
        Self {
            loading: fields.into_iter().map(|f| (f.clone(), false)).collect(),
            ..Self::default()
        }
    }

    /// Check whether a field's request is in flight
    #[inline]
    #[must_use]
    pub fn is_loading(&self, field: &str) -> bool {
        self.loading.get(field).copied().unwrap_or(false)
    }

    /// Check whether any field is in flight
    #[inline]
    #[must_use]
    pub fn any_loading(&self) -> bool {
        self.loading.values().any(|loading| *loading)
    }

    /// Committed value of a field
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.results.get(field)
    }

    /// Committed payload of a field
    #[inline]
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.results.get(field).map(|v| &v.value)
    }
}
