//! Tier plans
//!
//! A [`TierPlan`] is the static, ordered list of [`FetchPhase`]s for one
//! entity type. Tiers run strictly in index order; the requests inside a
//! tier run concurrently.
//!
//! Plans are built either programmatically with [`TierPlan::builder`] or
//! from a declarative [`TierLayout`] plus a [`FetcherRegistry`].

use crate::error::PlanError;
use crate::fetcher::{FetcherRegistry, FieldFetcher};
use crate::types::FieldName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One named sub-request of a tier
#[derive(Clone)]
pub struct FieldRequest {
    field: FieldName,
    fetcher: Arc<dyn FieldFetcher>,
}

impl FieldRequest {
    /// Create request
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<FieldName>, fetcher: Arc<dyn FieldFetcher>) -> Self {
        Self {
            field: field.into(),
            fetcher,
        }
    }

    /// Field this request populates
    #[inline]
    #[must_use]
    pub fn field(&self) -> &FieldName {
        &self.field
    }

    /// Fetcher producing the value
    #[inline]
    #[must_use]
    pub fn fetcher(&self) -> &Arc<dyn FieldFetcher> {
        &self.fetcher
    }
}

impl std::fmt::Debug for FieldRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FieldRequest").field(&self.field).finish()
    }
}

/// An ordered tier of same-priority requests
#[derive(Debug, Clone)]
pub struct FetchPhase {
    index: usize,
    requests: Vec<FieldRequest>,
}

impl FetchPhase {
    /// Tier index (0 = highest priority)
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Requests in this tier
    #[inline]
    #[must_use]
    pub fn requests(&self) -> &[FieldRequest] {
        &self.requests
    }

    /// Fields populated by this tier
    pub fn fields(&self) -> impl Iterator<Item = &FieldName> {
        self.requests.iter().map(FieldRequest::field)
    }

    /// Number of requests
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Always false for a validated plan
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Validated, immutable sequence of tiers
#[derive(Debug, Clone)]
pub struct TierPlan {
    phases: Vec<FetchPhase>,
}

impl TierPlan {
    /// Start building a plan
    #[inline]
    #[must_use]
    pub fn builder() -> TierPlanBuilder {
        TierPlanBuilder::default()
    }

    /// Build plan from a declarative layout
    ///
    /// # Errors
    /// - Any layout validation error
    /// - `PlanError::UnknownField` if a field has no registered fetcher
    pub fn from_layout(layout: &TierLayout, registry: &FetcherRegistry) -> Result<Self, PlanError> {
        layout.validate()?;

        let mut builder = Self::builder();
        for (tier, fields) in layout.tiers.iter().enumerate() {
            let mut requests = Vec::with_capacity(fields.len());
            for field in fields {
                let fetcher = registry.get(field.as_str()).ok_or_else(|| PlanError::UnknownField {
                    field: field.to_string(),
                    tier,
                })?;
                requests.push((field.clone(), fetcher));
            }
            builder = builder.tier(requests);
        }
        builder.build()
    }

    /// Tiers in execution order
    #[inline]
    #[must_use]
    pub fn phases(&self) -> &[FetchPhase] {
        &self.phases
    }

    /// Number of tiers
    #[inline]
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.phases.len()
    }

    /// All fields, in tier order
    pub fn fields(&self) -> impl Iterator<Item = &FieldName> {
        self.phases.iter().flat_map(FetchPhase::fields)
    }

    /// Tier a field belongs to
    #[must_use]
    pub fn tier_of(&self, field: &str) -> Option<usize> {
        self.phases
            .iter()
            .find(|phase| phase.fields().any(|f| f.as_str() == field))
            .map(FetchPhase::index)
    }

    /// Declarative layout of this plan
    #[must_use]
    pub fn layout(&self) -> TierLayout {
        TierLayout {
            tiers: self
                .phases
                .iter()
                .map(|phase| phase.fields().cloned().collect())
                .collect(),
        }
    }
}

/// Builder for [`TierPlan`]
#[derive(Debug, Default)]
pub struct TierPlanBuilder {
    tiers: Vec<Vec<FieldRequest>>,
}

impl TierPlanBuilder {
    /// Append a tier, lower priority than every tier added before it
    #[must_use]
    pub fn tier<I, N>(mut self, requests: I) -> Self
    where
        I: IntoIterator<Item = (N, Arc<dyn FieldFetcher>)>,
        N: Into<FieldName>,
    {
        self.tiers.push(
            requests
                .into_iter()
                .map(|(name, fetcher)| FieldRequest::new(name, fetcher))
                .collect(),
        );
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// - `PlanError::EmptyPlan` if no tier was added
    /// - `PlanError::EmptyTier` if a tier has no requests
    /// - `PlanError::DuplicateField` if a field appears twice
    pub fn build(self) -> Result<TierPlan, PlanError> {
        validate_tiers(
            self.tiers
                .iter()
                .map(|tier| tier.iter().map(FieldRequest::field)),
        )?;

        Ok(TierPlan {
            phases: self
                .tiers
                .into_iter()
                .enumerate()
                .map(|(index, requests)| FetchPhase { index, requests })
                .collect(),
        })
    }
}

/// Declarative tier layout: field names per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierLayout {
    /// Field names, highest priority tier first
    pub tiers: Vec<Vec<FieldName>>,
}

impl TierLayout {
    /// Create layout from nested name lists
    #[must_use]
    pub fn new<T, F>(tiers: T) -> Self
    where
        T: IntoIterator<Item = F>,
        F: IntoIterator,
        F::Item: Into<FieldName>,
    {
        Self {
            tiers: tiers
                .into_iter()
                .map(|tier| tier.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// Solar-plant monitor layout
    ///
    /// Alerts and headline KPIs first, then weather and point-of-connection
    /// readings, then the high-volume heatmap.
    #[must_use]
    pub fn plant_monitor() -> Self {
        Self::new([
            vec!["alerts", "kpis"],
            vec!["weather", "poc"],
            vec!["heatmap"],
        ])
    }

    /// Check structural validity
    ///
    /// # Errors
    /// Same rules as [`TierPlanBuilder::build`]
    pub fn validate(&self) -> Result<(), PlanError> {
        validate_tiers(self.tiers.iter().map(|tier| tier.iter()))
    }

    /// Total number of fields
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }
}

impl Default for TierLayout {
    fn default() -> Self {
        Self::plant_monitor()
    }
}

fn validate_tiers<'a, T, F>(tiers: T) -> Result<(), PlanError>
where
    T: IntoIterator<Item = F>,
    F: IntoIterator<Item = &'a FieldName>,
{
    let mut seen = HashSet::new();
    let mut tier_count = 0;

    for (tier, fields) in tiers.into_iter().enumerate() {
        tier_count += 1;
        let mut field_count = 0;
        for field in fields {
            field_count += 1;
            if !seen.insert(field.as_str()) {
                return Err(PlanError::DuplicateField {
                    field: field.to_string(),
                });
            }
        }
        if field_count == 0 {
            return Err(PlanError::EmptyTier { tier });
        }
    }

    if tier_count == 0 {
        return Err(PlanError::EmptyPlan);
    }
    Ok(())
}
