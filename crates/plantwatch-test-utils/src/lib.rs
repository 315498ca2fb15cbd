//! Testing utilities for plantwatch workspace
//!
//! Shared fetchers, fixtures, and tracing setup.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plantwatch_loader::{EntityId, FetchError, FieldFetcher, FieldName, TierPlan};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What happened to a scripted fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Started,
    Finished,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub field: FieldName,
    pub entity: EntityId,
    pub phase: CallPhase,
    pub at: Instant,
}

/// Ordered record of scripted fetcher activity, shared by all fetchers of
/// one test
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, field: &FieldName, entity: &EntityId, phase: CallPhase) {
        self.entries.lock().push(JournalEntry {
            field: field.clone(),
            entity: entity.clone(),
            phase,
            at: Instant::now(),
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Number of fetches started for a field
    pub fn calls(&self, field: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.field.as_str() == field && e.phase == CallPhase::Started)
            .count()
    }

    pub fn first_start(&self, field: &str) -> Option<Instant> {
        self.find(field, CallPhase::Started).into_iter().min()
    }

    pub fn last_finish(&self, field: &str) -> Option<Instant> {
        self.find(field, CallPhase::Finished).into_iter().max()
    }

    fn find(&self, field: &str, phase: CallPhase) -> Vec<Instant> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.field.as_str() == field && e.phase == phase)
            .map(|e| e.at)
            .collect()
    }
}

/// Fetcher that sleeps for a fixed delay and then returns scripted outcomes
///
/// Outcomes are consumed in order; the last one repeats forever.
#[derive(Debug)]
pub struct ScriptedFetcher {
    field: FieldName,
    delay: Duration,
    outcomes: Mutex<VecDeque<Result<Value, FetchError>>>,
    journal: Journal,
}

impl ScriptedFetcher {
    pub fn sequence(
        field: &str,
        delay_ms: u64,
        outcomes: Vec<Result<Value, FetchError>>,
        journal: &Journal,
    ) -> Arc<dyn FieldFetcher> {
        assert!(!outcomes.is_empty(), "scripted fetcher needs at least one outcome");
        Arc::new(Self {
            field: FieldName::from(field),
            delay: Duration::from_millis(delay_ms),
            outcomes: Mutex::new(outcomes.into()),
            journal: journal.clone(),
        })
    }

    pub fn ok(field: &str, delay_ms: u64, value: Value, journal: &Journal) -> Arc<dyn FieldFetcher> {
        Self::sequence(field, delay_ms, vec![Ok(value)], journal)
    }

    pub fn failing(field: &str, delay_ms: u64, journal: &Journal) -> Arc<dyn FieldFetcher> {
        Self::sequence(
            field,
            delay_ms,
            vec![Err(FetchError::status(503, format!("{field} service unavailable")))],
            journal,
        )
    }

    fn next_outcome(&self) -> Result<Value, FetchError> {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(Ok(Value::Null))
        } else {
            outcomes.front().cloned().unwrap_or(Ok(Value::Null))
        }
    }
}

#[async_trait]
impl FieldFetcher for ScriptedFetcher {
    async fn fetch(&self, entity: &EntityId) -> Result<Value, FetchError> {
        self.journal.record(&self.field, entity, CallPhase::Started);
        tokio::time::sleep(self.delay).await;
        self.journal.record(&self.field, entity, CallPhase::Finished);
        self.next_outcome()
    }
}

pub fn plant(id: &str) -> EntityId {
    EntityId::new(id).unwrap()
}

/// Canonical three-tier plant scenario
///
/// - Tier 0: `alerts`, `kpis` succeed after 10ms
/// - Tier 1: `weather` fails after 5ms, `poc` succeeds after 5ms
/// - Tier 2: `heatmap` succeeds after 50ms
pub fn plant_scenario(journal: &Journal) -> TierPlan {
    TierPlan::builder()
        .tier([
            ("alerts", ScriptedFetcher::ok("alerts", 10, alerts_payload(), journal)),
            ("kpis", ScriptedFetcher::ok("kpis", 10, kpis_payload(), journal)),
        ])
        .tier([
            ("weather", ScriptedFetcher::failing("weather", 5, journal)),
            ("poc", ScriptedFetcher::ok("poc", 5, poc_payload(), journal)),
        ])
        .tier([(
            "heatmap",
            ScriptedFetcher::ok("heatmap", 50, heatmap_payload(), journal),
        )])
        .build()
        .unwrap()
}

pub fn alerts_payload() -> Value {
    json!([
        { "id": "ALR-1042", "severity": "critical", "message": "Inverter INV-07 offline" },
        { "id": "ALR-1043", "severity": "warning", "message": "String S-12 underperforming" }
    ])
}

pub fn kpis_payload() -> Value {
    json!({ "power_kw": 4812.5, "energy_today_kwh": 21430.0, "performance_ratio": 0.83 })
}

pub fn poc_payload() -> Value {
    json!({ "voltage_kv": 33.1, "frequency_hz": 50.02, "export_kw": 4790.0 })
}

pub fn heatmap_payload() -> Value {
    json!({ "rows": 2, "cols": 3, "cells": [0.91, 0.88, 0.12, 0.95, 0.93, 0.90] })
}

/// Install a test-friendly tracing subscriber once per process
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
