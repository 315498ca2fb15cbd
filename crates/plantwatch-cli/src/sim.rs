//! Seeded simulated plant data source
//!
//! Every field gets its own RNG derived from the run seed, so a run with the
//! same seed and layout produces the same payloads, latencies and failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use plantwatch_loader::{EntityId, FetchError, FetcherRegistry, FieldFetcher, FieldName};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Knobs for the simulated source
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SimulationSettings {
    pub(crate) seed: u64,
    /// Probability in `[0, 1]` that a fetch fails
    pub(crate) failure_rate: f64,
    pub(crate) min_latency_ms: u64,
    pub(crate) max_latency_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            failure_rate: 0.1,
            min_latency_ms: 20,
            max_latency_ms: 400,
        }
    }
}

struct SimulatedFetcher {
    field: FieldName,
    rng: Mutex<StdRng>,
    failure_rate: f64,
    latency_ms: (u64, u64),
}

#[async_trait]
impl FieldFetcher for SimulatedFetcher {
    async fn fetch(&self, entity: &EntityId) -> Result<Value, FetchError> {
        let (latency, fails, payload) = {
            let mut rng = self.rng.lock();
            let latency = rng.random_range(self.latency_ms.0..=self.latency_ms.1);
            let fails = rng.random_bool(self.failure_rate);
            let payload = payload_for(self.field.as_str(), entity, &mut rng);
            (latency, fails, payload)
        };

        tokio::time::sleep(Duration::from_millis(latency)).await;

        if fails {
            Err(FetchError::status(
                503,
                format!("{} backend unavailable for {entity}", self.field),
            ))
        } else {
            Ok(payload)
        }
    }
}

/// Build a registry with one simulated fetcher per field
pub(crate) fn plant_source<'a>(
    fields: impl IntoIterator<Item = &'a FieldName>,
    settings: &SimulationSettings,
) -> FetcherRegistry {
    let (min, max) = (
        settings.min_latency_ms.min(settings.max_latency_ms),
        settings.max_latency_ms.max(settings.min_latency_ms),
    );

    let mut registry = FetcherRegistry::new();
    for (index, field) in fields.into_iter().enumerate() {
        let fetcher = SimulatedFetcher {
            field: field.clone(),
            rng: Mutex::new(StdRng::seed_from_u64(
                settings.seed.wrapping_add(index as u64),
            )),
            failure_rate: settings.failure_rate.clamp(0.0, 1.0),
            latency_ms: (min, max),
        };
        registry.register(field.clone(), Arc::new(fetcher));
    }
    registry
}

fn payload_for(field: &str, entity: &EntityId, rng: &mut StdRng) -> Value {
    match field {
        "alerts" => {
            let count = rng.random_range(0..=3);
            let alerts: Vec<Value> = (0..count)
                .map(|n| {
                    let severity = if rng.random_bool(0.3) { "critical" } else { "warning" };
                    json!({
                        "id": format!("ALR-{}", 1000 + rng.random_range(0..9000)),
                        "severity": severity,
                        "message": format!("{entity} inverter INV-{:02} deviation", n + 1),
                    })
                })
                .collect();
            Value::Array(alerts)
        }
        "kpis" => {
            let power_kw = rng.random_range(3000.0..5200.0_f64);
            json!({
                "power_kw": round2(power_kw),
                "energy_today_kwh": round2(power_kw * rng.random_range(3.0..6.0_f64)),
                "performance_ratio": round2(rng.random_range(0.70..0.92_f64)),
            })
        }
        "weather" => json!({
            "irradiance_w_m2": round2(rng.random_range(150.0..1050.0_f64)),
            "ambient_c": round2(rng.random_range(8.0..38.0_f64)),
            "module_c": round2(rng.random_range(15.0..65.0_f64)),
        }),
        "poc" => json!({
            "voltage_kv": round2(rng.random_range(32.5..33.5_f64)),
            "frequency_hz": round2(rng.random_range(49.9..50.1_f64)),
            "export_kw": round2(rng.random_range(2900.0..5100.0_f64)),
        }),
        "heatmap" => {
            let (rows, cols) = (4, 6);
            let cells: Vec<f64> = (0..rows * cols)
                .map(|_| round2(rng.random_range(0.0..1.0_f64)))
                .collect();
            json!({ "rows": rows, "cols": cols, "cells": cells })
        }
        _ => json!({ "value": round2(rng.random_range(0.0..100.0_f64)) }),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
