//! Recurring refresh behaviour on a paused clock

use plantwatch_loader::prelude::*;
use plantwatch_test_utils::{kpis_payload, plant, plant_scenario, Journal, ScriptedFetcher};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::sleep;

fn single_tier(cycle_ms: u64, journal: &Journal) -> TierPlan {
    TierPlan::builder()
        .tier([(
            "kpis",
            ScriptedFetcher::ok("kpis", cycle_ms, kpis_payload(), journal),
        )])
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn first_cycle_runs_immediately() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(5, &journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_secs(3600))
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    assert_eq!(loader.stats().cycles_completed, 1);
    assert_eq!(loader.snapshot().value("kpis"), Some(&kpis_payload()));
    assert_eq!(handle.entity(), &plant("plant-1"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeats_every_interval() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(5, &journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(50))
        .unwrap();
    // ticks at 0, 50, 100, 150
    sleep(Duration::from_millis(175)).await;

    let stats = loader.stats();
    assert_eq!(stats.cycles_started, 4);
    assert_eq!(stats.cycles_completed, 4);
    assert_eq!(stats.cycles_skipped, 0);
    assert_eq!(journal.calls("kpis"), 4);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overlong_cycle_skips_next_tick() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(120, &journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(100))
        .unwrap();

    // t=0 starts (ends 120), t=100 skipped, t=200 starts (ends 320)
    sleep(Duration::from_millis(250)).await;
    let stats = loader.stats();
    assert_eq!(stats.cycles_started, 2);
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.cycles_skipped, 1);

    // t=300 skipped, second cycle finished normally
    sleep(Duration::from_millis(100)).await;
    let stats = loader.stats();
    assert_eq!(stats.cycles_started, 2);
    assert_eq!(stats.cycles_completed, 2);
    assert_eq!(stats.cycles_skipped, 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_timer() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(5, &journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(50))
        .unwrap();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(loader.stats().cycles_started, 2);

    handle.cancel();
    handle.cancel();
    sleep(Duration::from_millis(500)).await;

    assert!(handle.is_cancelled());
    assert_eq!(loader.stats().cycles_started, 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_stops_timer() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(5, &journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(50))
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    drop(handle);
    sleep(Duration::from_millis(500)).await;

    assert_eq!(loader.stats().cycles_started, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_cycle_freezes_state() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(plant_scenario(&journal));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_secs(300))
        .unwrap();
    sleep(Duration::from_millis(12)).await;
    handle.cancel();
    let at_cancel = loader.snapshot();

    sleep(Duration::from_millis(200)).await;

    let snapshot = loader.snapshot();
    assert_eq!(snapshot, at_cancel);
    assert!(snapshot.get("kpis").is_some());
    assert!(snapshot.get("poc").is_none());
    assert!(snapshot.get("heatmap").is_none());
    assert_eq!(loader.stats().cycles_cancelled, 1);
    assert!(!loader.is_loading());
}

fn shared_pair(registry: &CycleRegistry, journal: &Journal) -> (PhasedLoader, PhasedLoader) {
    let slow = PhasedLoader::builder(single_tier(120, journal))
        .registry(registry.clone())
        .build();
    let quick = PhasedLoader::builder(single_tier(5, journal))
        .registry(registry.clone())
        .build();
    (slow, quick)
}

fn spawn_load(loader: &PhasedLoader, id: &str) -> tokio::task::JoinHandle<CycleOutcome> {
    let loader = loader.clone();
    let entity = plant(id);
    tokio::spawn(async move { loader.start_load(&entity, &CancellationToken::new()).await })
}

#[tokio::test(start_paused = true)]
async fn first_load_waits_for_registry_holder() {
    let registry = CycleRegistry::new();
    let journal = Journal::new();
    let (other, loader) = shared_pair(&registry, &journal);

    let busy = spawn_load(&other, "plant-1");
    tokio::task::yield_now().await;
    assert!(registry.is_active(&plant("plant-1")));

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(100))
        .unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(loader.stats().cycles_started, 0);
    assert_eq!(loader.stats().cycles_skipped, 0);

    // holder releases at 120, first load runs then, next tick at 220
    sleep(Duration::from_millis(150)).await;
    assert!(busy.await.unwrap().is_completed());
    let stats = loader.stats();
    assert_eq!(stats.cycles_completed, 2);
    assert_eq!(stats.cycles_skipped, 0);
    assert_eq!(loader.snapshot().value("kpis"), Some(&kpis_payload()));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tick_skipped_while_registry_holds_entity() {
    let registry = CycleRegistry::new();
    let journal = Journal::new();
    let (other, loader) = shared_pair(&registry, &journal);

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(100))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(loader.stats().cycles_completed, 1);

    // other loader holds the entity from 50 to 170
    let busy = spawn_load(&other, "plant-1");

    // t=100 finds the entity claimed, t=200 runs
    sleep(Duration::from_millis(200)).await;

    assert!(busy.await.unwrap().is_completed());
    let stats = loader.stats();
    assert_eq!(stats.cycles_skipped, 1);
    assert_eq!(stats.cycles_completed, 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switching_plants_loads_new_plant_without_waiting_an_interval() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(plant_scenario(&journal));

    let first = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_secs(300))
        .unwrap();
    sleep(Duration::from_millis(12)).await;
    first.shutdown().await;

    // plant-1's tier 1 drains at 15ms; plant-2 loads right after
    let second = loader
        .schedule_recurring(&plant("plant-2"), Duration::from_secs(300))
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.entity, Some(plant("plant-2")));
    assert!(snapshot.last_cycle.is_some());
    assert!(snapshot.get("heatmap").is_some());

    let stats = loader.stats();
    assert_eq!(stats.cycles_started, 2);
    assert_eq!(stats.cycles_cancelled, 1);
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.cycles_skipped, 0);

    let plant_two_calls = journal
        .entries()
        .iter()
        .filter(|e| e.entity == plant("plant-2") && e.field.as_str() == "alerts")
        .count();
    assert_eq!(plant_two_calls, 1);
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restart_after_cancel_starts_with_flags_lowered() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(plant_scenario(&journal));

    let first = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_secs(300))
        .unwrap();
    sleep(Duration::from_millis(12)).await;
    first.cancel();

    let second = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_secs(300))
        .unwrap();
    // new cycle started at 15ms, tier 0 runs until 25ms
    sleep(Duration::from_millis(6)).await;

    let snapshot = loader.snapshot();
    assert!(snapshot.is_loading("alerts"));
    assert!(snapshot.is_loading("kpis"));
    assert!(!snapshot.is_loading("weather"));
    assert!(!snapshot.is_loading("poc"));
    assert!(!snapshot.is_loading("heatmap"));
    assert_eq!(snapshot.value("kpis"), Some(&kpis_payload()));
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_recurring_updates() {
    let journal = Journal::new();
    let loader = PhasedLoader::new(single_tier(5, &journal));
    let mut updates = loader.subscribe();

    let handle = loader
        .schedule_recurring(&plant("plant-1"), Duration::from_millis(50))
        .unwrap();

    let completed = tokio::time::timeout(Duration::from_millis(40), async {
        loop {
            if updates.changed().await.is_err() {
                return None;
            }
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.last_cycle.is_some() {
                return Some(snapshot);
            }
        }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(completed.value("kpis"), Some(&kpis_payload()));
    assert!(!completed.any_loading());
    handle.shutdown().await;
}
