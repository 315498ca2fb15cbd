//! Terminal rendering of snapshots and stats

use plantwatch_loader::{LoadSnapshot, LoaderStats, TierLayout};
use serde_json::Value;
use std::fmt::Write;

const PREVIEW_WIDTH: usize = 60;

pub(crate) fn snapshot_text(snapshot: &LoadSnapshot, layout: &TierLayout) -> String {
    let mut out = String::new();
    let entity = snapshot
        .entity
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let cycle = snapshot
        .last_cycle
        .as_ref()
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    let at = snapshot
        .last_completed_at
        .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S%.3f").to_string());
    let _ = writeln!(out, "{entity}  cycle {cycle}  completed {at}");

    for (tier, fields) in layout.tiers.iter().enumerate() {
        for field in fields {
            let state = if snapshot.is_loading(field.as_str()) {
                "loading".to_string()
            } else {
                snapshot
                    .value(field.as_str())
                    .map_or_else(|| "(no data)".to_string(), preview)
            };
            let _ = writeln!(out, "  [{tier}] {:<10} {state}", field.as_str());
        }
    }
    out
}

pub(crate) fn stats_text(stats: &LoaderStats) -> String {
    format!(
        "cycles: {} started, {} completed, {} cancelled, {} skipped\nfields: {} committed, {} failed",
        stats.cycles_started,
        stats.cycles_completed,
        stats.cycles_cancelled,
        stats.cycles_skipped,
        stats.fields_committed,
        stats.fields_failed,
    )
}

pub(crate) fn layout_text(layout: &TierLayout) -> String {
    layout
        .tiers
        .iter()
        .enumerate()
        .map(|(tier, fields)| {
            let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
            format!("tier {tier}: {}", names.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(value: &Value) -> String {
    let rendered = match value {
        Value::Array(items) => format!("[{} items]", items.len()),
        other => other.to_string(),
    };
    if rendered.chars().count() > PREVIEW_WIDTH {
        let cut: String = rendered.chars().take(PREVIEW_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        rendered
    }
}
