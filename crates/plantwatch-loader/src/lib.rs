//! plantwatch Loader
//!
//! Phased, cancellable data loading for plant dashboards.
//!
//! # Overview
//!
//! A dashboard view shows many fields for one plant: alerts, headline KPIs,
//! weather, point-of-connection readings, heatmaps. The loader fetches them
//! in priority tiers so the most important fields render first:
//!
//! ```text
//! Tier 0: alerts, kpis     ──┐ concurrent, awaited together
//! Tier 1: weather, poc     ──┤ starts only after tier 0 settled
//! Tier 2: heatmap          ──┘ starts only after tier 1 settled
//! ```
//!
//! - **[`PhasedLoader::start_load`]**: one cycle; no-op while another is in
//!   flight; never fails
//! - **[`PhasedLoader::schedule_recurring`]**: immediate cycle plus one per
//!   interval, returned as an RAII [`RefreshHandle`]
//! - **[`CancellationToken`]**: checked before each tier and each commit
//! - **[`CycleRegistry`]**: optional per-entity exclusivity across loaders
//!
//! # Example
//!
//! ```rust,ignore
//! use plantwatch_loader::prelude::*;
//!
//! let plan = TierPlan::builder()
//!     .tier([("alerts", alerts_fetcher), ("kpis", kpi_fetcher)])
//!     .tier([("weather", weather_fetcher), ("poc", poc_fetcher)])
//!     .tier([("heatmap", heatmap_fetcher)])
//!     .build()?;
//!
//! let loader = PhasedLoader::new(plan);
//! let plant = EntityId::new("plant-1")?;
//! let refresh = loader.schedule_recurring(&plant, DEFAULT_REFRESH_INTERVAL)?;
//!
//! let mut updates = loader.subscribe();
//! while updates.changed().await.is_ok() {
//!     render(&updates.borrow());
//! }
//! # drop(refresh);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod plan;
pub mod refresh;
pub mod registry;
pub mod types;

// Re-exports for convenience
pub use config::{LoaderConfig, DEFAULT_REFRESH_INTERVAL};
pub use error::{ConfigError, EntityIdError, FetchError, LoaderError, PlanError};
pub use fetcher::{fetcher_fn, FetcherRegistry, FieldFetcher, FnFetcher};
pub use loader::{
    CycleOutcome, LoaderBuilder, LoaderEvent, LoaderStats, PhasedLoader, DEFAULT_EVENT_CAPACITY,
};
pub use plan::{FetchPhase, FieldRequest, TierLayout, TierPlan, TierPlanBuilder};
pub use refresh::RefreshHandle;
pub use registry::{CycleClaim, CycleRegistry};
pub use tokio_util::sync::CancellationToken;
pub use types::{CycleId, EntityId, FieldName, FieldValue, LoadSnapshot};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the loader
    pub use crate::{
        fetcher_fn, CancellationToken, CycleOutcome, CycleRegistry, EntityId, FetchError,
        FetcherRegistry, FieldFetcher, LoadSnapshot, LoaderConfig, LoaderEvent, PhasedLoader,
        RefreshHandle, TierLayout, TierPlan, DEFAULT_REFRESH_INTERVAL,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
