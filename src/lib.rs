// Vacina Insights - Core Library
// Normalization, aggregation and forecasting of vaccine distribution records,
// shared by the CLI, the HTTP server and the tests.

pub mod error;
pub mod records;
pub mod rules;          // Label and UF normalization rules
pub mod snapshot;       // Versioned rule snapshots with atomic swap
pub mod aggregation;
pub mod forecast;       // Mean/median forecast with fallback chain
pub mod trend;          // Pluggable trend sources
pub mod comparison;     // Historical vs projected, unit-reconciled
pub mod db;
pub mod providers;      // db → REST → fixture chain
pub mod config;
pub mod api;
pub mod service;
pub mod session;        // Latest-request-wins dashboard state

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use error::{EngineError, ProviderError, Result};
pub use records::{normalize_records, NormalizedRecord, RawRecord, SourceRow};
pub use rules::{MappingRule, Normalizer, RuleSet, UF_CODES, UNLABELED};
pub use snapshot::{SnapshotStore, Versioned};
pub use aggregation::{AggregatedPoint, GroupBy, GroupKey, RecordFilter};
pub use forecast::{ForecastBasis, ForecastEngine, ForecastPoint, ProjectionUnit, TrendProjection};
pub use trend::{LinearTrend, RestTrendSource, TrendRequest, TrendSource};
pub use comparison::{Comparison, ComparisonPoint, ComparisonReconciler, ComparisonStatus};
pub use db::{ImportStats, ImportedRecord, load_csv, setup_database, insert_records, verify_count};
pub use providers::{FixtureProvider, ProviderChain, RecordProvider, RecordQuery, RestProvider, SqliteProvider};
pub use config::Config;
pub use service::Service;
pub use session::{DashboardSession, DashboardView, LatestOnly, RefreshOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
