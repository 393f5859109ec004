//! Domain layer for worker safety tracking.
//!
//! Everything in this crate is pure: raw location payloads are validated into
//! [`LocationSnapshot`] values, reduced into [`AggregateStats`] and combined
//! with check-in and geo-fence data into a [`SafetyStatus`].

pub mod aggregator;
pub mod resolver;
pub mod snapshot;
pub mod types;

pub use aggregator::{aggregate, aggregate_within, latest_check_in};
pub use resolver::{resolve, StatusInputs, StatusRule, Thresholds};
pub use snapshot::{
    ingest_history, parse_check_in, parse_geo_fence, parse_snapshot, CoordinateProblem, FenceReport,
    IngestReport, LocationSnapshot, RejectedRecord, ValidationError,
};
pub use types::{
    AggregateStats, CheckIn, EventType, GeoFenceStatus, HistoryWindow, LocationHistory,
    NearestFence, SafetyLevel, SafetyStatus,
};
