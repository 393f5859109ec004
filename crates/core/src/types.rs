use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::resolver::StatusRule;
use crate::snapshot::LocationSnapshot;

/// Tag attached to a location reading by the ingestion side.
///
/// Unknown tags are kept verbatim so they survive a round trip to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    CheckIn,
    Routine,
    Alert,
    GeofenceViolation,
    Other(String),
}

impl EventType {
    /// Maps the wire tag onto a known variant, case-insensitively.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "checkin" | "check_in" | "check-in" => Self::CheckIn,
            "routine" | "" => Self::Routine,
            "alert" => Self::Alert,
            "geofence_violation" | "geofence_exit" | "fence_violation" => Self::GeofenceViolation,
            _ => Self::Other(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckIn => "checkin",
            Self::Routine => "routine",
            Self::Alert => "alert",
            Self::GeofenceViolation => "geofence_violation",
            Self::Other(tag) => tag,
        }
    }

    /// Returns `true` when the upstream tagging marks the reading as a fence violation.
    pub fn is_fence_violation(&self) -> bool {
        matches!(self, Self::GeofenceViolation)
    }

    pub fn is_check_in(&self) -> bool {
        matches!(self, Self::CheckIn)
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Routine
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Location readings ordered newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LocationHistory {
    snapshots: Vec<LocationSnapshot>,
}

impl LocationHistory {
    /// Builds a history from readings in any order.
    ///
    /// Ties on the timestamp are broken by latitude, longitude and accuracy so
    /// that every permutation of the same input yields the same sequence.
    pub fn from_unordered(mut snapshots: Vec<LocationSnapshot>) -> Self {
        snapshots.sort_by(newest_first);
        Self { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Newest reading, if any.
    pub fn latest(&self) -> Option<&LocationSnapshot> {
        self.snapshots.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationSnapshot> {
        self.snapshots.iter()
    }

    pub fn as_slice(&self) -> &[LocationSnapshot] {
        &self.snapshots
    }

    /// Drops every reading older than `cutoff`.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) {
        self.snapshots
            .retain(|snapshot| snapshot.timestamp() >= cutoff);
    }
}

fn newest_first(a: &LocationSnapshot, b: &LocationSnapshot) -> Ordering {
    b.timestamp()
        .cmp(&a.timestamp())
        .then_with(|| a.latitude().total_cmp(&b.latitude()))
        .then_with(|| a.longitude().total_cmp(&b.longitude()))
        .then_with(|| match (a.accuracy(), b.accuracy()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Bounded history window, e.g. the last 24 hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWindow {
    pub label: String,
    pub duration: Duration,
}

impl HistoryWindow {
    pub fn hours(hours: u32) -> Self {
        Self {
            label: format!("{hours}h"),
            duration: Duration::hours(i64::from(hours)),
        }
    }

    pub fn days(days: u32) -> Self {
        Self {
            label: format!("{days}d"),
            duration: Duration::days(i64::from(days)),
        }
    }
}

/// Geo-fence membership as computed by the safety backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFenceStatus {
    pub is_inside: bool,
    pub active_fence_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest_fence: Option<NearestFence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestFence {
    pub name: String,
    #[serde(alias = "distance")]
    pub distance_meters: f64,
}

impl NearestFence {
    /// Returns `None` when the distance is negative or not finite.
    pub fn new(name: impl Into<String>, distance_meters: f64) -> Option<Self> {
        if !distance_meters.is_finite() || distance_meters < 0.0 {
            return None;
        }
        Some(Self {
            name: name.into(),
            distance_meters,
        })
    }
}

/// Explicit worker-initiated safety confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Severity of a derived safety status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Unknown,
    Safe,
    Warning,
    Critical,
}

impl SafetyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Derived, ephemeral safety status. Recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyStatus {
    pub level: SafetyLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_since_check_in: Option<f64>,
    pub rule: StatusRule,
}

/// Summary statistics over a location history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_updates: usize,
    /// `None` when no reading in the window reported an accuracy.
    pub avg_accuracy: Option<f64>,
    pub active_violations: usize,
    pub period: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_are_case_insensitive() {
        assert_eq!(EventType::from_tag("CheckIn"), EventType::CheckIn);
        assert_eq!(EventType::from_tag("check-in"), EventType::CheckIn);
        assert_eq!(
            EventType::from_tag("GEOFENCE_EXIT"),
            EventType::GeofenceViolation
        );
        assert_eq!(
            EventType::from_tag("sos_button"),
            EventType::Other("sos_button".to_string())
        );
    }

    #[test]
    fn window_labels() {
        assert_eq!(HistoryWindow::hours(24).label, "24h");
        assert_eq!(HistoryWindow::days(7).label, "7d");
        assert_eq!(HistoryWindow::days(7).duration, Duration::days(7));
    }

    #[test]
    fn geofence_status_uses_camel_case() {
        let status: GeoFenceStatus = serde_json::from_value(serde_json::json!({
            "isInside": false,
            "activeFenceCount": 2,
            "nearestFence": { "name": "Depot", "distanceMeters": 140.5 }
        }))
        .expect("geofence status");

        assert!(!status.is_inside);
        assert_eq!(status.active_fence_count, 2);
        assert_eq!(status.nearest_fence.expect("nearest").name, "Depot");
    }
}
