use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::LocationSnapshot;
use crate::types::{CheckIn, GeoFenceStatus, SafetyLevel, SafetyStatus};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Check-in age thresholds, in hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Age after which a check-in is considered overdue.
    pub warning_hours: f64,
    /// Age after which a missing check-in is critical.
    pub critical_hours: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_hours: 8.0,
            critical_hours: 24.0,
        }
    }
}

/// Inputs to a single resolution.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub latest: Option<&'a LocationSnapshot>,
    pub last_check_in: Option<&'a CheckIn>,
    pub fence: Option<&'a GeoFenceStatus>,
    pub now: DateTime<Utc>,
}

impl StatusInputs<'_> {
    /// Hours elapsed since the last check-in, clamped to zero for future timestamps.
    pub fn hours_since_check_in(&self) -> Option<f64> {
        self.last_check_in.map(|check_in| {
            let elapsed = (self.now - check_in.timestamp).num_milliseconds() as f64 / 1000.0;
            (elapsed / SECONDS_PER_HOUR).max(0.0)
        })
    }
}

/// Status rules in precedence order. The first rule that matches decides the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRule {
    NoData,
    OutsideSafeZone,
    CheckInRecency,
    LocationOnly,
}

impl StatusRule {
    pub const ORDERED: [StatusRule; 4] = [
        StatusRule::NoData,
        StatusRule::OutsideSafeZone,
        StatusRule::CheckInRecency,
        StatusRule::LocationOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::OutsideSafeZone => "outside_safe_zone",
            Self::CheckInRecency => "check_in_recency",
            Self::LocationOnly => "location_only",
        }
    }

    /// Evaluates this rule alone. `None` means the rule does not apply.
    pub fn evaluate(
        self,
        inputs: &StatusInputs<'_>,
        thresholds: &Thresholds,
    ) -> Option<(SafetyLevel, String)> {
        match self {
            Self::NoData => (inputs.latest.is_none() && inputs.last_check_in.is_none())
                .then(|| (SafetyLevel::Unknown, "No location data available".to_string())),
            Self::OutsideSafeZone => {
                let fence = inputs.fence.filter(|fence| !fence.is_inside)?;
                let message = match &fence.nearest_fence {
                    Some(nearest) => format!(
                        "Outside of defined safe zone ({:.0} m from {})",
                        nearest.distance_meters, nearest.name
                    ),
                    None => "Outside of defined safe zone".to_string(),
                };
                Some((SafetyLevel::Critical, message))
            }
            Self::CheckInRecency => {
                let hours = inputs.hours_since_check_in()?;
                let outcome = if hours > thresholds.critical_hours {
                    (
                        SafetyLevel::Critical,
                        format!(
                            "No check-in for over {} hours",
                            thresholds.critical_hours
                        ),
                    )
                } else if hours > thresholds.warning_hours {
                    (
                        SafetyLevel::Warning,
                        format!("No check-in for over {} hours", thresholds.warning_hours),
                    )
                } else {
                    (SafetyLevel::Safe, "Checked in recently".to_string())
                };
                Some(outcome)
            }
            Self::LocationOnly => inputs.latest.map(|_| {
                (
                    SafetyLevel::Safe,
                    "Location confirmed; no check-in on record".to_string(),
                )
            }),
        }
    }
}

/// Derives the safety status from the latest reading, the last check-in and fence membership.
///
/// `hours_since_check_in` is reported whenever a check-in exists, whichever rule fired.
pub fn resolve(
    latest: Option<&LocationSnapshot>,
    last_check_in: Option<&CheckIn>,
    fence: Option<&GeoFenceStatus>,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> SafetyStatus {
    let inputs = StatusInputs {
        latest,
        last_check_in,
        fence,
        now,
    };

    let (rule, (level, message)) = StatusRule::ORDERED
        .into_iter()
        .find_map(|rule| rule.evaluate(&inputs, thresholds).map(|hit| (rule, hit)))
        .unwrap_or((
            StatusRule::NoData,
            (SafetyLevel::Unknown, "No location data available".to_string()),
        ));

    SafetyStatus {
        level,
        message,
        hours_since_check_in: inputs.hours_since_check_in(),
        rule,
    }
}
