use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{CheckIn, EventType, GeoFenceStatus, LocationHistory, NearestFence};

const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;

/// Errors raised while validating a raw location payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("location payload must be a JSON object")]
    NotAnObject,
    #[error("invalid {field}: {problem}")]
    InvalidCoordinate {
        field: &'static str,
        problem: CoordinateProblem,
    },
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
    #[error("invalid accuracy: {0}")]
    InvalidAccuracy(String),
    #[error("invalid geo-fence {field}: {value}")]
    InvalidFence { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateProblem {
    #[error("value is missing")]
    Missing,
    #[error("value {0:?} is not a decimal number")]
    NotNumeric(String),
    #[error("value {value} is outside [-{bound}, {bound}]")]
    OutOfRange { value: f64, bound: f64 },
}

/// Single validated GPS reading. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSnapshot {
    timestamp: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    event_type: EventType,
}

impl LocationSnapshot {
    /// Builds a snapshot from already-typed values, enforcing coordinate ranges.
    pub fn new(
        timestamp: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        event_type: EventType,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            timestamp,
            latitude: check_range("latitude", latitude, MAX_LATITUDE)?,
            longitude: check_range("longitude", longitude, MAX_LONGITUDE)?,
            accuracy: None,
            address: None,
            city: None,
            country: None,
            event_type,
        })
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Result<Self, ValidationError> {
        self.accuracy = Some(check_accuracy(accuracy)?);
        Ok(self)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Reported accuracy radius in meters.
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }
}

/// Validates a raw location payload as delivered by the safety API.
///
/// Coordinates may be JSON numbers or decimal strings. Timestamps may be RFC 3339
/// strings or integer epoch milliseconds. A missing `eventType` means a routine ping.
pub fn parse_snapshot(raw: &Value) -> Result<LocationSnapshot, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let timestamp = parse_instant(object.get("timestamp"))?;
    let latitude = coordinate(object, "latitude", MAX_LATITUDE)?;
    let longitude = coordinate(object, "longitude", MAX_LONGITUDE)?;
    let accuracy = match object.get("accuracy") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed =
                decimal(value).ok_or_else(|| ValidationError::InvalidAccuracy(value.to_string()))?;
            Some(check_accuracy(parsed)?)
        }
    };
    let event_type = object
        .get("eventType")
        .or_else(|| object.get("event_type"))
        .and_then(Value::as_str)
        .map(EventType::from_tag)
        .unwrap_or_default();

    Ok(LocationSnapshot {
        timestamp,
        latitude,
        longitude,
        accuracy,
        address: display_string(object, "address"),
        city: display_string(object, "city"),
        country: display_string(object, "country"),
        event_type,
    })
}

/// Validates the `lastCheckIn` block of a status payload.
pub fn parse_check_in(raw: &Value) -> Result<CheckIn, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;
    let timestamp = parse_instant(object.get("timestamp"))?;
    let status = display_string(object, "status");
    Ok(CheckIn { timestamp, status })
}

/// A record dropped during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub error: ValidationError,
}

/// Result of validating a batch of raw readings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub history: LocationHistory,
    pub rejected: Vec<RejectedRecord>,
}

/// Validates every raw reading, skipping invalid ones instead of failing the batch.
pub fn ingest_history(raw: &[Value]) -> IngestReport {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (index, value) in raw.iter().enumerate() {
        match parse_snapshot(value) {
            Ok(snapshot) => accepted.push(snapshot),
            Err(error) => rejected.push(RejectedRecord { index, error }),
        }
    }

    IngestReport {
        history: LocationHistory::from_unordered(accepted),
        rejected,
    }
}

/// A geo-fence block plus the optional parts that were dropped while validating it.
#[derive(Debug, Clone, PartialEq)]
pub struct FenceReport {
    pub status: GeoFenceStatus,
    pub dropped: Vec<ValidationError>,
}

/// Validates the `geoFenceStatus` block.
///
/// Only `isInside` is mandatory. A bad `activeFenceCount` falls back to 0 and a
/// bad `nearestFence` is left out; both are listed in [`FenceReport::dropped`].
pub fn parse_geo_fence(raw: &Value) -> Result<FenceReport, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;
    let is_inside = match object.get("isInside") {
        Some(Value::Bool(flag)) => *flag,
        other => return Err(fence_error("isInside", other)),
    };

    let mut dropped = Vec::new();
    let active_fence_count = match object.get("activeFenceCount") {
        None | Some(Value::Null) => 0,
        Some(value) => match value.as_u64().and_then(|count| u32::try_from(count).ok()) {
            Some(count) => count,
            None => {
                dropped.push(fence_error("activeFenceCount", Some(value)));
                0
            }
        },
    };
    let nearest_fence = match object.get("nearestFence") {
        None | Some(Value::Null) => None,
        Some(value) => match parse_nearest_fence(value) {
            Ok(nearest) => Some(nearest),
            Err(error) => {
                dropped.push(error);
                None
            }
        },
    };

    Ok(FenceReport {
        status: GeoFenceStatus {
            is_inside,
            active_fence_count,
            nearest_fence,
        },
        dropped,
    })
}

fn parse_nearest_fence(raw: &Value) -> Result<NearestFence, ValidationError> {
    let object = raw
        .as_object()
        .ok_or_else(|| fence_error("nearestFence", Some(raw)))?;
    let name = display_string(object, "name")
        .ok_or_else(|| fence_error("nearestFence.name", object.get("name")))?;
    let distance = object
        .get("distance")
        .or_else(|| object.get("distanceMeters"));
    distance
        .and_then(decimal)
        .and_then(|meters| NearestFence::new(name, meters))
        .ok_or_else(|| fence_error("nearestFence.distance", distance))
}

fn fence_error(field: &'static str, value: Option<&Value>) -> ValidationError {
    ValidationError::InvalidFence {
        field,
        value: value.map_or_else(|| "missing".to_string(), Value::to_string),
    }
}

fn parse_instant(value: Option<&Value>) -> Result<DateTime<Utc>, ValidationError> {
    match value {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| ValidationError::MalformedTimestamp(text.clone())),
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| ValidationError::MalformedTimestamp(number.to_string())),
        Some(other) => Err(ValidationError::MalformedTimestamp(other.to_string())),
        None => Err(ValidationError::MalformedTimestamp("missing".to_string())),
    }
}

fn coordinate(
    object: &Map<String, Value>,
    field: &'static str,
    bound: f64,
) -> Result<f64, ValidationError> {
    let value = match object.get(field) {
        None | Some(Value::Null) => {
            return Err(ValidationError::InvalidCoordinate {
                field,
                problem: CoordinateProblem::Missing,
            })
        }
        Some(value) => value,
    };

    let parsed = decimal(value).ok_or_else(|| ValidationError::InvalidCoordinate {
        field,
        problem: CoordinateProblem::NotNumeric(value.to_string()),
    })?;

    check_range(field, parsed, bound)
}

fn check_range(field: &'static str, value: f64, bound: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && (-bound..=bound).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidCoordinate {
            field,
            problem: CoordinateProblem::OutOfRange { value, bound },
        })
    }
}

fn check_accuracy(value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidAccuracy(value.to_string()))
    }
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn display_string(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
