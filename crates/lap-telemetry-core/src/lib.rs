use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TelemetryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl TelemetryError {
    /// Response code contract for the request/response boundary layer.
    #[must_use]
    pub fn response_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::StorageFailure(_) => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LapId(pub Ulid);

impl Display for LapId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl LapId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

/// A named, time-boxed telemetry session aggregating parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lap {
    pub lap_id: LapId,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// A single timestamped key/value reading belonging to exactly one lap.
///
/// `param_seq` is assigned by the store and breaks ordering ties between
/// readings that share an `added_at` instant. `lap_id` is a lookup-only
/// back-reference; deletion always flows from the lap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parameter {
    pub param_seq: i64,
    pub lap_id: LapId,
    pub key: String,
    pub value: String,
    pub added_at: OffsetDateTime,
}

/// One key/value pair as supplied by an ingestion channel, before the store
/// assigns its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Reading {
    pub key: String,
    pub value: String,
}

impl Reading {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Flattens a readings map into an ordered batch (key-ascending).
    #[must_use]
    pub fn from_map(map: &BTreeMap<String, String>) -> Vec<Self> {
        map.iter()
            .map(|(key, value)| Self::new(key.clone(), value.clone()))
            .collect()
    }
}

/// Validates a lap name for creation and lookup-or-create operations.
///
/// # Errors
/// Returns [`TelemetryError::InvalidArgument`] when the name is empty or
/// blank.
pub fn validate_lap_name(name: &str) -> Result<(), TelemetryError> {
    if name.trim().is_empty() {
        return Err(TelemetryError::InvalidArgument(
            "lap name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Typed shape of the lap-creation request; the boundary layer maps the
/// wire field `lap-name` onto it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CreateLapRequest {
    #[serde(rename = "lap-name")]
    pub lap_name: String,
}

/// Typed shape of the request/response registration payload. The readings
/// map is populated by the boundary layer; metadata fields such as the lap
/// name never appear inside it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct RegisterRequest {
    #[serde(rename = "lap-name", default)]
    pub lap_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// One inbound streaming message. Fields stay optional because the channel
/// has no response path; the gateway drops and logs malformed submissions.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySubmission {
    pub lap_name: Option<String>,
    pub parameters: Option<BTreeMap<String, String>>,
}

/// Boundary representation of a stored parameter (`added_at` as RFC 3339
/// UTC text).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ParameterValue {
    pub key: String,
    pub value: String,
    pub added_at: String,
}

impl ParameterValue {
    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] when the timestamp cannot
    /// be rendered as RFC 3339.
    pub fn from_parameter(parameter: &Parameter) -> Result<Self, TelemetryError> {
        Ok(Self {
            key: parameter.key.clone(),
            value: parameter.value.clone(),
            added_at: format_rfc3339(parameter.added_at)?,
        })
    }
}

/// Parses an RFC 3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`TelemetryError::InvalidArgument`] when parsing fails or the
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, TelemetryError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            TelemetryError::InvalidArgument(format!("invalid RFC3339 timestamp: {err}"))
        })?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(TelemetryError::InvalidArgument(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC 3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`TelemetryError::InvalidArgument`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TelemetryError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            TelemetryError::InvalidArgument(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Converts a timestamp to whole microseconds since the Unix epoch, the
/// persisted representation.
///
/// # Errors
/// Returns [`TelemetryError::InvalidArgument`] when the instant does not fit
/// the persisted range.
pub fn timestamp_micros(value: OffsetDateTime) -> Result<i64, TelemetryError> {
    i64::try_from(value.unix_timestamp_nanos() / 1_000).map_err(|_| {
        TelemetryError::InvalidArgument(format!("timestamp out of persisted range: {value}"))
    })
}

/// Restores a timestamp from persisted epoch microseconds.
///
/// # Errors
/// Returns [`TelemetryError::InvalidArgument`] when the raw value is outside
/// the representable range.
pub fn timestamp_from_micros(raw: i64) -> Result<OffsetDateTime, TelemetryError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(raw) * 1_000)
        .map(|value| value.to_offset(UtcOffset::UTC))
        .map_err(|_| TelemetryError::InvalidArgument(format!("invalid stored timestamp: {raw}")))
}
