//! Stream manifest
//!
//! The manifest is the only artifact exchanged between broadcaster and
//! watchers. It is published as JSON:
//!
//! ```json
//! {"parts":["Qm..."],"cursor":2,"sample":10000000000,"ended":false,
//!  "started":"2024-05-01T10:00:00Z","updated":"2024-05-01T10:00:20Z"}
//! ```
//!
//! `sample` is the segment duration in nanoseconds.

use crate::store::ContentId;
use crate::utils::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Fixed filename of the manifest inside a working directory
pub const MANIFEST_FILE: &str = "sync.json";

/// Published description of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Segment ids in the order their uploads completed
    #[serde(rename = "parts", default)]
    pub segments: Vec<ContentId>,

    /// Number of segments captured so far
    #[serde(default)]
    pub cursor: u64,

    /// Target duration of every segment
    #[serde(rename = "sample", with = "duration_nanos")]
    pub segment_duration: Duration,

    /// Set by the final publication
    #[serde(default)]
    pub ended: bool,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Create an empty manifest for segments of `segment_duration`
    pub fn new(segment_duration: Duration) -> Self {
        Self {
            segments: Vec::new(),
            cursor: 0,
            segment_duration,
            ended: false,
            started: None,
            updated: None,
        }
    }

    pub fn append_segment(&mut self, id: ContentId) {
        self.segments.push(id);
    }

    /// Number of uploaded segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn mark_started(&mut self) {
        self.started = Some(Utc::now());
    }

    /// Stamp `updated` with the current time
    pub fn touch(&mut self) {
        self.updated = Some(Utc::now());
    }

    pub fn mark_ended(&mut self) {
        self.ended = true;
    }

    /// Encode every persisted field as JSON
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a manifest; fails with `AppError::Format` on malformed input.
    ///
    /// No invariants are checked: a watcher mirrors whatever was published.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod duration_nanos {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(duration.as_nanos())
            .map_err(|_| S::Error::custom(format!("duration {:?} does not fit in u64 nanoseconds", duration)))?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

/// Read a timestamp leniently.
///
/// RFC 3339 and Go's `time.Time.String()` layout
/// (`2024-05-01 10:00:00.1 +0000 UTC m=+0.01`) are understood; `null`, the
/// empty string and anything else read as unset.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = raw.parse::<DateTime<Utc>>() {
        return Some(parsed);
    }

    // Go layout: date, time, numeric offset, zone abbreviation, monotonic clock
    let wall = raw.split(" m=").next().unwrap_or(raw);
    let fields: Vec<&str> = wall.split_whitespace().take(3).collect();
    match DateTime::parse_from_str(&fields.join(" "), "%Y-%m-%d %H:%M:%S%.f %z") {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!("Ignoring unreadable timestamp {:?}: {}", raw, e);
            None
        }
    }
}
