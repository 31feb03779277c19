/// Store entity primary keys are 64-bit integers.
pub type EntityId = i64;

/// Wire timestamps are milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Convert a wire timestamp into a UTC datetime, if it is in range.
pub fn to_utc(ts: TimestampMs) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp_millis(ts)
}
