use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

/// Render a UTC instant as a sortable ISO-8601 string with a trailing `Z`.
///
/// This is the storage format for every `ts` field written to the metrics
/// log: a sortable ISO-8601 UTC form with a trailing `Z`.
pub fn format_ts_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current UTC instant, rendered with [`format_ts_utc`].
pub fn now_ts_utc() -> String {
    format_ts_utc(Utc::now())
}

/// Parse a stored `ts` string back into a `DateTime<Utc>`.
///
/// Accepts RFC 3339 with a literal `Z` suffix, which is what
/// [`format_ts_utc`] always produces.
pub fn parse_ts_utc(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render a UTC instant in the configured display time zone.
///
/// `last_updated_timestamp` in the cluster snapshot is stored in UTC but
/// rendered in a separate, configurable display zone: storage is always
/// UTC, and the zone is a config field.
pub fn render_in_zone(ts: DateTime<Utc>, zone: Tz) -> String {
    ts.with_timezone(&zone)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a display-zone name, falling back to UTC for anything unrecognized.
pub fn parse_zone(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::UTC)
}

/// Clamp a percentage-like value into `[0, 100]`, logging when clamping
/// actually changed the value.
pub fn clamp_pct(value: i64, field: &str, context: &str) -> u8 {
    if !(0..=100).contains(&value) {
        tracing::warn!(
            field,
            context,
            value,
            "clamping out-of-range percentage to [0, 100]"
        );
    }
    value.clamp(0, 100) as u8
}
