//! Frame identifier generation and parsing
//!
//! Canonical form is `YYYYMMDD_HHMMSS_ffffff` in UTC: exactly 22
//! characters with underscores at positions 8 and 15, so lexicographic
//! order equals chronological order. Rebuild tools additionally accept a
//! legacy 13-digit-millisecond prefix form.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};

static SUB_FRAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// New frame id for the given capture timestamp.
pub fn frame_id_for(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// New frame id for the current instant.
pub fn generate_frame_id() -> String {
    frame_id_for(Utc::now())
}

/// New sub-frame id: app-prefixed, time-ordered within an app stream.
pub fn generate_sub_frame_id(app_name: &str, timestamp: DateTime<Utc>) -> String {
    let safe_app: String = app_name
        .chars()
        .map(|c| if c == ' ' || c == '/' || c == ':' { '_' } else { c })
        .take(20)
        .collect();
    let counter = SUB_FRAME_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xffff;
    format!(
        "subframe_{}_{}_{:04x}",
        safe_app,
        timestamp.format("%Y%m%d_%H%M%S_%6f"),
        counter
    )
}

/// Parse a frame-id-shaped file stem into its timestamp.
///
/// Accepts the canonical 22-character form and the legacy form whose
/// first 13 digits are a millisecond epoch.
pub fn parse_frame_id(stem: &str) -> Option<DateTime<Utc>> {
    if let Some(ts) = parse_canonical(stem) {
        return Some(ts);
    }
    parse_legacy_millis(stem)
}

fn parse_canonical(stem: &str) -> Option<DateTime<Utc>> {
    if stem.len() != 22 {
        return None;
    }
    let bytes = stem.as_bytes();
    if bytes[8] != b'_' || bytes[15] != b'_' {
        return None;
    }
    if !stem
        .chars()
        .enumerate()
        .all(|(i, c)| i == 8 || i == 15 || c.is_ascii_digit())
    {
        return None;
    }

    let year: i32 = stem[0..4].parse().ok()?;
    let month: u32 = stem[4..6].parse().ok()?;
    let day: u32 = stem[6..8].parse().ok()?;
    let hour: u32 = stem[9..11].parse().ok()?;
    let minute: u32 = stem[11..13].parse().ok()?;
    let second: u32 = stem[13..15].parse().ok()?;
    let micros: u32 = stem[16..22].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = chrono::NaiveTime::from_hms_micro_opt(hour, minute, second, micros)?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn parse_legacy_millis(stem: &str) -> Option<DateTime<Utc>> {
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() != 13 {
        return None;
    }
    let millis: i64 = digits.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn canonical_id_has_expected_shape() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 1, 13, 4, 38).unwrap()
            + chrono::Duration::microseconds(750_984);
        let id = frame_id_for(ts);
        assert_eq!(id, "20260701_130438_750984");
        assert_eq!(id.len(), 22);
        assert_eq!(id.as_bytes()[8], b'_');
        assert_eq!(id.as_bytes()[15], b'_');
    }

    #[test]
    fn lexicographic_order_equals_time_order() {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let timestamps = [
            base,
            base + chrono::Duration::microseconds(1),
            base + chrono::Duration::seconds(1),
            base + chrono::Duration::hours(2),
            base + chrono::Duration::days(40),
        ];

        let ids: Vec<String> = timestamps.iter().map(|ts| frame_id_for(*ts)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn canonical_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 1, 13, 4, 38).unwrap()
            + chrono::Duration::microseconds(123_456);
        let parsed = parse_frame_id(&frame_id_for(ts)).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn legacy_millis_prefix_is_accepted() {
        // 2021-01-01T00:00:00Z in milliseconds
        let parsed = parse_frame_id("1609459200000_shot").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn malformed_stems_are_rejected() {
        assert!(parse_frame_id("not_a_frame").is_none());
        assert!(parse_frame_id("20260701-130438-750984").is_none());
        assert!(parse_frame_id("2026070_1130438_75098").is_none());
        assert!(parse_frame_id("123").is_none());
    }

    #[test]
    fn sub_frame_ids_are_unique_within_a_tick() {
        let ts = Utc::now().with_nanosecond(0).unwrap();
        let a = generate_sub_frame_id("firefox", ts);
        let b = generate_sub_frame_id("firefox", ts);
        assert_ne!(a, b);
        assert!(a.starts_with("subframe_firefox_"));
    }
}
