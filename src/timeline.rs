//! Time-axis helpers
//!
//! All durations travel as `chrono::Duration`. Conversion to fractional
//! minutes or hours happens only here.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc};

use crate::models::Timestamped;

/// Fractional minutes in a duration
pub fn minutes(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

/// Fractional hours in a duration
pub fn hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}

/// Start of the fixed-width bucket containing `t`, aligned to the Unix epoch
pub fn bucket_start(t: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_ms = width.num_milliseconds();
    if width_ms <= 0 {
        return t;
    }
    let ms = t.timestamp_millis();
    let start = ms.div_euclid(width_ms) * width_ms;
    Utc.timestamp_millis_opt(start).single().unwrap_or(t)
}

fn offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix())
}

/// Hour of day (0..24) at the given UTC offset
pub fn local_hour(t: DateTime<Utc>, utc_offset_minutes: i32) -> u32 {
    t.with_timezone(&offset(utc_offset_minutes)).hour()
}

/// Calendar date label (YYYY-MM-DD) at the given UTC offset
pub fn date_label(t: DateTime<Utc>, utc_offset_minutes: i32) -> String {
    t.with_timezone(&offset(utc_offset_minutes))
        .format("%Y-%m-%d")
        .to_string()
}

/// Nearest item to `target` within `tolerance` in a slice sorted by time.
///
/// Ties resolve to the earlier item.
pub fn nearest_within<T: Timestamped>(
    sorted: &[T],
    target: DateTime<Utc>,
    tolerance: Duration,
) -> Option<&T> {
    if sorted.is_empty() {
        return None;
    }

    let idx = sorted.partition_point(|item| item.timestamp() < target);
    let before = idx.checked_sub(1).map(|i| &sorted[i]);
    let after = sorted.get(idx);

    let best = match (before, after) {
        (Some(b), Some(a)) => {
            if target - b.timestamp() <= a.timestamp() - target {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let distance = if best.timestamp() >= target {
        best.timestamp() - target
    } else {
        target - best.timestamp()
    };

    if distance <= tolerance {
        Some(best)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HeartRateSample;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(minutes(Duration::minutes(15)), 15.0);
        assert_eq!(hours(Duration::minutes(90)), 1.5);
        assert_eq!(minutes(Duration::seconds(30)), 0.5);
    }

    #[test]
    fn test_bucket_start() {
        let width = Duration::minutes(15);
        assert_eq!(bucket_start(at(10, 7), width), at(10, 0));
        assert_eq!(bucket_start(at(10, 15), width), at(10, 15));
        assert_eq!(bucket_start(at(10, 29), width), at(10, 15));
    }

    #[test]
    fn test_local_hour_and_label() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(local_hour(t, 0), 23);
        assert_eq!(local_hour(t, 60), 0);
        assert_eq!(date_label(t, 0), "2024-03-01");
        assert_eq!(date_label(t, 60), "2024-03-02");
    }

    #[test]
    fn test_nearest_within() {
        let samples = vec![
            HeartRateSample::new(at(10, 0), 60.0),
            HeartRateSample::new(at(10, 15), 70.0),
            HeartRateSample::new(at(10, 30), 80.0),
        ];
        let tol = Duration::minutes(5);

        assert_eq!(nearest_within(&samples, at(10, 14), tol).unwrap().bpm, 70.0);
        assert_eq!(nearest_within(&samples, at(10, 31), tol).unwrap().bpm, 80.0);
        assert!(nearest_within(&samples, at(10, 8), tol).is_none());
        assert!(nearest_within(&samples, at(11, 0), tol).is_none());
        assert!(nearest_within::<HeartRateSample>(&[], at(10, 0), tol).is_none());
    }

    #[test]
    fn test_nearest_tie_prefers_earlier() {
        let samples = vec![
            HeartRateSample::new(at(10, 0), 60.0),
            HeartRateSample::new(at(10, 10), 70.0),
        ];
        let found = nearest_within(&samples, at(10, 5), Duration::minutes(5)).unwrap();
        assert_eq!(found.bpm, 60.0);
    }
}
