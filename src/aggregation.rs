//! Fixed-width bucketing of raw heart-rate samples

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::models::HeartRateSample;
use crate::timeline;

/// Mean heart rate per epoch-aligned bucket of `width`.
///
/// Input order does not matter. Each non-empty bucket `[start, start + width)`
/// yields one sample stamped with its start; the result is sorted. A
/// non-positive width yields nothing.
pub fn aggregate_heart_rate(samples: &[HeartRateSample], width: Duration) -> Vec<HeartRateSample> {
    if width <= Duration::zero() {
        return Vec::new();
    }

    let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        let key = timeline::bucket_start(sample.timestamp, width);
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += sample.bpm;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(timestamp, (sum, count))| HeartRateSample::new(timestamp, sum / count as f64))
        .collect()
}

/// Sort samples by timestamp, stable for equal instants
pub fn sorted_by_time<T: crate::models::Timestamped + Clone>(samples: &[T]) -> Vec<T> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_heart_rate(&[], Duration::minutes(15)).is_empty());
    }

    #[test]
    fn test_bucket_means() {
        let samples = vec![
            HeartRateSample::new(at(10, 16, 0), 80.0),
            HeartRateSample::new(at(10, 1, 0), 60.0),
            HeartRateSample::new(at(10, 14, 59), 70.0),
            HeartRateSample::new(at(10, 29, 0), 90.0),
        ];

        let result = aggregate_heart_rate(&samples, Duration::minutes(15));

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].timestamp, at(10, 0, 0));
        assert_eq!(result[0].bpm, 65.0);
        assert_eq!(result[1].timestamp, at(10, 15, 0));
        assert_eq!(result[1].bpm, 85.0);
    }

    #[test]
    fn test_boundary_belongs_to_next_bucket() {
        let samples = vec![
            HeartRateSample::new(at(10, 0, 0), 50.0),
            HeartRateSample::new(at(10, 15, 0), 100.0),
        ];
        let result = aggregate_heart_rate(&samples, Duration::minutes(15));
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].timestamp, at(10, 15, 0));
        assert_eq!(result[1].bpm, 100.0);
    }

    #[test]
    fn test_empty_buckets_are_skipped() {
        let samples = vec![
            HeartRateSample::new(at(10, 0, 0), 50.0),
            HeartRateSample::new(at(12, 0, 0), 100.0),
        ];
        let result = aggregate_heart_rate(&samples, Duration::minutes(15));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_non_positive_width() {
        let samples = vec![HeartRateSample::new(at(10, 0, 0), 50.0)];
        assert!(aggregate_heart_rate(&samples, Duration::zero()).is_empty());
    }

    proptest! {
        #[test]
        fn test_aggregation_properties(
            offsets in prop::collection::vec(0i64..86_400, 1..200),
            bpm in 40.0f64..180.0
        ) {
            let base = at(0, 0, 0);
            let samples: Vec<HeartRateSample> = offsets
                .iter()
                .map(|s| HeartRateSample::new(base + Duration::seconds(*s), bpm))
                .collect();

            let result = aggregate_heart_rate(&samples, Duration::minutes(15));

            // Never more buckets than samples, strictly increasing, constant input keeps its value
            prop_assert!(result.len() <= samples.len());
            prop_assert!(result.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            for bucket in &result {
                prop_assert!((bucket.bpm - bpm).abs() < 1e-9);
            }
        }
    }
}
