//! Time-of-day energy decay used when no heart rate is available
//!
//! Consecutive validated ratings give an hourly rate of change. Rates are
//! grouped by the local hour of each pair's midpoint:
//!
//! | bucket    | hours   |
//! |-----------|---------|
//! | morning   | 06-11   |
//! | afternoon | 12-17   |
//! | evening   | 18-21   |
//! | night     | 22-05   |
//!
//! Decay is stored with the sign flipped: a positive value means energy is
//! lost over time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::sorted_by_time;
use crate::config::DecayConfig;
use crate::models::{DecayRateProfile, ValidatedEnergySample};
use crate::stats;
use crate::timeline;

/// Coarse part of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => DayPeriod::Morning,
            12..=17 => DayPeriod::Afternoon,
            18..=21 => DayPeriod::Evening,
            _ => DayPeriod::Night,
        }
    }
}

/// Decay estimate for now and the horizon, both on the 0-1 scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPrediction {
    pub now: f64,
    pub future: f64,
}

/// Learns and applies the decay profile
#[derive(Debug, Clone, Default)]
pub struct DecayEstimator {
    config: DecayConfig,
    utc_offset_minutes: i32,
}

impl DecayEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecayConfig, utc_offset_minutes: i32) -> Self {
        Self {
            config,
            utc_offset_minutes,
        }
    }

    /// Profile with no personal data
    pub fn default_profile(&self) -> DecayRateProfile {
        DecayRateProfile {
            average_hourly_decay: self.config.default_hourly_decay,
            ..DecayRateProfile::default()
        }
    }

    /// Learn a profile from validated ratings (0-100 scale)
    pub fn compute_profile(&self, samples: &[ValidatedEnergySample]) -> DecayRateProfile {
        if samples.len() < 2 {
            return self.default_profile();
        }

        let sorted = sorted_by_time(samples);
        let changes: Vec<(DayPeriod, f64)> = sorted
            .windows(2)
            .filter_map(|pair| {
                let elapsed = pair[1].timestamp - pair[0].timestamp;
                let hours = timeline::hours(elapsed);
                if hours < self.config.min_gap_hours || hours > self.config.max_gap_hours {
                    return None;
                }
                let rate = (pair[1].percentage - pair[0].percentage) / hours;
                let midpoint = pair[0].timestamp + elapsed / 2;
                let hour = timeline::local_hour(midpoint, self.utc_offset_minutes);
                Some((DayPeriod::from_hour(hour), rate))
            })
            .collect();

        if changes.len() < self.config.min_pairs {
            debug!(
                pairs = changes.len(),
                "Not enough rating pairs for a decay profile"
            );
            return self.default_profile();
        }

        let bucket = |period: DayPeriod| -> Option<f64> {
            let rates: Vec<f64> = changes
                .iter()
                .filter(|(p, _)| *p == period)
                .map(|(_, r)| *r)
                .collect();
            (rates.len() >= self.config.min_bucket_pairs).then(|| -stats::median(&rates))
        };

        let all: Vec<f64> = changes.iter().map(|(_, r)| *r).collect();
        let average = (-stats::median(&all))
            .clamp(self.config.min_hourly_decay, self.config.max_hourly_decay);

        DecayRateProfile {
            average_hourly_decay: average,
            morning: bucket(DayPeriod::Morning),
            afternoon: bucket(DayPeriod::Afternoon),
            evening: bucket(DayPeriod::Evening),
            night: bucket(DayPeriod::Night),
            data_points_used: changes.len(),
        }
    }

    /// Decay in percentage points per hour at a local hour
    pub fn decay_for_hour(profile: &DecayRateProfile, hour: u32) -> f64 {
        let bucket = match DayPeriod::from_hour(hour) {
            DayPeriod::Morning => profile.morning,
            DayPeriod::Afternoon => profile.afternoon,
            DayPeriod::Evening => profile.evening,
            DayPeriod::Night => profile.night,
        };
        bucket.unwrap_or(profile.average_hourly_decay)
    }

    /// Decay the last known energy (0-1) to `now`, then over `horizon`
    pub fn predict(
        &self,
        last_energy: f64,
        last_time: DateTime<Utc>,
        now: DateTime<Utc>,
        horizon: Duration,
        profile: &DecayRateProfile,
    ) -> DecayPrediction {
        let elapsed_hours = timeline::hours(now - last_time).max(0.0);
        let current_hour = timeline::local_hour(now, self.utc_offset_minutes);
        let current_rate = Self::decay_for_hour(profile, current_hour) / 100.0;
        let current = (last_energy - current_rate * elapsed_hours).clamp(0.0, 1.0);

        let future_hour = timeline::local_hour(now + horizon, self.utc_offset_minutes);
        let future_rate = Self::decay_for_hour(profile, future_hour) / 100.0;
        let future = (current - future_rate * timeline::hours(horizon)).clamp(0.0, 1.0);

        DecayPrediction {
            now: current,
            future,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, h, 0, 0).unwrap()
    }

    fn rating(t: DateTime<Utc>, pct: f64) -> ValidatedEnergySample {
        ValidatedEnergySample::new(t, pct)
    }

    #[test]
    fn test_too_few_samples_gives_default() {
        let estimator = DecayEstimator::new();
        let profile = estimator.compute_profile(&[rating(at(1, 8), 50.0)]);
        assert_eq!(profile.average_hourly_decay, 3.0);
        assert_eq!(profile.data_points_used, 0);
        assert!(profile.morning.is_none());
    }

    #[test]
    fn test_too_few_pairs_gives_default() {
        let estimator = DecayEstimator::new();
        let samples: Vec<_> = (0..4).map(|i| rating(at(1, 8 + i), 80.0 - 5.0 * i as f64)).collect();
        assert_eq!(estimator.compute_profile(&samples), estimator.default_profile());
    }

    #[test]
    fn test_gap_filter() {
        let estimator = DecayEstimator::new();
        // 13 h gaps are all rejected
        let samples: Vec<_> = (0..8)
            .map(|i| rating(at(1, 0) + Duration::hours(13 * i), 50.0))
            .collect();
        assert_eq!(estimator.compute_profile(&samples).data_points_used, 0);
    }

    #[test]
    fn test_morning_bucket_and_average() {
        let estimator = DecayEstimator::new();
        // Hourly ratings 07:00-12:00 losing 4 points per hour, midpoints in the morning
        let samples: Vec<_> = (0..6).map(|i| rating(at(1, 7 + i), 90.0 - 4.0 * i as f64)).collect();

        let profile = estimator.compute_profile(&samples);

        assert_eq!(profile.data_points_used, 5);
        assert_eq!(profile.morning, Some(4.0));
        assert_eq!(profile.afternoon, None);
        assert_eq!(profile.average_hourly_decay, 4.0);
        assert_eq!(DecayEstimator::decay_for_hour(&profile, 9), 4.0);
        assert_eq!(DecayEstimator::decay_for_hour(&profile, 20), 4.0);
    }

    #[test]
    fn test_average_is_clamped() {
        let estimator = DecayEstimator::new();
        let samples: Vec<_> = (0..6).map(|i| rating(at(1, 7 + i), 100.0 - 19.0 * i as f64)).collect();
        assert_eq!(estimator.compute_profile(&samples).average_hourly_decay, 15.0);
    }

    #[test]
    fn test_predict_with_default_profile() {
        let estimator = DecayEstimator::new();
        let profile = estimator.default_profile();

        let prediction = estimator.predict(0.8, at(1, 10), at(1, 12), Duration::hours(2), &profile);

        assert!((prediction.now - 0.74).abs() < 1e-9);
        assert!((prediction.future - 0.68).abs() < 1e-9);
    }

    #[test]
    fn test_predict_clamps_to_unit_range() {
        let estimator = DecayEstimator::new();
        let profile = estimator.default_profile();
        let prediction = estimator.predict(0.05, at(1, 0), at(2, 0), Duration::hours(2), &profile);
        assert_eq!(prediction.now, 0.0);
        assert_eq!(prediction.future, 0.0);
    }

    #[test]
    fn test_negative_decay_recovers() {
        let estimator = DecayEstimator::new();
        let profile = DecayRateProfile {
            average_hourly_decay: -5.0,
            ..DecayRateProfile::default()
        };
        let prediction = estimator.predict(0.5, at(1, 2), at(1, 4), Duration::hours(2), &profile);
        assert!((prediction.now - 0.6).abs() < 1e-9);
        assert!((prediction.future - 0.7).abs() < 1e-9);
    }
}
