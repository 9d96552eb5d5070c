//! Heart Rate Variability approximation
//!
//! There are no beat-to-beat intervals in the input, so RMSSD is
//! approximated from successive heart-rate differences inside a short
//! sliding window. The estimate only feeds a coarse three-level drain
//! multiplier, which tolerates the crude signal.
//!
//! # Drain modulation
//!
//! | current / baseline | state      | multiplier |
//! |--------------------|------------|------------|
//! | < 0.7              | Suppressed | 1.5        |
//! | 0.7 ..= 1.3        | Balanced   | 1.0        |
//! | > 1.3              | Elevated   | 0.5        |
//! | no reading         | NoReading  | 1.0        |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregation::sorted_by_time;
use crate::config::HrvConfig;
use crate::models::{HeartRateSample, HrvSample};
use crate::stats;
use crate::timeline;

/// HRV state relative to the personal baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HrvBalance {
    /// Well below baseline, drain amplified
    Suppressed,
    /// Near baseline
    Balanced,
    /// Well above baseline, drain damped
    Elevated,
    /// No estimate close enough in time
    NoReading,
}

impl fmt::Display for HrvBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HrvBalance::Suppressed => write!(f, "Suppressed"),
            HrvBalance::Balanced => write!(f, "Balanced"),
            HrvBalance::Elevated => write!(f, "Elevated"),
            HrvBalance::NoReading => write!(f, "No Reading"),
        }
    }
}

/// An HRV series together with its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvProfile {
    /// Sorted by timestamp
    pub series: Vec<HrvSample>,
    pub baseline: f64,
}

impl HrvProfile {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Sliding-window RMSSD estimator
#[derive(Debug, Clone, Default)]
pub struct HrvEstimator {
    config: HrvConfig,
}

impl HrvEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HrvConfig) -> Self {
        Self { config }
    }

    /// Approximate RMSSD for each sample from the samples in `(t - window, t]`.
    ///
    /// Windows with too few samples are skipped, as are implausible values.
    pub fn estimate(&self, samples: &[HeartRateSample]) -> Vec<HrvSample> {
        if samples.len() < self.config.min_total_samples {
            return Vec::new();
        }

        let sorted = sorted_by_time(samples);
        let window = self.config.window();
        let min_in_window = self.config.min_window_samples.max(2);

        let mut series = Vec::new();
        for sample in &sorted {
            let end = sample.timestamp;
            let lo = sorted.partition_point(|s| s.timestamp <= end - window);
            let hi = sorted.partition_point(|s| s.timestamp <= end);
            let in_window = &sorted[lo..hi];

            if in_window.len() < min_in_window {
                continue;
            }

            let squared: f64 = in_window
                .windows(2)
                .map(|w| (w[1].bpm - w[0].bpm).powi(2))
                .sum();
            let rmssd = (squared / (in_window.len() - 1) as f64).sqrt();

            if rmssd >= 0.0 && rmssd < self.config.max_plausible_rmssd {
                series.push(HrvSample {
                    timestamp: end,
                    rmssd,
                });
            }
        }

        series
    }

    /// Median RMSSD of the series, or the configured default when empty
    pub fn baseline(&self, series: &[HrvSample]) -> f64 {
        if series.is_empty() {
            return self.config.default_baseline;
        }
        let values: Vec<f64> = series.iter().map(|s| s.rmssd).collect();
        stats::median(&values)
    }

    /// Estimate and compute the baseline in one pass
    pub fn profile(&self, samples: &[HeartRateSample]) -> HrvProfile {
        let series = self.estimate(samples);
        let baseline = self.baseline(&series);
        HrvProfile { series, baseline }
    }

    /// RMSSD of the nearest estimate within the lookup tolerance
    pub fn value_at(&self, series: &[HrvSample], t: DateTime<Utc>) -> Option<f64> {
        timeline::nearest_within(series, t, self.config.match_tolerance()).map(|s| s.rmssd)
    }

    /// Classify a reading against the baseline
    pub fn balance(&self, current: Option<f64>, baseline: f64) -> HrvBalance {
        let Some(current) = current else {
            return HrvBalance::NoReading;
        };
        if baseline <= 0.0 {
            return HrvBalance::NoReading;
        }

        let ratio = current / baseline;
        if ratio < self.config.low_threshold {
            HrvBalance::Suppressed
        } else if ratio > self.config.high_threshold {
            HrvBalance::Elevated
        } else {
            HrvBalance::Balanced
        }
    }

    /// Drain multiplier for a reading
    pub fn drain_multiplier(&self, current: Option<f64>, baseline: f64) -> f64 {
        match self.balance(current, baseline) {
            HrvBalance::Suppressed => self.config.low_multiplier,
            HrvBalance::Elevated => self.config.high_multiplier,
            HrvBalance::Balanced | HrvBalance::NoReading => self.config.normal_multiplier,
        }
    }

    /// Drain multiplier at an instant of a profile
    pub fn multiplier_at(&self, profile: &HrvProfile, t: DateTime<Utc>) -> f64 {
        self.drain_multiplier(self.value_at(&profile.series, t), profile.baseline)
    }
}
