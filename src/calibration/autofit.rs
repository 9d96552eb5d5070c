//! Cross-cycle calibration
//!
//! Fits every usable cycle independently, then combines the accepted fits
//! parameter by parameter with a robust aggregate (median by default), so a
//! single atypical day cannot drag the personal model away.

use chrono::Duration;
use rayon::prelude::*;
use tracing::{debug, info};

use super::Calibrator;
use crate::aggregation::aggregate_heart_rate;
use crate::config::ModelConfig;
use crate::models::{
    AggregationMethod, AutoFitResult, CycleTrainingSet, DayFitResult, FitRange, HeartRateSample,
    ModelParameters, ValidatedEnergySample,
};
use crate::sleep::SleepDetector;
use crate::stats;

/// Detects cycles, fits them and aggregates the results
#[derive(Debug, Clone)]
pub struct CrossCycleAggregator {
    calibrator: Calibrator,
    detector: SleepDetector,
    bucket_width: Duration,
    utc_offset_minutes: i32,
}

impl Default for CrossCycleAggregator {
    fn default() -> Self {
        Self::with_config(&ModelConfig::default())
    }
}

impl CrossCycleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        Self {
            calibrator: Calibrator::with_config(config),
            detector: SleepDetector::with_config(config.sleep.clone()),
            bucket_width: config.aggregation_width(),
            utc_offset_minutes: config.utc_offset_minutes,
        }
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Usable training sets for every detected cycle, in time order.
    ///
    /// Heart rate may be raw or already aggregated at the configured width.
    pub fn training_sets(
        &self,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
    ) -> Vec<CycleTrainingSet> {
        let aggregated = aggregate_heart_rate(heart_rate, self.bucket_width);
        let cycles = self.detector.cycles(&aggregated, self.utc_offset_minutes);
        debug!(
            buckets = aggregated.len(),
            cycles = cycles.len(),
            "Detected sleep cycles"
        );
        self.calibrator.training_sets(&cycles, &aggregated, validated)
    }

    /// Keep sets that start within the range's look-back of the latest cycle start
    pub fn filter_by_range(sets: Vec<CycleTrainingSet>, range: FitRange) -> Vec<CycleTrainingSet> {
        let Some(lookback) = range.lookback() else {
            return sets;
        };
        let Some(latest) = sets.iter().map(|s| s.cycle.start).max() else {
            return sets;
        };
        let cutoff = latest - lookback;
        sets.into_iter()
            .filter(|s| s.cycle.start >= cutoff)
            .collect()
    }

    /// Calibrate with the configured range
    pub fn auto_fit(
        &self,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
    ) -> AutoFitResult {
        self.auto_fit_range(heart_rate, validated, self.calibrator.config().fit_range)
    }

    /// Calibrate over the cycles selected by `range`
    pub fn auto_fit_range(
        &self,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
        range: FitRange,
    ) -> AutoFitResult {
        let all = self.training_sets(heart_rate, validated);
        let total_days = all.len();
        let selected = Self::filter_by_range(all, range);
        self.aggregate(&selected, total_days)
    }

    /// Fit each set and combine the accepted fits
    pub fn aggregate(&self, sets: &[CycleTrainingSet], total_days: usize) -> AutoFitResult {
        if sets.is_empty() {
            return Self::unfitted(Vec::new(), total_days);
        }

        let day_results = self.fit_all(sets);
        self.combine(sets, day_results, total_days)
    }

    /// Whether a cycle fit is good enough to take part in the combined model
    pub fn accepts(&self, fit: &DayFitResult) -> bool {
        fit.loss.is_finite() && fit.loss < self.calibrator.config().max_accepted_loss
    }

    /// Combine per-cycle fits of `sets` (same order) into one parameter set
    pub fn combine(
        &self,
        sets: &[CycleTrainingSet],
        day_results: Vec<DayFitResult>,
        total_days: usize,
    ) -> AutoFitResult {
        let accepted: Vec<&DayFitResult> = day_results.iter().filter(|d| self.accepts(d)).collect();

        if accepted.is_empty() {
            info!(
                cycles = sets.len(),
                "No cycle produced an acceptable fit, keeping defaults"
            );
            return Self::unfitted(day_results, total_days);
        }

        let method = self.calibrator.config().aggregation_method;
        let combine = |f: fn(&DayFitResult) -> f64| -> f64 {
            let values: Vec<f64> = accepted.iter().map(|d| f(d)).collect();
            stats::aggregate(&values, method)
        };

        let combined = ModelParameters::new(
            stats::round_to(combine(|d| d.hr_low), 1),
            stats::round_to(combine(|d| d.hr_high), 1),
            stats::round_to(combine(|d| d.drain_factor), 2),
            stats::round_to(combine(|d| d.recovery_factor), 2),
        );
        let loss = combine(|d| d.loss);

        let offsets: Vec<f64> = sets
            .iter()
            .map(|set| self.calibrator.energy_offset(set, &combined))
            .collect();
        let parameters = combined.with_offset(stats::round_to(stats::median(&offsets), 1));
        let used_days = accepted.len();

        info!(
            used = used_days,
            fitted = day_results.len(),
            total = total_days,
            loss,
            "Calibrated: {}",
            parameters
        );

        AutoFitResult {
            parameters,
            loss,
            day_results,
            used_days,
            total_days,
        }
    }

    fn fit_all(&self, sets: &[CycleTrainingSet]) -> Vec<DayFitResult> {
        if self.calibrator.config().parallel {
            sets.par_iter()
                .map(|set| self.calibrator.fit_cycle(set))
                .collect()
        } else {
            sets.iter().map(|set| self.calibrator.fit_cycle(set)).collect()
        }
    }

    fn unfitted(day_results: Vec<DayFitResult>, total_days: usize) -> AutoFitResult {
        AutoFitResult {
            parameters: ModelParameters::default(),
            loss: f64::INFINITY,
            day_results,
            used_days: 0,
            total_days,
        }
    }

    /// Aggregation method in use
    pub fn method(&self) -> AggregationMethod {
        self.calibrator.config().aggregation_method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::synthetic_set;

    fn shifted(set: &CycleTrainingSet, days: i64, label: &str) -> CycleTrainingSet {
        let shift = Duration::days(days);
        let mut out = set.clone();
        out.cycle.start += shift;
        out.cycle.end += shift;
        out.cycle.label = label.to_string();
        for h in &mut out.heart_rate {
            h.timestamp += shift;
        }
        for v in &mut out.validated {
            v.timestamp += shift;
        }
        out
    }

    #[test]
    fn test_no_cycles_yields_defaults() {
        let aggregator = CrossCycleAggregator::new();
        let result = aggregator.auto_fit(&[], &[]);

        assert_eq!(result.parameters, ModelParameters::default());
        assert_eq!(result.used_days, 0);
        assert_eq!(result.total_days, 0);
        assert!(result.day_results.is_empty());
        assert_eq!(result.loss, f64::INFINITY);
    }

    #[test]
    fn test_unmatched_cycles_yield_defaults_with_day_results() {
        let aggregator = CrossCycleAggregator::new();
        let mut set = synthetic_set(&ModelParameters::default());
        for v in &mut set.validated {
            v.timestamp -= Duration::days(5);
        }

        let result = aggregator.aggregate(&[set], 1);

        assert_eq!(result.parameters, ModelParameters::default());
        assert_eq!(result.used_days, 0);
        assert_eq!(result.day_results.len(), 1);
    }

    fn day_fit(label: &str, hr_low: f64, hr_high: f64, drain_factor: f64, loss: f64) -> DayFitResult {
        DayFitResult {
            hr_low,
            hr_high,
            drain_factor,
            recovery_factor: 1.0,
            loss,
            energy_offset: 0.0,
            label: label.to_string(),
            data_points: 12,
        }
    }

    #[test]
    fn test_poor_fit_is_rejected() {
        let aggregator = CrossCycleAggregator::new();
        let mut set = synthetic_set(&ModelParameters::default());
        for (i, v) in set.validated.iter_mut().enumerate() {
            v.percentage = if i % 2 == 0 { 0.0 } else { 100.0 };
        }

        let result = aggregator.aggregate(&[set], 1);

        let fit = &result.day_results[0];
        assert!(fit.loss.is_finite());
        assert!(fit.loss >= 500.0, "loss {}", fit.loss);
        assert_eq!(result.used_days, 0);
        assert_eq!(result.total_days, 1);
        assert_eq!(result.parameters, ModelParameters::default());
    }

    #[test]
    fn test_loss_at_threshold_is_rejected() {
        let aggregator = CrossCycleAggregator::new();
        let base = synthetic_set(&ModelParameters::default());
        let sets = vec![base.clone(), shifted(&base, 1, "2024-03-02")];
        let fits = vec![
            day_fit("2024-03-01", 70.0, 110.0, 2.0, 500.0),
            day_fit("2024-03-02", 60.0, 100.0, 1.0, 499.9),
        ];

        assert!(!aggregator.accepts(&fits[0]));
        assert!(aggregator.accepts(&fits[1]));

        let result = aggregator.combine(&sets, fits, 2);

        assert_eq!(result.used_days, 1);
        assert_eq!(result.parameters.hr_low, 60.0);
        assert_eq!(result.parameters.hr_high, 100.0);
        assert_eq!(result.parameters.drain_factor, 1.0);
    }

    #[test]
    fn test_outlier_cycle_does_not_skew_median() {
        let aggregator = CrossCycleAggregator::new();
        assert_eq!(aggregator.method(), AggregationMethod::Median);
        let base = synthetic_set(&ModelParameters::default());
        let sets: Vec<CycleTrainingSet> = (0..4)
            .map(|d| shifted(&base, d, &format!("2024-03-0{}", d + 1)))
            .collect();
        let fits = vec![
            day_fit("2024-03-01", 10.0, 100.0, 1.0, 5.0),
            day_fit("2024-03-02", 10.0, 100.0, 1.0, 5.0),
            day_fit("2024-03-03", 10.0, 100.0, 1.0, 5.0),
            day_fit("2024-03-04", 1000.0, 2000.0, 50.0, 5.0),
        ];

        let result = aggregator.combine(&sets, fits, 4);

        assert_eq!(result.used_days, 4);
        assert_eq!(result.parameters.hr_low, 10.0);
        assert_eq!(result.parameters.hr_high, 100.0);
        assert_eq!(result.parameters.drain_factor, 1.0);
        assert_eq!(result.parameters.recovery_factor, 1.0);
    }

    #[test]
    fn test_identical_cycles_aggregate_to_their_fit() {
        let aggregator = CrossCycleAggregator::new();
        let truth = ModelParameters::new(60.0, 90.0, 1.5, 2.0);
        let first = synthetic_set(&truth);
        let second = shifted(&first, 1, "2024-03-02");
        let third = shifted(&first, 2, "2024-03-03");

        let result = aggregator.aggregate(&[first, second, third], 3);

        assert_eq!(result.used_days, 3);
        assert_eq!(result.total_days, 3);
        let fit = &result.day_results[0];
        assert_eq!(result.parameters.hr_low, fit.hr_low);
        assert_eq!(result.parameters.hr_high, fit.hr_high);
        assert_eq!(result.parameters.drain_factor, fit.drain_factor);
        assert!(result.parameters.energy_offset.abs() < 1.0);
        // Order is preserved even when fitting in parallel
        let labels: Vec<&str> = result.day_results.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);
    }

    #[test]
    fn test_filter_by_range() {
        let base = synthetic_set(&ModelParameters::default());
        let sets = vec![
            base.clone(),
            shifted(&base, 10, "d10"),
            shifted(&base, 20, "d20"),
            shifted(&base, 27, "d27"),
        ];

        let week = CrossCycleAggregator::filter_by_range(sets.clone(), FitRange::Week);
        let labels: Vec<&str> = week.iter().map(|s| s.cycle.label.as_str()).collect();
        assert_eq!(labels, vec!["d20", "d27"]);

        assert_eq!(
            CrossCycleAggregator::filter_by_range(sets.clone(), FitRange::Month).len(),
            4
        );
        assert_eq!(CrossCycleAggregator::filter_by_range(sets, FitRange::All).len(), 4);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let mut config = ModelConfig::default();
        config.calibration.parallel = false;
        let sequential = CrossCycleAggregator::with_config(&config);
        let parallel = CrossCycleAggregator::new();

        let truth = ModelParameters::new(65.0, 100.0, 1.0, 1.5);
        let first = synthetic_set(&truth);
        let sets = vec![first.clone(), shifted(&first, 1, "2024-03-02")];

        assert_eq!(sequential.aggregate(&sets, 2), parallel.aggregate(&sets, 2));
    }
}
