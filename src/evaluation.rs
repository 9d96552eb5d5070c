//! Backtest of a parameter set against validated ratings
//!
//! Every rating is predicted by an anchored simulation that only sees the
//! ratings strictly before it, so a sample never anchors its own prediction.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregation::{aggregate_heart_rate, sorted_by_time};
use crate::config::ModelConfig;
use crate::error::{CalibrationError, Result};
use crate::hrv::HrvEstimator;
use crate::models::{HeartRateSample, ModelParameters, ValidatedEnergySample};
use crate::simulator::{AnchoredInput, EnergySimulator};
use crate::sleep::SleepDetector;
use crate::stats;
use crate::timeline;

/// One rating and the model's prediction for it (both 0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPoint {
    pub timestamp: DateTime<Utc>,
    pub actual: f64,
    pub predicted: f64,
}

impl EvaluationPoint {
    pub fn residual(&self) -> f64 {
        self.predicted - self.actual
    }
}

/// Error metrics over all matched ratings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub n: usize,
    pub rmse: f64,
    pub mae: f64,
    /// Mean of predicted minus actual
    pub bias: f64,
    /// Pearson correlation, absent when either side is constant
    pub correlation: Option<f64>,
    pub points: Vec<EvaluationPoint>,
}

impl EvaluationReport {
    fn from_points(points: Vec<EvaluationPoint>) -> Self {
        let n = points.len();
        let residuals: Vec<f64> = points.iter().map(EvaluationPoint::residual).collect();
        let count = n as f64;
        let rmse = (residuals.iter().map(|r| r * r).sum::<f64>() / count).sqrt();
        let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / count;
        let bias = residuals.iter().sum::<f64>() / count;

        let actual: Vec<f64> = points.iter().map(|p| p.actual).collect();
        let predicted: Vec<f64> = points.iter().map(|p| p.predicted).collect();

        Self {
            n,
            rmse,
            mae,
            bias,
            correlation: stats::pearson(&actual, &predicted),
            points,
        }
    }
}

/// Replays the forecasting simulation over history
#[derive(Debug, Clone)]
pub struct ModelEvaluator {
    simulator: EnergySimulator,
    hrv: HrvEstimator,
    sleep: SleepDetector,
    bucket_width: Duration,
    match_tolerance: Duration,
    default_start_energy: f64,
    reset_on_wake: bool,
}

impl Default for ModelEvaluator {
    fn default() -> Self {
        Self::with_config(&ModelConfig::default())
    }
}

impl ModelEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        Self {
            simulator: EnergySimulator::with_config(config),
            hrv: HrvEstimator::with_config(config.hrv.clone()),
            sleep: SleepDetector::with_config(config.sleep.clone()),
            bucket_width: config.aggregation_width(),
            match_tolerance: config.calibration.match_tolerance(),
            default_start_energy: config.simulation.default_start_energy,
            reset_on_wake: config.sleep.reset_on_wake,
        }
    }

    /// Predict every rating from the ratings before it.
    ///
    /// Ratings without a simulated point within the match tolerance are left
    /// out. Fails when nothing could be matched.
    pub fn evaluate(
        &self,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
        params: &ModelParameters,
    ) -> Result<EvaluationReport> {
        let aggregated = aggregate_heart_rate(heart_rate, self.bucket_width);
        let hrv = self.hrv.profile(heart_rate);
        let wake_events = if self.reset_on_wake {
            self.sleep.wake_events(&aggregated)
        } else {
            Vec::new()
        };
        let ratings = sorted_by_time(validated);

        let points: Vec<EvaluationPoint> = ratings
            .par_iter()
            .filter_map(|rating| {
                let earlier = &ratings[..ratings.partition_point(|v| v.timestamp < rating.timestamp)];
                let fallback_start = earlier
                    .last()
                    .map(|v| v.percentage)
                    .unwrap_or(self.default_start_energy);
                let simulated = self.simulator.simulate_anchored(
                    AnchoredInput {
                        heart_rate: &aggregated,
                        hrv: &hrv,
                        validated: earlier,
                        wake_events: &wake_events,
                        fallback_start,
                    },
                    params,
                );
                timeline::nearest_within(&simulated, rating.timestamp, self.match_tolerance).map(
                    |p| EvaluationPoint {
                        timestamp: rating.timestamp,
                        actual: rating.percentage,
                        predicted: p.energy,
                    },
                )
            })
            .collect();

        if points.is_empty() {
            return Err(CalibrationError::InsufficientData {
                stage: "evaluation".to_string(),
                reason: format!(
                    "none of {} ratings fell within the simulated range",
                    ratings.len()
                ),
            }
            .into());
        }

        let report = EvaluationReport::from_points(points);
        info!(
            n = report.n,
            rmse = report.rmse,
            mae = report.mae,
            bias = report.bias,
            "Evaluated {}",
            params
        );
        Ok(report)
    }
}

/// Backtest `params` with the given model configuration
pub fn evaluate_model(
    heart_rate: &[HeartRateSample],
    validated: &[ValidatedEnergySample],
    params: &ModelParameters,
    config: &ModelConfig,
) -> Result<EvaluationReport> {
    ModelEvaluator::with_config(config).evaluate(heart_rate, validated, params)
}
