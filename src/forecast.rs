//! Energy forecast from a trained model snapshot
//!
//! Prediction is a pure function of the snapshot, the recent samples and
//! the query time, so it can run while a retrain is in progress.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::aggregate_heart_rate;
use crate::config::{ModelConfig, ScheduleConfig};
use crate::decay::DecayEstimator;
use crate::hrv::HrvEstimator;
use crate::models::{
    AutoFitResult, DayFitResult, DecayRateProfile, EnergyForecastResult, ForecastSource,
    HeartRateSample, ModelParameters, ValidatedEnergySample,
};
use crate::simulator::{AnchoredInput, EnergySimulator};
use crate::sleep::SleepDetector;
use crate::timeline;

/// Summary of the training run that produced a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub loss: f64,
    pub used_days: usize,
    pub total_days: usize,
    pub day_results: Vec<DayFitResult>,
}

impl From<&AutoFitResult> for TrainingSummary {
    fn from(result: &AutoFitResult) -> Self {
        Self {
            loss: result.loss,
            used_days: result.used_days,
            total_days: result.total_days,
            day_results: result.day_results.clone(),
        }
    }
}

/// Immutable trained state used by predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub parameters: ModelParameters,
    pub decay: DecayRateProfile,

    /// None until the first successful retrain
    pub trained_at: Option<DateTime<Utc>>,
    pub training: Option<TrainingSummary>,
}

impl Default for ModelSnapshot {
    fn default() -> Self {
        Self {
            parameters: ModelParameters::default(),
            decay: DecayRateProfile::default(),
            trained_at: None,
            training: None,
        }
    }
}

/// Samples a prediction works from
#[derive(Debug, Clone, Copy, Default)]
pub struct ForecastInput<'a> {
    /// Raw heart rate of the prediction window
    pub heart_rate: &'a [HeartRateSample],

    /// Validated energy of the anchor window (0-100)
    pub validated: &'a [ValidatedEnergySample],

    /// Most recent validated sample overall, if the source knows one
    pub latest_validated: Option<ValidatedEnergySample>,
}

impl ForecastInput<'_> {
    fn latest(&self) -> Option<ValidatedEnergySample> {
        let in_window = self.validated.iter().max_by_key(|v| v.timestamp).copied();
        match (in_window, self.latest_validated) {
            (Some(a), Some(b)) => Some(if b.timestamp > a.timestamp { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// Produces `EnergyForecastResult`s
#[derive(Debug, Clone)]
pub struct Forecaster {
    bucket_width: Duration,
    horizon: Duration,
    match_tolerance: Duration,
    default_start_energy: f64,
    reset_on_wake: bool,
    simulator: EnergySimulator,
    hrv: HrvEstimator,
    sleep: SleepDetector,
    decay: DecayEstimator,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self::with_config(&ModelConfig::default(), &ScheduleConfig::default())
    }
}

impl Forecaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(model: &ModelConfig, schedule: &ScheduleConfig) -> Self {
        Self {
            bucket_width: model.aggregation_width(),
            horizon: schedule.forecast_horizon(),
            match_tolerance: schedule.match_tolerance(),
            default_start_energy: model.simulation.default_start_energy,
            reset_on_wake: model.sleep.reset_on_wake,
            simulator: EnergySimulator::with_config(model),
            hrv: HrvEstimator::with_config(model.hrv.clone()),
            sleep: SleepDetector::with_config(model.sleep.clone()),
            decay: DecayEstimator::with_config(model.decay.clone(), model.utc_offset_minutes),
        }
    }

    /// Energy at `now` and at `now + horizon`, both in [0, 1]
    pub fn predict(
        &self,
        snapshot: &ModelSnapshot,
        input: ForecastInput<'_>,
        now: DateTime<Utc>,
    ) -> EnergyForecastResult {
        let aggregated = aggregate_heart_rate(input.heart_rate, self.bucket_width);
        if aggregated.is_empty() {
            return self.predict_with_decay(snapshot, &input, now);
        }

        let latest = input.latest();
        let fallback_start = latest
            .map(|v| v.percentage)
            .unwrap_or(self.default_start_energy);

        let hrv = self.hrv.profile(input.heart_rate);
        let wake_events = if self.reset_on_wake {
            self.sleep.wake_events(&aggregated)
        } else {
            Vec::new()
        };

        let simulated = self.simulator.simulate_anchored(
            AnchoredInput {
                heart_rate: &aggregated,
                hrv: &hrv,
                validated: input.validated,
                wake_events: &wake_events,
                fallback_start,
            },
            &snapshot.parameters,
        );

        let future_time = now + self.horizon;
        let fallback_now = fallback_start / 100.0;

        let percentage_now = timeline::nearest_within(&simulated, now, self.match_tolerance)
            .map(|p| p.energy / 100.0)
            .unwrap_or(fallback_now);
        let percentage_future =
            timeline::nearest_within(&simulated, future_time, self.match_tolerance)
                .or(simulated.last())
                .map(|p| p.energy / 100.0)
                .unwrap_or(fallback_now);

        debug!(
            points = simulated.len(),
            hrv_samples = hrv.series.len(),
            now = percentage_now,
            future = percentage_future,
            "Heart-rate forecast"
        );

        EnergyForecastResult {
            time: now,
            percentage_now: percentage_now.clamp(0.0, 1.0),
            time_future: future_time,
            percentage_future: percentage_future.clamp(0.0, 1.0),
            source: ForecastSource::HeartRateModel,
        }
    }

    fn predict_with_decay(
        &self,
        snapshot: &ModelSnapshot,
        input: &ForecastInput<'_>,
        now: DateTime<Utc>,
    ) -> EnergyForecastResult {
        let (last_energy, last_time) = match input.latest() {
            Some(v) => (v.percentage / 100.0, v.timestamp),
            None => (0.5, now),
        };

        let prediction =
            self.decay
                .predict(last_energy, last_time, now, self.horizon, &snapshot.decay);

        debug!(
            last_energy,
            now = prediction.now,
            future = prediction.future,
            "Decay fallback forecast"
        );

        EnergyForecastResult {
            time: now,
            percentage_now: prediction.now,
            time_future: now + self.horizon,
            percentage_future: prediction.future,
            source: ForecastSource::DecayFallback,
        }
    }
}
