//! Per-cycle parameter calibration
//!
//! Each sleep cycle with enough validated energy is fitted on its own: a
//! coarse grid search seeds a Nelder-Mead refinement. The per-cycle results
//! are then combined robustly by [`autofit`].

pub mod autofit;
pub mod grid;
pub mod simplex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{CalibrationConfig, ModelConfig};
use crate::error::CalibrationError;
use crate::models::{
    CycleTrainingSet, DayFitResult, HeartRateSample, ModelParameters, SimulatedPoint, SleepCycle,
    ValidatedEnergySample,
};
use crate::simulator::EnergySimulator;
use crate::stats;
use crate::timeline;

pub use autofit::CrossCycleAggregator;
pub use simplex::{NelderMead, SimplexOutcome};

/// Scores and fits model parameters against single cycles
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    simulator: EnergySimulator,
    default_start_energy: f64,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::with_config(&ModelConfig::default())
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        Self {
            config: config.calibration.clone(),
            simulator: EnergySimulator::with_config(config),
            default_start_energy: config.simulation.default_start_energy,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Last validated value strictly before `before`, or the default start energy
    pub fn start_energy_before(
        &self,
        validated: &[ValidatedEnergySample],
        before: DateTime<Utc>,
    ) -> f64 {
        validated
            .iter()
            .filter(|v| v.timestamp < before)
            .max_by_key(|v| v.timestamp)
            .map(|v| v.percentage)
            .unwrap_or(self.default_start_energy)
    }

    /// Collect the data of one cycle, rejecting cycles that cannot be fitted
    pub fn training_set(
        &self,
        cycle: &SleepCycle,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
    ) -> Result<CycleTrainingSet, CalibrationError> {
        let mut in_cycle: Vec<ValidatedEnergySample> = validated
            .iter()
            .filter(|v| cycle.contains(v.timestamp))
            .copied()
            .collect();

        if in_cycle.len() < self.config.min_validated_per_cycle {
            return Err(CalibrationError::InsufficientData {
                stage: format!("cycle {}", cycle.label),
                reason: format!(
                    "{} validated samples, need {}",
                    in_cycle.len(),
                    self.config.min_validated_per_cycle
                ),
            });
        }

        let hr_in_cycle: Vec<HeartRateSample> = heart_rate
            .iter()
            .filter(|h| cycle.contains(h.timestamp))
            .copied()
            .collect();

        if hr_in_cycle.is_empty() {
            return Err(CalibrationError::InsufficientData {
                stage: format!("cycle {}", cycle.label),
                reason: "no heart rate inside the cycle".to_string(),
            });
        }

        in_cycle.sort_by_key(|v| v.timestamp);

        Ok(CycleTrainingSet {
            cycle: cycle.clone(),
            heart_rate: hr_in_cycle,
            validated: in_cycle,
            start_energy: self.start_energy_before(validated, cycle.start),
        })
    }

    /// Usable training sets in cycle order; unusable cycles are logged and dropped
    pub fn training_sets(
        &self,
        cycles: &[SleepCycle],
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
    ) -> Vec<CycleTrainingSet> {
        cycles
            .iter()
            .filter_map(|cycle| match self.training_set(cycle, heart_rate, validated) {
                Ok(set) => Some(set),
                Err(e) => {
                    debug!(label = %cycle.label, "Skipping cycle: {}", e);
                    None
                }
            })
            .collect()
    }

    fn simulate(&self, set: &CycleTrainingSet, params: &ModelParameters) -> Vec<SimulatedPoint> {
        self.simulator
            .simulate_plain(&set.heart_rate, params, set.start_energy)
    }

    /// (simulated - validated) for every validated sample with a simulated
    /// point within the match tolerance
    fn residuals(&self, set: &CycleTrainingSet, params: &ModelParameters) -> Vec<f64> {
        let simulated = self.simulate(set, params);
        let tolerance = self.config.match_tolerance();
        set.validated
            .iter()
            .filter_map(|v| {
                timeline::nearest_within(&simulated, v.timestamp, tolerance)
                    .map(|p| p.energy - v.percentage)
            })
            .collect()
    }

    /// Mean squared error of a candidate, or why it cannot be scored
    pub fn try_loss(
        &self,
        set: &CycleTrainingSet,
        params: &ModelParameters,
    ) -> Result<f64, CalibrationError> {
        if params.hr_low >= params.hr_high {
            return Err(CalibrationError::DegenerateFit {
                reason: format!("hr_low {} >= hr_high {}", params.hr_low, params.hr_high),
            });
        }
        if params.drain_factor <= 0.0 || params.recovery_factor <= 0.0 {
            return Err(CalibrationError::DegenerateFit {
                reason: "factors must be positive".to_string(),
            });
        }

        let residuals = self.residuals(set, params);
        if residuals.is_empty() {
            return Err(CalibrationError::NoMatch {
                label: set.cycle.label.clone(),
            });
        }

        let sse: f64 = residuals.iter().map(|r| r * r).sum();
        Ok(sse / residuals.len() as f64)
    }

    /// Loss with every failure scored as +inf
    pub fn loss(&self, set: &CycleTrainingSet, params: &ModelParameters) -> f64 {
        self.try_loss(set, params).unwrap_or(f64::INFINITY)
    }

    /// Median of (simulated - validated) over matched samples, 0 when nothing matched
    pub fn energy_offset(&self, set: &CycleTrainingSet, params: &ModelParameters) -> f64 {
        stats::median(&self.residuals(set, params))
    }

    /// Grid search followed by simplex refinement
    pub fn fit_cycle(&self, set: &CycleTrainingSet) -> DayFitResult {
        let seed = self.grid_search(set);
        let refined = self.refine(set, &seed.parameters);
        let params = refined.parameters;
        let loss = self.loss(set, &params);

        debug!(
            label = %set.cycle.label,
            grid_loss = seed.loss,
            loss,
            iterations = refined.iterations,
            "Fitted cycle: {}",
            params
        );

        DayFitResult {
            hr_low: params.hr_low,
            hr_high: params.hr_high,
            drain_factor: params.drain_factor,
            recovery_factor: params.recovery_factor,
            loss,
            energy_offset: stats::round_to(self.energy_offset(set, &params), 1),
            label: set.cycle.label.clone(),
            data_points: set.validated.len(),
        }
    }
}
