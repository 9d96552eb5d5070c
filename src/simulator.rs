//! Forward drain/recovery simulation of the energy level
//!
//! # Model
//!
//! Per aggregated heart-rate point, with `dt` the minutes since the previous
//! point and `r` the reference step (15 min):
//!
//! ```text
//! hr < hr_low:   e += (hr_low - hr)  * 0.1  * recovery             * dt / r
//! hr > hr_high:  e -= (hr - hr_high) * 0.15 * drain * hrv_mult     * dt / r
//! ```
//!
//! Energy is clamped to [0, 100] after every step and reported as
//! `clamp(e - energy_offset, 0, 100)`. Output timestamps are shifted forward
//! by the heart-rate-to-energy lag.
//!
//! The anchored variant restarts the running energy at every validated
//! sample that falls inside the heart-rate range, which stops drift from
//! accumulating over long horizons.

use chrono::{DateTime, Duration, Utc};

use crate::config::{ModelConfig, SimulationConfig};
use crate::hrv::{HrvEstimator, HrvProfile};
use crate::models::{HeartRateSample, ModelParameters, SimulatedPoint, ValidatedEnergySample};
use crate::timeline;

const MAX_ENERGY: f64 = 100.0;

fn clamp_energy(value: f64) -> f64 {
    value.clamp(0.0, MAX_ENERGY)
}

/// A known energy level the simulation restarts from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// On the heart-rate axis (validated time minus the lag)
    pub at: DateTime<Utc>,
    pub energy: f64,
}

/// Inputs of an anchored run
#[derive(Debug, Clone, Copy)]
pub struct AnchoredInput<'a> {
    /// Aggregated heart rate, sorted
    pub heart_rate: &'a [HeartRateSample],
    pub hrv: &'a HrvProfile,
    pub validated: &'a [ValidatedEnergySample],
    /// Sorted wake-up instants; only used when resetting on wake
    pub wake_events: &'a [DateTime<Utc>],
    /// Start energy when no validated sample precedes the heart rate
    pub fallback_start: f64,
}

struct Segment<'a> {
    heart_rate: &'a [HeartRateSample],
    start_energy: f64,
    first_step: Duration,
    offset: f64,
    hrv: Option<&'a HrvProfile>,
    wake_events: &'a [DateTime<Utc>],
}

/// Deterministic energy simulator
#[derive(Debug, Clone)]
pub struct EnergySimulator {
    config: SimulationConfig,
    hrv: HrvEstimator,
    bucket_width: Duration,
    reset_on_wake: bool,
}

impl Default for EnergySimulator {
    fn default() -> Self {
        Self::with_config(&ModelConfig::default())
    }
}

impl EnergySimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        Self {
            config: config.simulation.clone(),
            hrv: HrvEstimator::with_config(config.hrv.clone()),
            bucket_width: config.aggregation_width(),
            reset_on_wake: config.sleep.reset_on_wake,
        }
    }

    /// Heart-rate-to-energy lag
    pub fn time_offset(&self) -> Duration {
        self.config.time_offset()
    }

    /// One update of the running energy, clamped
    pub fn step(
        &self,
        energy: f64,
        bpm: f64,
        dt: Duration,
        params: &ModelParameters,
        hrv_multiplier: f64,
    ) -> f64 {
        let time_factor = timeline::minutes(dt) / self.config.reference_step_minutes;
        let next = if bpm < params.hr_low {
            energy
                + (params.hr_low - bpm)
                    * self.config.recovery_coefficient
                    * params.recovery_factor
                    * time_factor
        } else if bpm > params.hr_high {
            energy
                - (bpm - params.hr_high)
                    * self.config.drain_coefficient
                    * params.drain_factor
                    * hrv_multiplier
                    * time_factor
        } else {
            energy
        };
        clamp_energy(next)
    }

    /// Calibration variant: no HRV, no anchoring, no offset
    pub fn simulate_plain(
        &self,
        heart_rate: &[HeartRateSample],
        params: &ModelParameters,
        start_energy: f64,
    ) -> Vec<SimulatedPoint> {
        let mut out = Vec::with_capacity(heart_rate.len());
        self.run_segment(
            Segment {
                heart_rate,
                start_energy,
                first_step: self.bucket_width,
                offset: 0.0,
                hrv: None,
                wake_events: &[],
            },
            params,
            &mut out,
        );
        out
    }

    /// Anchor points for a heart-rate range.
    ///
    /// The first anchor sits at the first heart-rate timestamp and carries
    /// the latest validated value whose lag-corrected time is not after it
    /// (or the fallback). Every later validated sample whose lag-corrected
    /// time falls in `(first, last]` adds another anchor.
    pub fn anchors(
        &self,
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
        fallback_start: f64,
    ) -> Vec<Anchor> {
        let (Some(first), Some(last)) = (heart_rate.first(), heart_rate.last()) else {
            return Vec::new();
        };
        let lag = self.time_offset();
        let hr_start = first.timestamp;
        let hr_end = last.timestamp;

        let mut sorted = validated.to_vec();
        sorted.sort_by_key(|v| v.timestamp);

        let initial = sorted
            .iter()
            .rev()
            .find(|v| v.timestamp - lag <= hr_start)
            .map(|v| v.percentage)
            .unwrap_or(fallback_start);

        let mut anchors = vec![Anchor {
            at: hr_start,
            energy: initial,
        }];
        anchors.extend(sorted.iter().filter_map(|v| {
            let at = v.timestamp - lag;
            (at > hr_start && at <= hr_end).then_some(Anchor {
                at,
                energy: v.percentage,
            })
        }));
        anchors
    }

    /// Anchored, HRV-modulated simulation used for forecasting
    pub fn simulate_anchored(
        &self,
        input: AnchoredInput<'_>,
        params: &ModelParameters,
    ) -> Vec<SimulatedPoint> {
        let heart_rate = input.heart_rate;
        let anchors = self.anchors(heart_rate, input.validated, input.fallback_start);
        let mut out = Vec::with_capacity(heart_rate.len());

        for (k, anchor) in anchors.iter().enumerate() {
            let lo = heart_rate.partition_point(|p| p.timestamp < anchor.at);
            let hi = match anchors.get(k + 1) {
                Some(next) => heart_rate.partition_point(|p| p.timestamp < next.at),
                None => heart_rate.len(),
            };
            if lo >= hi {
                continue;
            }

            let segment = &heart_rate[lo..hi];
            let first_step = if k == 0 {
                self.bucket_width
            } else {
                segment[0].timestamp - anchor.at
            };

            self.run_segment(
                Segment {
                    heart_rate: segment,
                    start_energy: anchor.energy,
                    first_step,
                    offset: params.energy_offset,
                    hrv: Some(input.hrv),
                    wake_events: input.wake_events,
                },
                params,
                &mut out,
            );
        }

        out
    }

    fn run_segment(&self, segment: Segment<'_>, params: &ModelParameters, out: &mut Vec<SimulatedPoint>) {
        let lag = self.time_offset();
        let mut energy = segment.start_energy;
        let mut previous: Option<DateTime<Utc>> = None;

        for point in segment.heart_rate {
            let dt = match previous {
                Some(prev) => point.timestamp - prev,
                None => segment.first_step,
            };
            previous = Some(point.timestamp);

            let hrv_multiplier = match segment.hrv {
                Some(profile) => self.hrv.multiplier_at(profile, point.timestamp),
                None => 1.0,
            };

            if self.reset_on_wake && segment.wake_events.binary_search(&point.timestamp).is_ok() {
                energy = MAX_ENERGY;
            } else {
                energy = self.step(energy, point.bpm, dt, params, hrv_multiplier);
            }

            out.push(SimulatedPoint {
                timestamp: point.timestamp + lag,
                energy: clamp_energy(energy - segment.offset),
                hrv_multiplier,
            });
        }
    }
}
