//! Synthetic multi-day history shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use pacing_model::aggregation::aggregate_heart_rate;
use pacing_model::{EnergySimulator, HeartRateSample, ModelParameters, ValidatedEnergySample};

/// Parameters the ratings are generated with
pub fn truth() -> ModelParameters {
    ModelParameters::new(60.0, 100.0, 1.5, 2.0)
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// End of the recorded history, one hour after the last wake-up
pub fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap()
}

fn bpm_at(t: DateTime<Utc>) -> f64 {
    match (t.hour(), t.minute()) {
        (22..=23, _) | (0..=5, _) => 54.0,
        (6..=7, _) => 75.0,
        (8..=11, _) => 95.0,
        (12..=13, _) => 118.0,
        (14..=19, _) => 85.0,
        (21, 45..=59) => 90.0,
        _ => 80.0,
    }
}

/// One reading per minute: four nights of sleep from 22:00 to 06:00
pub fn heart_rate() -> Vec<HeartRateSample> {
    let mut samples = Vec::new();
    let mut t = start();
    while t < end() {
        samples.push(HeartRateSample::new(t, bpm_at(t)));
        t += Duration::minutes(1);
    }
    samples
}

/// Ratings at 09:00, 13:00, 16:00 and 20:00 read off a continuous simulation
pub fn validated(heart_rate: &[HeartRateSample]) -> Vec<ValidatedEnergySample> {
    let aggregated = aggregate_heart_rate(heart_rate, Duration::minutes(15));
    EnergySimulator::new()
        .simulate_plain(&aggregated, &truth(), 50.0)
        .into_iter()
        .filter(|p| p.timestamp.minute() == 0 && matches!(p.timestamp.hour(), 9 | 13 | 16 | 20))
        .map(|p| ValidatedEnergySample::new(p.timestamp, p.energy))
        .collect()
}
