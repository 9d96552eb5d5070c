//! Sleep phase detection and sleep-to-sleep cycle segmentation
//!
//! Works on aggregated heart rate. A phase opens when the rate drops below
//! the sleep threshold and closes when it reaches the wake threshold; the
//! onset is moved back to the most recent local peak so that the cycle
//! starts where the wind-down began.

use chrono::{DateTime, Utc};

use crate::config::{CycleBoundary, SleepConfig};
use crate::models::{HeartRateSample, SleepCycle, SleepPhase};
use crate::timeline;

#[derive(Debug, Clone, Copy)]
enum SleepState {
    Awake,
    Asleep { onset: DateTime<Utc> },
}

/// Threshold-based sleep detector
#[derive(Debug, Clone, Default)]
pub struct SleepDetector {
    config: SleepConfig,
}

impl SleepDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SleepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SleepConfig {
        &self.config
    }

    /// Accepted sleep phases in time order. `aggregated` must be sorted.
    pub fn detect_phases(&self, aggregated: &[HeartRateSample]) -> Vec<SleepPhase> {
        if aggregated.len() < 2 {
            return Vec::new();
        }

        let min_sleep = self.config.min_sleep();
        let mut state = SleepState::Awake;
        let mut phases = Vec::new();

        for (i, point) in aggregated.iter().enumerate() {
            match state {
                SleepState::Awake if point.bpm < self.config.sleep_hr => {
                    state = SleepState::Asleep {
                        onset: self.onset_peak(aggregated, i),
                    };
                }
                SleepState::Asleep { onset } if point.bpm >= self.config.wake_hr => {
                    if point.timestamp - onset >= min_sleep {
                        phases.push(SleepPhase {
                            start: onset,
                            end: point.timestamp,
                        });
                    }
                    state = SleepState::Awake;
                }
                _ => {}
            }
        }

        phases
    }

    /// Timestamp of the highest rate among the current sample and the
    /// preceding look-back window. Ties keep the later sample.
    fn onset_peak(&self, aggregated: &[HeartRateSample], current: usize) -> DateTime<Utc> {
        let first = current.saturating_sub(self.config.onset_lookback);
        let mut peak = current;
        for j in (first..current).rev() {
            if aggregated[j].bpm > aggregated[peak].bpm {
                peak = j;
            }
        }
        aggregated[peak].timestamp
    }

    /// Wake-up instants, one per accepted phase
    pub fn wake_events(&self, aggregated: &[HeartRateSample]) -> Vec<DateTime<Utc>> {
        self.detect_phases(aggregated)
            .into_iter()
            .map(|phase| phase.end)
            .collect()
    }

    /// Cycles between consecutive accepted phases
    pub fn cycles(&self, aggregated: &[HeartRateSample], utc_offset_minutes: i32) -> Vec<SleepCycle> {
        let phases = self.detect_phases(aggregated);
        self.cycles_from_phases(&phases, utc_offset_minutes)
    }

    pub fn cycles_from_phases(
        &self,
        phases: &[SleepPhase],
        utc_offset_minutes: i32,
    ) -> Vec<SleepCycle> {
        phases
            .windows(2)
            .filter_map(|pair| {
                let start = match self.config.cycle_boundary {
                    CycleBoundary::SleepOnset => pair[0].start,
                    CycleBoundary::Wake => pair[0].end,
                };
                let end = pair[1].start;
                (start < end).then(|| SleepCycle {
                    start,
                    end,
                    label: timeline::date_label(start, utc_offset_minutes),
                })
            })
            .collect()
    }
}
