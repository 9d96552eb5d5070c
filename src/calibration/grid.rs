//! Exhaustive coarse search used to seed the simplex

use serde::{Deserialize, Serialize};

use super::Calibrator;
use crate::models::{CycleTrainingSet, ModelParameters};

/// Best grid candidate and its loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    pub parameters: ModelParameters,
    pub loss: f64,

    /// Candidates scored (pairs with hr_low >= hr_high are not counted)
    pub evaluated: usize,
}

impl Calibrator {
    /// Score every valid grid combination and keep the first minimum.
    ///
    /// Without any finite loss the default parameters are returned with an
    /// infinite loss.
    pub fn grid_search(&self, set: &CycleTrainingSet) -> GridResult {
        let config = self.config();
        let mut best = GridResult {
            parameters: ModelParameters::default(),
            loss: f64::INFINITY,
            evaluated: 0,
        };

        for &hr_low in &config.hr_low_grid {
            for &hr_high in config.hr_high_grid.iter().filter(|h| hr_low < **h) {
                for &drain in &config.drain_grid {
                    for &recovery in &config.recovery_grid {
                        let candidate = ModelParameters::new(hr_low, hr_high, drain, recovery);
                        let loss = self.loss(set, &candidate);
                        best.evaluated += 1;
                        if loss < best.loss {
                            best.parameters = candidate;
                            best.loss = loss;
                        }
                    }
                }
            }
        }

        best
    }
}
