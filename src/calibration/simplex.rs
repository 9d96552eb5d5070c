//! Nelder-Mead refinement over (hr_low, hr_high, drain, recovery)

use super::Calibrator;
use crate::config::CalibrationConfig;
use crate::models::{CycleTrainingSet, ModelParameters};
use crate::stats;

const DIM: usize = 4;

type Point = [f64; DIM];

#[derive(Debug, Clone, Copy)]
struct Vertex {
    point: Point,
    loss: f64,
}

/// Result of a simplex run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexOutcome {
    pub parameters: ModelParameters,
    pub loss: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Derivative-free minimizer over a 4-dimensional point
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    pub reflection: f64,
    pub expansion: f64,
    pub contraction: f64,
    pub shrink: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

fn along(from: &Point, to: &Point, t: f64) -> Point {
    let mut out = [0.0; DIM];
    for j in 0..DIM {
        out[j] = from[j] + t * (to[j] - from[j]);
    }
    out
}

impl NelderMead {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            reflection: config.reflection,
            expansion: config.expansion,
            contraction: config.contraction,
            shrink: config.shrink,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// Minimize `objective` from `start`, with the initial simplex built by
    /// stepping each coordinate by `steps[j]`.
    ///
    /// Returns the best point, its loss, the iterations performed and
    /// whether the loss spread fell below the tolerance.
    pub fn minimize<F>(&self, start: Point, steps: Point, objective: F) -> (Point, f64, usize, bool)
    where
        F: Fn(&Point) -> f64,
    {
        let mut simplex: Vec<Vertex> = Vec::with_capacity(DIM + 1);
        simplex.push(Vertex {
            point: start,
            loss: objective(&start),
        });
        for j in 0..DIM {
            let mut point = start;
            point[j] += steps[j];
            simplex.push(Vertex {
                point,
                loss: objective(&point),
            });
        }

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            simplex.sort_by(|a, b| a.loss.total_cmp(&b.loss));

            let best = simplex[0];
            let second_worst = simplex[DIM - 1];
            let worst = simplex[DIM];

            let mut centroid = [0.0; DIM];
            for vertex in &simplex[..DIM] {
                for j in 0..DIM {
                    centroid[j] += vertex.point[j] / DIM as f64;
                }
            }

            let reflected = along(&centroid, &worst.point, -self.reflection);
            let reflected_loss = objective(&reflected);

            if reflected_loss < best.loss {
                let expanded = along(&centroid, &reflected, self.expansion);
                let expanded_loss = objective(&expanded);
                simplex[DIM] = if expanded_loss < reflected_loss {
                    Vertex {
                        point: expanded,
                        loss: expanded_loss,
                    }
                } else {
                    Vertex {
                        point: reflected,
                        loss: reflected_loss,
                    }
                };
            } else if reflected_loss < second_worst.loss {
                simplex[DIM] = Vertex {
                    point: reflected,
                    loss: reflected_loss,
                };
            } else {
                let contracted = along(&centroid, &worst.point, self.contraction);
                let contracted_loss = objective(&contracted);
                if contracted_loss < worst.loss {
                    simplex[DIM] = Vertex {
                        point: contracted,
                        loss: contracted_loss,
                    };
                } else {
                    for vertex in simplex.iter_mut().skip(1) {
                        vertex.point = along(&best.point, &vertex.point, self.shrink);
                        vertex.loss = objective(&vertex.point);
                    }
                }
            }

            let losses: Vec<f64> = simplex.iter().map(|v| v.loss).collect();
            if let Some(spread) = stats::finite_population_std_dev(&losses) {
                if spread < self.tolerance {
                    converged = true;
                    break;
                }
            }
        }

        simplex.sort_by(|a, b| a.loss.total_cmp(&b.loss));
        (simplex[0].point, simplex[0].loss, iterations, converged)
    }
}

/// Round a simplex point to reporting precision without making it degenerate.
/// `hr_high` stays at least 0.1 above `hr_low` and both factors at least 0.01.
fn rounded(point: Point) -> ModelParameters {
    let hr_low = stats::round_to(point[0], 1);
    let hr_high = stats::round_to(point[1].max(hr_low + 0.1), 1);
    ModelParameters::new(
        hr_low,
        hr_high,
        stats::round_to(point[2], 2).max(0.01),
        stats::round_to(point[3], 2).max(0.01),
    )
}

impl Calibrator {
    /// Refine a seed with Nelder-Mead. Thresholds are rounded to 0.1 and
    /// factors to 0.01.
    pub fn refine(&self, set: &CycleTrainingSet, seed: &ModelParameters) -> SimplexOutcome {
        let optimizer = NelderMead::from_config(self.config());
        let start = [
            seed.hr_low,
            seed.hr_high,
            seed.drain_factor,
            seed.recovery_factor,
        ];

        let (point, loss, iterations, converged) =
            optimizer.minimize(start, self.config().simplex_steps, |p| {
                self.loss(set, &ModelParameters::new(p[0], p[1], p[2], p[3]))
            });

        SimplexOutcome {
            parameters: rounded(point),
            loss,
            iterations,
            converged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::synthetic_set;

    #[test]
    fn test_rounding_keeps_thresholds_apart() {
        let p = rounded([80.02, 80.04, 1.234, 0.004]);
        assert_eq!(p.hr_low, 80.0);
        assert_eq!(p.hr_high, 80.1);
        assert_eq!(p.drain_factor, 1.23);
        assert_eq!(p.recovery_factor, 0.01);
        assert!(p.is_valid());

        // Rounding both ends onto the same tenth
        let q = rounded([79.96, 80.04, 0.5, 0.5]);
        assert_eq!(q.hr_low, 80.0);
        assert_eq!(q.hr_high, 80.1);
        assert!(q.is_valid());
    }

    #[test]
    fn test_minimizes_quadratic_bowl() {
        let optimizer = NelderMead {
            max_iterations: 2000,
            tolerance: 1e-8,
            ..NelderMead::default()
        };
        let target = [3.0, -1.0, 0.5, 2.0];
        let (point, loss, _, converged) = optimizer.minimize([0.0; 4], [1.0; 4], |p| {
            p.iter().zip(target.iter()).map(|(a, b)| (a - b).powi(2)).sum()
        });

        assert!(converged);
        assert!(loss < 1e-6);
        for (a, b) in point.iter().zip(target.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_respects_iteration_cap() {
        let optimizer = NelderMead {
            max_iterations: 3,
            tolerance: 0.0,
            ..NelderMead::default()
        };
        let (_, _, iterations, converged) =
            optimizer.minimize([10.0; 4], [1.0; 4], |p| p.iter().map(|x| x * x).sum());
        assert_eq!(iterations, 3);
        assert!(!converged);
    }

    #[test]
    fn test_all_infinite_never_converges() {
        let optimizer = NelderMead::default();
        let (_, loss, iterations, converged) =
            optimizer.minimize([0.0; 4], [1.0; 4], |_| f64::INFINITY);
        assert_eq!(loss, f64::INFINITY);
        assert_eq!(iterations, optimizer.max_iterations);
        assert!(!converged);
    }

    #[test]
    fn test_refine_does_not_worsen_seed() {
        let calibrator = Calibrator::new();
        let truth = ModelParameters::new(62.0, 96.0, 1.3, 1.7);
        let set = synthetic_set(&truth);
        let seed = calibrator.grid_search(&set);

        let refined = calibrator.refine(&set, &seed.parameters);

        assert!(refined.loss <= seed.loss);
        assert!(refined.iterations <= 50);
        // Rounded to the documented precision
        let p = refined.parameters;
        assert!(((p.hr_low * 10.0).round() - p.hr_low * 10.0).abs() < 1e-9);
        assert!(((p.drain_factor * 100.0).round() - p.drain_factor * 100.0).abs() < 1e-9);
    }
}
