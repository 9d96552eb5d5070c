//! Robust statistics shared by the estimators and the calibrator

use statrs::statistics::{Data, Median, Statistics};

use crate::models::AggregationMethod;

/// Median of the values, 0.0 when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values.to_vec()).median()
}

/// Mean of the values within 1.5 IQR of the quartiles.
///
/// Quartiles are taken by index (`n * 0.25`, `n * 0.75`) on the sorted
/// values. Falls back to the median below four values or when the filter
/// removes everything.
pub fn iqr_mean(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return median(values);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let q1 = sorted[(n as f64 * 0.25) as usize];
    let q3 = sorted[(n as f64 * 0.75) as usize];
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;

    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| *v >= lower && *v <= upper)
        .collect();

    if kept.is_empty() {
        median(values)
    } else {
        kept.iter().mean()
    }
}

/// Combine values with the chosen method
pub fn aggregate(values: &[f64], method: AggregationMethod) -> f64 {
    match method {
        AggregationMethod::Median => median(values),
        AggregationMethod::Iqr => iqr_mean(values),
    }
}

/// Population standard deviation of the finite values, None if there are none
pub fn finite_population_std_dev(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        None
    } else {
        Some(finite.iter().population_std_dev())
    }
}

/// Pearson correlation, None when either side has no spread
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let sx = xs.iter().population_std_dev();
    let sy = ys.iter().population_std_dev();
    if sx == 0.0 || sy == 0.0 || !sx.is_finite() || !sy.is_finite() {
        return None;
    }
    Some(xs.iter().population_covariance(ys.iter()) / (sx * sy))
}

/// Round to a number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
