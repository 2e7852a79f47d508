//! Small statistical helpers shared by the cleaner and the feature engineer.
//!
//! Population statistics throughout (the cleaner's z-score clip and the
//! feature std both follow the population convention). NaN entries are
//! filtered by the callers before these run.

use statrs::statistics::Statistics;

/// Mean of a slice, `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Population standard deviation, `None` when empty.
pub fn population_std(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().population_std_dev())
}

/// OLS slope of `values` against their integer sample index.
///
/// Returns 0.0 for degenerate inputs (fewer than two points, or zero
/// variance in x, which cannot happen for distinct indices).
pub fn ols_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_xy += (x - x_mean) * (y - y_mean);
        sum_xx += (x - x_mean) * (x - x_mean);
    }

    if sum_xx.abs() < 1e-10 {
        return 0.0;
    }

    sum_xy / sum_xx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&data).unwrap() - 5.0).abs() < 1e-12);
        // Classic example: population std is exactly 2
        assert!((population_std(&data).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(mean(&[]).is_none());
        assert!(population_std(&[]).is_none());
    }

    #[test]
    fn test_slope_of_line() {
        let values: Vec<f64> = (0..30).map(|i| 1.5 + 0.25 * i as f64).collect();
        assert!((ols_slope(&values) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_slope_of_constant_is_zero() {
        let values = [7.0; 30];
        assert_eq!(ols_slope(&values), 0.0);
    }

    #[test]
    fn test_slope_short_input() {
        assert_eq!(ols_slope(&[1.0]), 0.0);
    }
}
