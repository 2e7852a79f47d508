//! Savitzky–Golay smoothed derivative.
//!
//! Used to differentiate ln(OD) for the specific growth rate. Each output
//! point comes from a second-order polynomial fitted by least squares over a
//! window of samples. Near the edges the window is clamped to the series
//! bounds and the polynomial evaluated at the point's offset, so the first
//! and last points get the derivative of the first/last full window's fit.

/// Polynomial order for the local fits. Window lengths below
/// `POLY_ORDER + 1` cannot be fitted.
const POLY_ORDER: usize = 2;

/// First derivative of `y` (per sample step) via local quadratic fits.
///
/// `window` is the nominal odd window length (5 for the growth-rate filter).
/// Series shorter than the window fall back to the largest odd length that
/// fits; series shorter than 3 return `None`.
pub fn savgol_derivative(y: &[f64], window: usize) -> Option<Vec<f64>> {
    let n = y.len();
    if n < POLY_ORDER + 1 {
        return None;
    }

    let w = effective_window(n, window)?;
    let half = w / 2;

    let mut deriv = Vec::with_capacity(n);
    for i in 0..n {
        // Clamp the window to the series: edge points reuse the first/last
        // full window and evaluate the fit at their own offset.
        let start = i.saturating_sub(half).min(n - w);
        let (a1, a2) = fit_quadratic(&y[start..start + w])?;
        let t = (i - start) as f64;
        deriv.push(a1 + 2.0 * a2 * t);
    }

    Some(deriv)
}

/// Largest usable odd window length for a series of `n` samples.
fn effective_window(n: usize, window: usize) -> Option<usize> {
    let mut w = window.min(n);
    if w % 2 == 0 {
        w -= 1;
    }
    if w < POLY_ORDER + 1 {
        return None;
    }
    Some(w)
}

/// Least-squares fit of `y = a0 + a1·t + a2·t²` over t = 0..len.
/// Returns the derivative coefficients `(a1, a2)`.
fn fit_quadratic(y: &[f64]) -> Option<(f64, f64)> {
    let w = y.len() as f64;

    let (mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0);
    let (mut b0, mut b1, mut b2) = (0.0, 0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let t = i as f64;
        let t2 = t * t;
        s1 += t;
        s2 += t2;
        s3 += t2 * t;
        s4 += t2 * t2;
        b0 += v;
        b1 += t * v;
        b2 += t2 * v;
    }

    // Normal equations: [w s1 s2; s1 s2 s3; s2 s3 s4] · [a0 a1 a2] = [b0 b1 b2]
    let det = w * (s2 * s4 - s3 * s3) - s1 * (s1 * s4 - s3 * s2) + s2 * (s1 * s3 - s2 * s2);
    if det.abs() < 1e-12 {
        return None;
    }

    let a1 = (w * (b1 * s4 - s3 * b2) - b0 * (s1 * s4 - s3 * s2) + s2 * (s1 * b2 - b1 * s2)) / det;
    let a2 = (w * (s2 * b2 - b1 * s3) - s1 * (s1 * b2 - b1 * s2) + b0 * (s1 * s3 - s2 * s2)) / det;

    Some((a1, a2))
}
