//! Scalar state-space smoother for medium-length sensor gaps.
//!
//! A random-walk Kalman model (unit transition and observation) with a
//! forward filter pass and a Rauch–Tung–Striebel backward pass. Gaps are
//! handled by skipping the measurement update, so the state coasts through
//! missing samples and the backward pass pulls the estimate toward the data
//! on both sides of the gap.

/// Observation noise variance.
const OBSERVATION_VARIANCE: f64 = 1.0;
/// State transition (random-walk) variance.
const TRANSITION_VARIANCE: f64 = 0.1;
/// Initial state covariance.
const INITIAL_COVARIANCE: f64 = 1.0;

/// Smooth a series in place of its observations.
///
/// `observations` may contain NaN for missing samples. The initial state is
/// the first finite observation. Returns the smoothed state mean at every
/// position, or `None` when fewer than two finite anchors exist (the caller
/// falls back to forward/backward fill).
pub fn rts_smooth(observations: &[f64]) -> Option<Vec<f64>> {
    let n = observations.len();
    let anchors = observations.iter().filter(|v| v.is_finite()).count();
    if anchors < 2 {
        return None;
    }

    // First finite observation seeds the state.
    let x0 = observations.iter().copied().find(|v| v.is_finite())?;

    let mut x_pred = vec![0.0; n];
    let mut p_pred = vec![0.0; n];
    let mut x_filt = vec![0.0; n];
    let mut p_filt = vec![0.0; n];

    // Forward filter
    for t in 0..n {
        let (xp, pp) = if t == 0 {
            (x0, INITIAL_COVARIANCE)
        } else {
            (x_filt[t - 1], p_filt[t - 1] + TRANSITION_VARIANCE)
        };
        x_pred[t] = xp;
        p_pred[t] = pp;

        let y = observations[t];
        if y.is_finite() {
            let gain = pp / (pp + OBSERVATION_VARIANCE);
            x_filt[t] = xp + gain * (y - xp);
            p_filt[t] = (1.0 - gain) * pp;
        } else {
            x_filt[t] = xp;
            p_filt[t] = pp;
        }
    }

    // Backward RTS pass
    let mut x_smooth = vec![0.0; n];
    x_smooth[n - 1] = x_filt[n - 1];
    for t in (0..n - 1).rev() {
        let gain = p_filt[t] / p_pred[t + 1];
        x_smooth[t] = x_filt[t] + gain * (x_smooth[t + 1] - x_pred[t + 1]);
    }

    Some(x_smooth)
}
