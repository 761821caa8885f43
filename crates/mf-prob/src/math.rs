//! Small numerically-stable math utilities used across probability code.

/// Offset added to both numerator and denominator of the logit transform so that
/// probabilities at exactly 0 or 1 map to finite scores.
pub const LOGIT_EPS: f64 = 1e-10;

/// Stable `log(1 + exp(x))`.
///
/// Branchless: `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp(); // always in (0, 1], no overflow
    x.max(0.0) + e.ln_1p()
}

/// Stable sigmoid: `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp();
    let recip = 1.0 / (1.0 + e);
    // x >= 0: sigmoid = 1/(1+exp(-x)) = recip
    // x <  0: sigmoid = exp(x)/(1+exp(x)) = e/(1+e) = e*recip
    if x >= 0.0 { recip } else { e * recip }
}

/// Guarded logit: `ln((p + eps) / (1 - p + eps))` with `eps = LOGIT_EPS`.
///
/// This is the matching-scale transform of a propensity score. It is not the
/// exact inverse of [`sigmoid`]; the offset keeps `p = 0` and `p = 1` finite
/// (about `∓23.03`).
#[inline]
pub fn logit_eps(p: f64) -> f64 {
    ((p + LOGIT_EPS) / (1.0 - p + LOGIT_EPS)).ln()
}

/// Arithmetic mean ignoring `NaN` entries. `None` if nothing remains.
pub fn nanmean(xs: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = xs
        .into_iter()
        .filter(|x| !x.is_nan())
        .fold((0.0_f64, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 { None } else { Some(sum / n as f64) }
}

/// Sample standard deviation (`ddof = 1`) ignoring `NaN` entries.
///
/// Returns `NaN` for fewer than two finite observations.
pub fn sample_std(xs: &[f64]) -> f64 {
    let vals: Vec<f64> = xs.iter().copied().filter(|x| !x.is_nan()).collect();
    let n = vals.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = vals.iter().sum::<f64>() / n as f64;
    let ss: f64 = vals.iter().map(|x| (x - mean) * (x - mean)).sum();
    (ss / (n - 1) as f64).sqrt()
}
