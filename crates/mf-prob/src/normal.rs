//! Standard Normal tail probabilities.

use statrs::function::erf::erfc;

/// Standard Normal CDF `Φ(z)`.
pub fn cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard Normal survival function `1 - Φ(z)`, computed without cancellation.
pub fn sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}
