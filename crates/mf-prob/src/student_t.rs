//! Student-t tail probabilities for coefficient tests.

use mf_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-sided p-value `P(|T| > |t|)` for `T ~ t(df)`.
pub fn two_sided_p(t: f64, df: f64) -> Result<f64> {
    if !df.is_finite() || df <= 0.0 {
        return Err(Error::Validation(format!("df must be finite and > 0, got {}", df)));
    }
    if t.is_nan() {
        return Ok(f64::NAN);
    }
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| Error::Computation(format!("Student-t construction failed: {e}")))?;
    Ok((2.0 * dist.sf(t.abs())).min(1.0))
}

/// Quantile `t_{q, df}` of the Student-t distribution.
pub fn quantile(q: f64, df: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(Error::Validation(format!("q must be in [0, 1], got {}", q)));
    }
    if !df.is_finite() || df <= 0.0 {
        return Err(Error::Validation(format!("df must be finite and > 0, got {}", df)));
    }
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| Error::Computation(format!("Student-t construction failed: {e}")))?;
    Ok(dist.inverse_cdf(q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_values() {
        // t_{0.975, 10} = 2.228138851986273
        assert_relative_eq!(two_sided_p(2.228_138_851_986_273, 10.0).unwrap(), 0.05, epsilon = 1e-9);
        assert_relative_eq!(two_sided_p(0.0, 5.0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            two_sided_p(-1.5, 7.0).unwrap(),
            two_sided_p(1.5, 7.0).unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_quantile_roundtrips_with_tail() {
        let t = quantile(0.975, 10.0).unwrap();
        assert_relative_eq!(t, 2.228_138_851_986_273, epsilon = 1e-6);
        assert_relative_eq!(two_sided_p(t, 10.0).unwrap(), 0.05, epsilon = 1e-6);
        assert!(quantile(1.5, 10.0).is_err());
    }

    #[test]
    fn test_invalid_df() {
        assert!(two_sided_p(1.0, 0.0).is_err());
        assert!(two_sided_p(1.0, f64::NAN).is_err());
        assert!(two_sided_p(f64::NAN, 3.0).unwrap().is_nan());
    }
}
