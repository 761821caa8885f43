//! Sensitivity analysis: placebo outcome check and Rosenbaum bounds.
//!
//! The Rosenbaum bound here is the simplified normal approximation of the
//! signed-rank statistic:
//!
//! ```text
//! E[W]   = Γ/(1+Γ) · N(N+1)/2
//! Var[W] = N(N+1)(2N+1)/24
//! p      = 1 − Φ((W − E[W]) / sqrt(Var[W]))
//! ```
//!
//! The variance is the Γ = 1 Wilcoxon variance for every Γ, and `Γ/(1+Γ)` is
//! applied uniformly to the full rank sum rather than per rank. At Γ = 1 it is
//! the usual large-sample Wilcoxon signed-rank p-value; for Γ > 1 it differs
//! from the textbook worst-case bound.

use mf_core::{Error, Result, Role};
use mf_prob::math::nanmean;
use mf_prob::{normal, rank};
use serde::Serialize;

use crate::matching::MatchedTable;

/// Placebo effect: mean of `placebo_outcome` over treated rows minus the mean
/// over control rows (unpaired group means, missing values skipped).
///
/// `None` when either group has no observed value.
pub fn run_placebo_test(matched: &MatchedTable, placebo_outcome: &str) -> Result<Option<f64>> {
    if matched.is_empty() {
        return Ok(None);
    }
    let treated = nanmean(matched.group_values(placebo_outcome, Role::Treated)?);
    let control = nanmean(matched.group_values(placebo_outcome, Role::Control)?);
    Ok(match (treated, control) {
        (Some(t), Some(c)) => Some(t - c),
        _ => None,
    })
}

/// Rosenbaum upper bound at a single Γ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RosenbaumBound {
    /// Hidden-bias odds Γ.
    pub gamma: f64,
    /// Pairs with a non-zero, defined difference.
    pub n_pairs: usize,
    /// Sum of ranks of positive differences.
    pub w_plus: f64,
    /// `E[W]` under Γ.
    pub expected: f64,
    /// `Var[W]`.
    pub variance: f64,
    /// Standardized statistic. `None` when `N = 0`.
    pub z: Option<f64>,
    /// Upper bound on the one-sided p-value. `None` when `N = 0`.
    pub p_value: Option<f64>,
}

/// Result of evaluating the bound over a grid of Γ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosenbaumSweep {
    /// Significance level used to locate the critical Γ.
    pub alpha: f64,
    /// One bound per Γ, in ascending Γ order.
    pub bounds: Vec<RosenbaumBound>,
    /// Smallest Γ whose p-value bound exceeds `alpha`. `None` if none does.
    pub critical_gamma: Option<f64>,
}

/// Signed-rank statistic over defined, non-zero paired differences: `(N, W+)`.
fn signed_rank(matched: &MatchedTable, outcome_col: &str) -> Result<(usize, f64)> {
    let diffs: Vec<f64> = matched
        .paired_differences(outcome_col)?
        .into_iter()
        .filter(|d| !d.is_nan() && *d != 0.0)
        .collect();
    let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let ranks = rank::average_ranks(&abs);
    let w_plus: f64 = diffs.iter().zip(&ranks).filter(|(d, _)| **d > 0.0).map(|(_, r)| r).sum();
    Ok((diffs.len(), w_plus))
}

fn check_gamma(gamma: f64) -> Result<()> {
    if !gamma.is_finite() || gamma < 1.0 {
        return Err(Error::Validation(format!("gamma must be finite and >= 1, got {}", gamma)));
    }
    Ok(())
}

fn bound_at(n: usize, w_plus: f64, gamma: f64) -> RosenbaumBound {
    let nf = n as f64;
    let p_plus = gamma / (1.0 + gamma);
    let expected = p_plus * nf * (nf + 1.0) / 2.0;
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0;
    let z = if n > 0 && variance > 0.0 { Some((w_plus - expected) / variance.sqrt()) } else { None };
    RosenbaumBound { gamma, n_pairs: n, w_plus, expected, variance, z, p_value: z.map(normal::sf) }
}

/// Upper bound on the signed-rank p-value of `outcome_col` under hidden bias Γ ≥ 1.
pub fn calculate_rosenbaum_bounds(
    matched: &MatchedTable,
    outcome_col: &str,
    gamma: f64,
) -> Result<RosenbaumBound> {
    check_gamma(gamma)?;
    let (n, w_plus) = signed_rank(matched, outcome_col)?;
    Ok(bound_at(n, w_plus, gamma))
}

/// Evaluate the bound for each Γ in `gammas` and locate the critical Γ.
pub fn rosenbaum_sweep(
    matched: &MatchedTable,
    outcome_col: &str,
    gammas: &[f64],
    alpha: f64,
) -> Result<RosenbaumSweep> {
    if gammas.is_empty() {
        return Err(Error::Validation("gammas must be non-empty".into()));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    for &g in gammas {
        check_gamma(g)?;
    }
    let mut grid = gammas.to_vec();
    grid.sort_by(f64::total_cmp);

    let (n, w_plus) = signed_rank(matched, outcome_col)?;
    let bounds: Vec<RosenbaumBound> = grid.iter().map(|&g| bound_at(n, w_plus, g)).collect();
    let critical_gamma =
        bounds.iter().find(|b| b.p_value.is_some_and(|p| p > alpha)).map(|b| b.gamma);
    Ok(RosenbaumSweep { alpha, bounds, critical_gamma })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mf_core::{Column, Table};

    use crate::matching::MatchDiagnostics;

    /// One treated and one control row per pair, with the given outcome values.
    fn paired(treated: &[f64], control: &[f64]) -> MatchedTable {
        let mut y = Vec::new();
        let mut ids = Vec::new();
        let mut roles = Vec::new();
        for (i, (&t, &c)) in treated.iter().zip(control).enumerate() {
            y.extend([t, c]);
            ids.extend([i as u64, i as u64]);
            roles.extend([Role::Treated, Role::Control]);
        }
        let rows = Table::from_columns(vec![("y", Column::Float(y))]).unwrap();
        MatchedTable::from_parts(rows, ids, roles, MatchDiagnostics::default()).unwrap()
    }

    #[test]
    fn test_gamma_one_is_wilcoxon_normal_approximation() {
        // diffs [1, -2, 3, 4, -5]: W+ = 1 + 3 + 4 = 8, E = 7.5, Var = 13.75
        let m = paired(&[11.0, 8.0, 13.0, 14.0, 5.0], &[10.0; 5]);
        let b = calculate_rosenbaum_bounds(&m, "y", 1.0).unwrap();
        assert_eq!(b.n_pairs, 5);
        assert_relative_eq!(b.w_plus, 8.0);
        assert_relative_eq!(b.expected, 7.5);
        assert_relative_eq!(b.variance, 13.75);
        assert_relative_eq!(b.z.unwrap(), 0.5 / 13.75_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(b.p_value.unwrap(), 0.446369200472174, epsilon = 1e-9);
    }

    #[test]
    fn test_bound_grows_with_gamma() {
        let m = paired(&[11.0, 8.0, 13.0, 14.0, 5.0], &[10.0; 5]);
        let b = calculate_rosenbaum_bounds(&m, "y", 1.5).unwrap();
        assert_relative_eq!(b.expected, 9.0);
        assert_relative_eq!(b.p_value.unwrap(), 0.6062967546668654, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_and_undefined_differences_are_dropped() {
        let m = paired(&[15.0, 16.0, 18.0, 15.5, 16.5, 10.0, f64::NAN], &[10.0; 7]);
        let b = calculate_rosenbaum_bounds(&m, "y", 1.0).unwrap();
        assert_eq!(b.n_pairs, 5);
        assert_relative_eq!(b.w_plus, 15.0);
        assert_relative_eq!(b.p_value.unwrap(), 0.02155722339153765, epsilon = 1e-9);
    }

    #[test]
    fn test_no_pairs_gives_no_p_value() {
        let b = calculate_rosenbaum_bounds(&MatchedTable::empty(), "y", 1.5).unwrap();
        assert_eq!(b.n_pairs, 0);
        assert!(b.p_value.is_none());
        let all_ties = paired(&[1.0, 2.0], &[1.0, 2.0]);
        assert!(calculate_rosenbaum_bounds(&all_ties, "y", 1.0).unwrap().p_value.is_none());
    }

    #[test]
    fn test_gamma_below_one_rejected() {
        let m = paired(&[1.0], &[0.0]);
        assert!(matches!(calculate_rosenbaum_bounds(&m, "y", 0.9), Err(Error::Validation(_))));
    }

    #[test]
    fn test_sweep_finds_critical_gamma() {
        let m = paired(&[15.0, 16.0, 18.0, 15.5, 16.5], &[10.0; 5]);
        let sweep = rosenbaum_sweep(&m, "y", &[2.0, 1.0, 1.5, 3.0], 0.05).unwrap();
        let gammas: Vec<f64> = sweep.bounds.iter().map(|b| b.gamma).collect();
        assert_eq!(gammas, vec![1.0, 1.5, 2.0, 3.0]);
        // p(1.0) ≈ 0.0216 <= 0.05; the bound rises monotonically with Γ.
        let crit = sweep.critical_gamma.unwrap();
        assert!(crit > 1.0);
        let p_at_crit = sweep.bounds.iter().find(|b| b.gamma == crit).unwrap().p_value.unwrap();
        assert!(p_at_crit > 0.05);
        assert!(rosenbaum_sweep(&m, "y", &[], 0.05).is_err());
    }

    #[test]
    fn test_placebo_uses_group_means() {
        let rows = Table::from_columns(vec![(
            "p",
            Column::Float(vec![4.0, 1.0, 6.0, 3.0, f64::NAN]),
        )])
        .unwrap();
        let m = MatchedTable::from_parts(
            rows,
            vec![0, 0, 1, 1, 1],
            vec![Role::Treated, Role::Control, Role::Treated, Role::Control, Role::Control],
            MatchDiagnostics::default(),
        )
        .unwrap();
        assert_relative_eq!(run_placebo_test(&m, "p").unwrap().unwrap(), 3.0);
        assert_eq!(run_placebo_test(&MatchedTable::empty(), "p").unwrap(), None);
    }
}
