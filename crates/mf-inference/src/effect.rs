//! Treatment-effect estimates on a matched sample.

use std::fmt;

use mf_core::Result;
use mf_prob::math::nanmean;
use serde::{Deserialize, Serialize};

use crate::matching::MatchedTable;
use crate::regression::{DesignMatrix, OlsFit, fit_ols};

/// Outcome regression `outcome ~ treatment + covariates` (intercept implied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionSpec {
    /// Dependent variable.
    pub outcome: String,
    /// Treatment indicator; its coefficient is the adjusted effect.
    pub treatment: String,
    /// Additional regressors.
    pub covariates: Vec<String>,
}

impl RegressionSpec {
    /// Build a spec from borrowed names.
    pub fn new(outcome: &str, treatment: &str, covariates: &[&str]) -> Self {
        Self {
            outcome: outcome.to_string(),
            treatment: treatment.to_string(),
            covariates: covariates.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Regressors in design order: treatment first, then covariates.
    pub fn regressors(&self) -> Vec<&str> {
        std::iter::once(self.treatment.as_str())
            .chain(self.covariates.iter().map(String::as_str))
            .collect()
    }

    /// Formula form, e.g. `y ~ treatment + x1 + x2`.
    pub fn formula(&self) -> String {
        format!("{} ~ {}", self.outcome, self.regressors().join(" + "))
    }
}

impl fmt::Display for RegressionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formula())
    }
}

/// Average treatment effect on the treated: mean over match ids of the treated
/// outcome minus the mean control outcome. Undefined pairs are skipped.
///
/// `None` when the matched table is empty or no pair has a defined difference.
pub fn calculate_att(matched: &MatchedTable, outcome_col: &str) -> Result<Option<f64>> {
    if matched.is_empty() {
        return Ok(None);
    }
    Ok(nanmean(matched.paired_differences(outcome_col)?))
}

/// OLS of `spec` on the matched rows (doubly robust adjustment).
///
/// Rows with a missing value in any used column are dropped first. `None` when
/// the matched table is empty or no complete row remains. A rank-deficient
/// design (e.g. a covariate constant within the matched sample) still yields a
/// fit; see [`fit_ols`].
pub fn bias_adjustment(matched: &MatchedTable, spec: &RegressionSpec) -> Result<Option<OlsFit>> {
    if matched.is_empty() {
        return Ok(None);
    }
    let regressors = spec.regressors();
    let mut used = vec![spec.outcome.as_str()];
    used.extend(&regressors);

    let complete = matched.rows().drop_missing(&used)?;
    if complete.is_empty() {
        log::warn!("bias adjustment: no complete rows for {}", spec);
        return Ok(None);
    }
    if complete.n_rows() < matched.n_rows() {
        log::debug!(
            "bias adjustment: dropped {} incomplete rows",
            matched.n_rows() - complete.n_rows()
        );
    }

    let x = DesignMatrix::from_table(&complete, &regressors, true)?;
    let y = complete.f64_column(&spec.outcome)?;
    fit_ols(&x, &y).map(Some)
}
