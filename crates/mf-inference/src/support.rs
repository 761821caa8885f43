//! Common-support trimming on the propensity score.

use mf_core::{Error, Result, Table};
use serde::Serialize;

use crate::propensity::PROPENSITY_COL;

/// Default trimming threshold τ: keep `τ < score < 1 - τ`.
pub const DEFAULT_TRIM_THRESHOLD: f64 = 0.05;

/// Row accounting for one trimming pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SupportSummary {
    /// Rows before trimming.
    pub n_before: usize,
    /// Rows kept.
    pub n_after: usize,
    /// Rows with `score <= τ`.
    pub trimmed_low: usize,
    /// Rows with `score >= 1 - τ`.
    pub trimmed_high: usize,
    /// Rows with a missing score.
    pub missing: usize,
}

/// Keep rows with `threshold < propensity_score < 1 - threshold` (strict).
pub fn trim_common_support(table: &Table, threshold: f64) -> Result<Table> {
    Ok(trim_common_support_with_summary(table, threshold)?.0)
}

/// [`trim_common_support`] plus a [`SupportSummary`].
pub fn trim_common_support_with_summary(
    table: &Table,
    threshold: f64,
) -> Result<(Table, SupportSummary)> {
    if !(0.0..0.5).contains(&threshold) {
        return Err(Error::Validation(format!(
            "trim threshold must be in [0, 0.5), got {}",
            threshold
        )));
    }
    let scores = table.f64_column(PROPENSITY_COL)?;
    let (lo, hi) = (threshold, 1.0 - threshold);

    let mut summary = SupportSummary { n_before: scores.len(), ..Default::default() };
    let mask: Vec<bool> = scores
        .iter()
        .map(|&p| {
            if p.is_nan() {
                summary.missing += 1;
                false
            } else if p <= lo {
                summary.trimmed_low += 1;
                false
            } else if p >= hi {
                summary.trimmed_high += 1;
                false
            } else {
                true
            }
        })
        .collect();

    let trimmed = table.filter(&mask)?;
    summary.n_after = trimmed.n_rows();
    if summary.n_after < summary.n_before {
        log::debug!(
            "common support [{}, {}]: dropped {} of {} rows",
            lo,
            hi,
            summary.n_before - summary.n_after,
            summary.n_before
        );
    }
    Ok((trimmed, summary))
}
