//! Propensity score estimation.
//!
//! Logistic regression of a 0/1 treatment indicator on covariates plus an
//! intercept. Scores are appended to the input table as `propensity_score`.

use mf_core::{Column, Error, Result, Table};
use serde::Serialize;

use crate::regression::{DesignMatrix, LogitConfig, LogitFit, fit_logit};

/// Column holding the fitted probability of treatment.
pub const PROPENSITY_COL: &str = "propensity_score";

/// Fitted propensity model.
#[derive(Debug, Clone, Serialize)]
pub struct PropensityModel {
    /// Treatment indicator column the model was fitted on.
    pub treatment: String,
    /// Covariate columns, in design order (intercept excluded).
    pub covariates: Vec<String>,
    /// Underlying logistic regression.
    pub fit: LogitFit,
}

impl PropensityModel {
    /// Score `table` and return it augmented with [`PROPENSITY_COL`].
    pub fn score(&self, table: &Table) -> Result<Table> {
        let covs: Vec<&str> = self.covariates.iter().map(String::as_str).collect();
        let x = DesignMatrix::from_table(table, &covs, true)?;
        let scores = self.fit.predict(&x)?;
        table.clone().with_column(PROPENSITY_COL, Column::Float(scores))
    }
}

/// Read `column` as a strict 0/1 indicator.
pub fn treatment_indicator(table: &Table, column: &str) -> Result<Vec<u8>> {
    table
        .i64_column(column)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            0 => Ok(0),
            1 => Ok(1),
            other => Err(Error::Validation(format!(
                "treatment column '{}' must be 0/1, found {} at row {}",
                column, other, i
            ))),
        })
        .collect()
}

/// Fit the propensity model on `table`.
pub fn fit_propensity_model(
    table: &Table,
    treatment: &str,
    covariates: &[&str],
    config: &LogitConfig,
) -> Result<PropensityModel> {
    if covariates.contains(&treatment) {
        return Err(Error::Validation(format!(
            "treatment column '{}' cannot also be a covariate",
            treatment
        )));
    }
    if table.is_empty() {
        return Err(Error::Validation("cannot fit a propensity model on an empty table".into()));
    }
    let y = treatment_indicator(table, treatment)?;
    let x = DesignMatrix::from_table(table, covariates, true)?;
    let fit = fit_logit(&x, &y, config)?;
    log::debug!(
        "propensity model: n={}, newton iterations={}, loglik={:.4}",
        fit.n_obs,
        fit.n_iter,
        fit.log_likelihood
    );
    Ok(PropensityModel {
        treatment: treatment.to_string(),
        covariates: covariates.iter().map(|c| c.to_string()).collect(),
        fit,
    })
}

/// Fit a logistic propensity model and append [`PROPENSITY_COL`] to a copy of `table`.
///
/// An empty table comes back with an empty score column.
pub fn estimate_propensity_score(
    table: &Table,
    treatment: &str,
    covariates: &[&str],
) -> Result<Table> {
    if table.is_empty() {
        return table.clone().with_column(PROPENSITY_COL, Column::Float(Vec::new()));
    }
    let model = fit_propensity_model(table, treatment, covariates, &LogitConfig::default())?;
    model.score(table)
}
