//! End-to-end analysis: propensity → support → matching → effects → sensitivity.

use mf_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};

use crate::effect::RegressionSpec;
use crate::matching::{CausalMatcher, MatchDiagnostics, MatchedTable};
use crate::propensity::{PROPENSITY_COL, fit_propensity_model};
use crate::regression::{LogitConfig, LogitFit, OlsFit};
use crate::sensitivity::{
    RosenbaumBound, RosenbaumSweep, calculate_rosenbaum_bounds, rosenbaum_sweep, run_placebo_test,
};
use crate::support::{SupportSummary, trim_common_support_with_summary};

/// Thread pool the pipeline runs in.
///
/// Owned by the caller and passed in explicitly; nothing is installed globally.
/// Without a pool, parallel sections use rayon's default pool.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pool: Option<rayon::ThreadPool>,
}

impl ExecutionContext {
    /// Build a dedicated pool with `threads` workers (`0` = no dedicated pool).
    pub fn init(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Ok(Self::default());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        log::debug!("execution context: {} worker threads", threads);
        Ok(Self { pool: Some(pool) })
    }

    /// Worker count of the dedicated pool, if any.
    pub fn threads(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.current_num_threads())
    }

    /// Run `f` inside the pool.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Tear down the pool, waiting for its workers to finish.
    pub fn shutdown(self) {
        if let Some(pool) = self.pool {
            log::debug!("execution context: shutting down {} workers", pool.current_num_threads());
            drop(pool);
        }
    }
}

/// Study design, decided by which outcome columns the panel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Design {
    /// Outcome is the 2015→2019 change (`delta_violent_crime`).
    DifferenceInDifferences,
    /// Outcome is the single-year level (`violent_crime_rate`).
    CrossSection,
}

impl Design {
    /// DiD when the panel has `delta_violent_crime`, otherwise cross-section.
    pub fn detect(panel: &Table) -> Self {
        if panel.has_column("delta_violent_crime") {
            Design::DifferenceInDifferences
        } else {
            Design::CrossSection
        }
    }

    /// Default outcome column.
    pub fn outcome(self) -> &'static str {
        match self {
            Design::DifferenceInDifferences => "delta_violent_crime",
            Design::CrossSection => "violent_crime_rate",
        }
    }

    /// Default placebo outcome column.
    pub fn placebo_outcome(self) -> &'static str {
        match self {
            Design::DifferenceInDifferences => "delta_property_crime",
            Design::CrossSection => "property_crime_rate",
        }
    }
}

/// Analysis settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Binary treatment column.
    #[serde(default = "default_treatment")]
    pub treatment: String,

    /// Propensity and regression covariates.
    #[serde(default = "default_covariates")]
    pub covariates: Vec<String>,

    /// Outcome column. Defaults to the detected design's outcome.
    #[serde(default)]
    pub outcome: Option<String>,

    /// Placebo outcome column. Defaults to the detected design's placebo.
    #[serde(default)]
    pub placebo_outcome: Option<String>,

    /// Common-support threshold τ.
    #[serde(default = "default_trim_threshold")]
    pub trim_threshold: f64,

    /// Caliper in standard deviations of the logit score.
    #[serde(default = "default_caliper")]
    pub caliper: f64,

    /// Controls per treated unit.
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,

    /// Hidden-bias odds for the headline Rosenbaum bound.
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Threshold the Rosenbaum bound must stay below to call the result robust.
    #[serde(default = "default_significance")]
    pub significance: f64,

    /// Γ grid for the critical-Γ sweep (empty = skip).
    #[serde(default = "default_gamma_grid")]
    pub gamma_grid: Vec<f64>,

    /// Worker threads (0 = rayon default). Use 1 for a sequential run.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Propensity model Newton settings.
    #[serde(default)]
    pub logit: LogitConfig,
}

fn default_treatment() -> String {
    "treatment".to_string()
}

fn default_covariates() -> Vec<String> {
    ["population_density", "median_income", "poverty_rate", "male_15_24"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_trim_threshold() -> f64 {
    crate::support::DEFAULT_TRIM_THRESHOLD
}

fn default_caliper() -> f64 {
    0.25
}

fn default_n_neighbors() -> usize {
    1
}

fn default_gamma() -> f64 {
    1.5
}

fn default_significance() -> f64 {
    0.10
}

fn default_gamma_grid() -> Vec<f64> {
    vec![1.0, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0]
}

fn default_threads() -> usize {
    1
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            treatment: default_treatment(),
            covariates: default_covariates(),
            outcome: None,
            placebo_outcome: None,
            trim_threshold: default_trim_threshold(),
            caliper: default_caliper(),
            n_neighbors: default_n_neighbors(),
            gamma: default_gamma(),
            significance: default_significance(),
            gamma_grid: default_gamma_grid(),
            threads: default_threads(),
            logit: LogitConfig::default(),
        }
    }
}

/// Structured result of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Rows in the input panel.
    pub n_input_rows: usize,
    /// Rows dropped for a missing covariate before scoring.
    pub n_incomplete_rows: usize,
    /// Detected study design.
    pub design: Design,
    /// Outcome column analyzed.
    pub outcome: String,
    /// Placebo outcome actually used (`None` when absent from the panel).
    pub placebo_outcome: Option<String>,
    /// Covariates used for scoring and adjustment.
    pub covariates: Vec<String>,
    /// Fitted propensity model (`None` for an empty sample).
    pub propensity_model: Option<LogitFit>,
    /// Common-support trimming counts.
    pub support: SupportSummary,
    /// Treated units on common support.
    pub n_treated: usize,
    /// Control units on common support.
    pub n_control: usize,
    /// Distinct match ids.
    pub matched_pairs: usize,
    /// Matching pass counts and caliper width.
    pub match_diagnostics: MatchDiagnostics,
    /// Raw ATT from matched pairs.
    pub att: Option<f64>,
    /// Bias-adjustment formula.
    pub regression_formula: String,
    /// Bias-adjustment OLS fit.
    pub regression: Option<OlsFit>,
    /// Why the bias-adjustment fit is missing when the regression step failed.
    pub regression_error: Option<String>,
    /// Treatment coefficient of the bias-adjustment regression.
    pub adjusted_att: Option<f64>,
    /// Placebo treated-minus-control difference.
    pub placebo: Option<f64>,
    /// Rosenbaum bound at the configured Γ.
    pub rosenbaum: Option<RosenbaumBound>,
    /// Bounds over the Γ grid with the critical Γ.
    pub rosenbaum_sweep: Option<RosenbaumSweep>,
    /// Rosenbaum bound at `gamma` below `significance`.
    pub robust_to_hidden_bias: Option<bool>,
}

/// Report plus the matched sample it was computed from.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    /// Serializable summary.
    pub report: AnalysisReport,
    /// Matched pairs behind the estimates.
    pub matched: MatchedTable,
}

fn count_treatment(table: &Table, treatment: &str, value: i64) -> Result<usize> {
    if table.is_empty() {
        return Ok(0);
    }
    Ok(table.i64_column(treatment)?.into_iter().filter(|&v| v == value).count())
}

/// Run every stage on `panel` inside `ctx`.
///
/// An empty panel, or one where no treated unit finds a match, yields a report
/// with `matched_pairs = 0` and no estimates rather than an error.
pub fn run_analysis(
    panel: &Table,
    config: &AnalysisConfig,
    ctx: &ExecutionContext,
) -> Result<AnalysisRun> {
    ctx.run(|| analyze(panel, config))
}

fn analyze(panel: &Table, config: &AnalysisConfig) -> Result<AnalysisRun> {
    let design = Design::detect(panel);
    let outcome = config.outcome.clone().unwrap_or_else(|| design.outcome().to_string());
    let placebo_candidate =
        config.placebo_outcome.clone().unwrap_or_else(|| design.placebo_outcome().to_string());
    let placebo_outcome = panel.has_column(&placebo_candidate).then_some(placebo_candidate);
    let covariates: Vec<&str> = config.covariates.iter().map(String::as_str).collect();
    let treatment = config.treatment.as_str();
    let spec = RegressionSpec::new(&outcome, treatment, &covariates);

    log::info!("analysis: design={:?}, outcome={}, n={}", design, outcome, panel.n_rows());

    let sample = if panel.is_empty() { panel.clone() } else { panel.drop_missing(&covariates)? };
    let n_incomplete_rows = panel.n_rows() - sample.n_rows();
    if n_incomplete_rows > 0 {
        log::warn!("dropped {} rows with a missing covariate", n_incomplete_rows);
    }

    let (scored, propensity_model) = if sample.is_empty() {
        (sample.clone().with_column(PROPENSITY_COL, mf_core::Column::Float(Vec::new()))?, None)
    } else {
        let model = fit_propensity_model(&sample, treatment, &covariates, &config.logit)?;
        (model.score(&sample)?, Some(model.fit))
    };

    let (trimmed, support) = trim_common_support_with_summary(&scored, config.trim_threshold)?;
    let n_treated = count_treatment(&trimmed, treatment, 1)?;
    let n_control = count_treatment(&trimmed, treatment, 0)?;

    let mut matcher = CausalMatcher::with_caliper(config.caliper);
    let matched = matcher
        .match_nearest_neighbor(&trimmed, treatment, PROPENSITY_COL, config.n_neighbors)?
        .clone();

    let mut report = AnalysisReport {
        n_input_rows: panel.n_rows(),
        n_incomplete_rows,
        design,
        outcome: outcome.clone(),
        placebo_outcome: placebo_outcome.clone(),
        covariates: config.covariates.clone(),
        propensity_model,
        support,
        n_treated,
        n_control,
        matched_pairs: matched.n_pairs(),
        match_diagnostics: *matched.diagnostics(),
        att: None,
        regression_formula: spec.formula(),
        regression: None,
        regression_error: None,
        adjusted_att: None,
        placebo: None,
        rosenbaum: None,
        rosenbaum_sweep: None,
        robust_to_hidden_bias: None,
    };

    if matched.is_empty() {
        log::warn!("no treated unit matched within the caliper; skipping effect estimation");
        return Ok(AnalysisRun { report, matched });
    }

    report.att = matcher.calculate_att(&outcome)?;
    match matcher.bias_adjustment(&spec) {
        Ok(fit) => report.regression = fit,
        Err(e) => {
            log::warn!("bias adjustment failed for {}: {}", spec, e);
            report.regression_error = Some(e.to_string());
        }
    }
    report.adjusted_att = report.regression.as_ref().and_then(|fit| fit.estimate(treatment));
    report.placebo = match &placebo_outcome {
        Some(col) => run_placebo_test(&matched, col)?,
        None => None,
    };

    let bound = calculate_rosenbaum_bounds(&matched, &outcome, config.gamma)?;
    report.robust_to_hidden_bias = bound.p_value.map(|p| p < config.significance);
    report.rosenbaum = Some(bound);
    if !config.gamma_grid.is_empty() {
        report.rosenbaum_sweep =
            Some(rosenbaum_sweep(&matched, &outcome, &config.gamma_grid, config.significance)?);
    }

    log::info!(
        "analysis done: {} pairs, ATT={:?}, adjusted={:?}",
        report.matched_pairs,
        report.att,
        report.adjusted_att
    );
    Ok(AnalysisRun { report, matched })
}
