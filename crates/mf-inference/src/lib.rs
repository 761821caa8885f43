//! # mf-inference
//!
//! Causal inference for marginal-force: propensity score matching with an
//! optional difference-in-differences outcome.
//!
//! Stages, in pipeline order:
//! - [`preprocess`]: panel merge, DiD deltas, quartile treatment assignment
//! - [`propensity`]: logistic propensity scores
//! - [`support`]: common-support trimming
//! - [`matching`]: caliper nearest-neighbor matching on the logit score
//! - [`effect`]: raw and regression-adjusted ATT
//! - [`sensitivity`]: placebo test and Rosenbaum bounds
//! - [`pipeline`]: orchestration and the serializable report
//!
//! ## Example
//!
//! ```no_run
//! use mf_inference::{AnalysisConfig, ExecutionContext, run_analysis};
//! # fn load() -> mf_core::Table { mf_core::Table::new() }
//! let panel = load();
//! let ctx = ExecutionContext::init(1)?;
//! let run = run_analysis(&panel, &AnalysisConfig::default(), &ctx)?;
//! println!("ATT = {:?}", run.report.att);
//! # Ok::<(), mf_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod effect;
pub mod matching;
pub mod pipeline;
pub mod preprocess;
pub mod propensity;
pub mod regression;
pub mod sensitivity;
pub mod support;

pub use effect::{RegressionSpec, bias_adjustment, calculate_att};
pub use matching::{
    CausalMatcher, MatchCache, MatchConfig, MatchDiagnostics, MatchedTable, match_nearest_neighbor,
};
pub use pipeline::{
    AnalysisConfig, AnalysisReport, AnalysisRun, Design, ExecutionContext, run_analysis,
};
pub use preprocess::{
    DidConfig, PreprocessConfig, binarize_treatment, difference_panel, preprocess_panel,
};
pub use propensity::{PROPENSITY_COL, PropensityModel, estimate_propensity_score};
pub use regression::{LogitConfig, LogitFit, OlsFit, fit_logit, fit_ols};
pub use sensitivity::{
    RosenbaumBound, RosenbaumSweep, calculate_rosenbaum_bounds, rosenbaum_sweep, run_placebo_test,
};
pub use support::{SupportSummary, trim_common_support};
