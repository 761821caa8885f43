//! Regression fits used by the propensity and effect stages.
//!
//! - [`fit_ols`]: least squares via the SVD pseudo-inverse, classical
//!   (homoskedastic) standard errors and Student-t coefficient tests.
//! - [`fit_logit`]: Newton–Raphson maximum likelihood for the logit model, no
//!   regularization. Failure to converge is an error, never a silent `NaN`.

use mf_core::{Error, Result, Table};
use mf_prob::math::{log1pexp, sigmoid};
use mf_prob::student_t;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Name given to the constant column when an intercept is requested.
pub const INTERCEPT: &str = "Intercept";

/// Dense row-major design matrix with named columns.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    n: usize,
    p: usize,
    data: Vec<f64>, // length n*p, row-major
    names: Vec<String>,
}

impl DesignMatrix {
    /// Build a design matrix from numeric table columns.
    ///
    /// With `intercept = true` a constant column named [`INTERCEPT`] is placed first.
    /// Every value must be finite; callers drop incomplete rows beforehand.
    pub fn from_table(table: &Table, columns: &[&str], intercept: bool) -> Result<Self> {
        let n = table.n_rows();
        let cols: Vec<Vec<f64>> =
            columns.iter().map(|c| table.f64_column(c)).collect::<Result<_>>()?;

        let mut names = Vec::with_capacity(columns.len() + 1);
        if intercept {
            names.push(INTERCEPT.to_string());
        }
        for (name, col) in columns.iter().zip(&cols) {
            if let Some(i) = col.iter().position(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "column '{}' has a missing or non-finite value at row {}",
                    name, i
                )));
            }
            names.push(name.to_string());
        }

        let p = names.len();
        if p == 0 {
            return Err(Error::Validation("design matrix needs at least 1 column".to_string()));
        }
        let mut data = Vec::with_capacity(n * p);
        for i in 0..n {
            if intercept {
                data.push(1.0);
            }
            for col in &cols {
                data.push(col[i]);
            }
        }
        Ok(Self { n, p, data, names })
    }

    /// Number of observations.
    pub fn n_rows(&self) -> usize {
        self.n
    }

    /// Number of regressors (including the intercept, if any).
    pub fn n_cols(&self) -> usize {
        self.p
    }

    /// Regressor names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn has_intercept(&self) -> bool {
        self.names.first().is_some_and(|n| n == INTERCEPT)
    }

    fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n, self.p, &self.data)
    }
}

// ---------------------------------------------------------------------------
// OLS
// ---------------------------------------------------------------------------

/// One row of a coefficient table.
#[derive(Debug, Clone, Serialize)]
pub struct CoefficientRow {
    /// Regressor name.
    pub name: String,
    /// Point estimate.
    pub estimate: f64,
    /// Classical standard error.
    pub std_error: f64,
    /// t statistic (estimate / std_error).
    pub t_value: f64,
    /// Two-sided p-value from Student-t with `df_resid` degrees of freedom.
    pub p_value: f64,
    /// 95% CI lower bound.
    pub ci_lower: f64,
    /// 95% CI upper bound.
    pub ci_upper: f64,
}

/// Result of an ordinary-least-squares fit.
#[derive(Debug, Clone, Serialize)]
pub struct OlsFit {
    /// Coefficient table, in design-matrix column order.
    pub coefficients: Vec<CoefficientRow>,
    /// Number of observations used.
    pub n_obs: usize,
    /// Numerical rank of the design matrix.
    pub rank: usize,
    /// Residual degrees of freedom (`n - rank`).
    pub df_resid: usize,
    /// Residual sum of squares.
    pub rss: f64,
    /// Residual standard error.
    pub sigma: f64,
    /// Coefficient of determination (centered when an intercept is present).
    pub r_squared: f64,
    /// Adjusted R².
    pub adj_r_squared: f64,
}

impl OlsFit {
    /// Coefficient row for `name`.
    pub fn coefficient(&self, name: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// Point estimate for `name`.
    pub fn estimate(&self, name: &str) -> Option<f64> {
        self.coefficient(name).map(|c| c.estimate)
    }
}

/// Least squares through the SVD pseudo-inverse of `X`.
///
/// A rank-deficient design still yields a fit: the minimum-norm solution is
/// returned, `rank` records the numerical rank, and the residual degrees of
/// freedom are `n - rank`. Coefficients of aliased columns get standard errors
/// from the pseudo-inverse of `X^T X`, which are zero for an all-zero column.
pub fn fit_ols(x: &DesignMatrix, y: &[f64]) -> Result<OlsFit> {
    if x.n == 0 {
        return Err(Error::Validation("OLS requires at least 1 observation".to_string()));
    }
    if y.len() != x.n {
        return Err(Error::Validation(format!(
            "y has wrong length: expected n={}, got {}",
            x.n,
            y.len()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("y must contain only finite values".to_string()));
    }

    let x_mat = x.to_matrix();
    let y_vec = DVector::from_column_slice(y);

    let svd = x_mat.clone().svd(true, true);
    let s_max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let tol = s_max * x.n.max(x.p) as f64 * f64::EPSILON;
    let rank = svd.rank(tol);
    if rank < x.p {
        log::warn!("OLS: design has rank {} < {} columns; using the pseudo-inverse", rank, x.p);
    }
    let x_pinv = svd.pseudo_inverse(tol).map_err(|e| Error::Computation(format!("OLS: {e}")))?;
    let beta = &x_pinv * &y_vec;
    // (X^T X)^+ = X^+ (X^+)^T
    let xtx_pinv = &x_pinv * x_pinv.transpose();

    let resid = &y_vec - &x_mat * &beta;
    let rss: f64 = resid.iter().map(|r| r * r).sum();

    let df_resid = x.n.saturating_sub(rank);
    let dof = df_resid as f64;
    let sigma2 = if df_resid > 0 { rss / dof } else { f64::NAN };
    let t_crit = if df_resid > 0 { student_t::quantile(0.975, dof)? } else { f64::NAN };

    let mut coefficients = Vec::with_capacity(x.p);
    for (j, name) in x.names.iter().enumerate() {
        let estimate = beta[j];
        let std_error = (sigma2 * xtx_pinv[(j, j)].max(0.0)).sqrt();
        let t_value = estimate / std_error;
        let p_value = if df_resid > 0 { student_t::two_sided_p(t_value, dof)? } else { f64::NAN };
        coefficients.push(CoefficientRow {
            name: name.clone(),
            estimate,
            std_error,
            t_value,
            p_value,
            ci_lower: estimate - t_crit * std_error,
            ci_upper: estimate + t_crit * std_error,
        });
    }

    let tss: f64 = if x.has_intercept() {
        let mean = y.iter().sum::<f64>() / x.n as f64;
        y.iter().map(|v| (v - mean) * (v - mean)).sum()
    } else {
        y.iter().map(|v| v * v).sum()
    };
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };
    let k_const = if x.has_intercept() { 1.0 } else { 0.0 };
    let adj_r_squared = if df_resid > 0 {
        1.0 - (x.n as f64 - k_const) / dof * (1.0 - r_squared)
    } else {
        f64::NAN
    };

    Ok(OlsFit {
        coefficients,
        n_obs: x.n,
        rank,
        df_resid,
        rss,
        sigma: sigma2.sqrt(),
        r_squared,
        adj_r_squared,
    })
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

/// Newton–Raphson settings for [`fit_logit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogitConfig {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the largest absolute parameter step.
    pub tol: f64,
}

impl Default for LogitConfig {
    fn default() -> Self {
        Self { max_iter: 35, tol: 1e-8 }
    }
}

/// Converged logistic regression.
#[derive(Debug, Clone, Serialize)]
pub struct LogitFit {
    /// Regressor names (design-matrix order).
    pub names: Vec<String>,
    /// Maximum-likelihood coefficients.
    pub coefficients: Vec<f64>,
    /// Standard errors from the inverse observed information. `NaN` if not invertible.
    pub std_errors: Vec<f64>,
    /// Log-likelihood at the optimum.
    pub log_likelihood: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Newton iterations used.
    pub n_iter: usize,
}

impl LogitFit {
    /// Linear predictor `X beta` for a design with the same columns.
    pub fn linear_predictor(&self, x: &DesignMatrix) -> Result<Vec<f64>> {
        if x.names != self.names {
            return Err(Error::Validation(format!(
                "design columns {:?} do not match fitted columns {:?}",
                x.names, self.names
            )));
        }
        Ok((0..x.n)
            .map(|i| {
                let start = i * x.p;
                x.data[start..start + x.p]
                    .iter()
                    .zip(&self.coefficients)
                    .map(|(&xi, &bi)| xi * bi)
                    .sum()
            })
            .collect())
    }

    /// Fitted probabilities `sigmoid(X beta)`.
    pub fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>> {
        Ok(self.linear_predictor(x)?.into_iter().map(sigmoid).collect())
    }
}

/// `X^T diag(mu (1 - mu)) X`, the observed information of the logit model.
fn information(x: &DMatrix<f64>, mu: &DVector<f64>) -> DMatrix<f64> {
    let xw = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] * mu[i] * (1.0 - mu[i]));
    x.transpose() * xw
}

fn solve_newton_step(hess: &DMatrix<f64>, grad: &DVector<f64>) -> Option<DVector<f64>> {
    hess.clone().cholesky().map(|c| c.solve(grad)).or_else(|| hess.clone().lu().solve(grad))
}

/// Fitted probabilities reproduce the 0/1 response (numpy `allclose` tolerances).
fn perfectly_predicted(mu: &DVector<f64>, y: &[u8]) -> bool {
    mu.iter().zip(y).all(|(&m, &yi)| {
        let target = yi as f64;
        (m - target).abs() <= 1e-8 + 1e-5 * target
    })
}

/// Maximum-likelihood logistic regression of binary `y` on `x` by Newton–Raphson.
///
/// Starts from zero. Converged when every parameter step is below `config.tol`.
/// Errors (as [`Error::Fit`]) on non-convergence, singular information,
/// non-finite iterates and perfect separation.
pub fn fit_logit(x: &DesignMatrix, y: &[u8], config: &LogitConfig) -> Result<LogitFit> {
    if x.n == 0 {
        return Err(Error::Validation("logit requires at least 1 observation".to_string()));
    }
    if y.len() != x.n {
        return Err(Error::Validation(format!(
            "y has wrong length: expected n={}, got {}",
            x.n,
            y.len()
        )));
    }
    if y.iter().any(|&v| v > 1) {
        return Err(Error::Validation("y must contain only 0/1 values".to_string()));
    }
    if config.max_iter == 0 || !(config.tol > 0.0) {
        return Err(Error::Validation(format!(
            "invalid Newton settings: max_iter={}, tol={}",
            config.max_iter, config.tol
        )));
    }

    let x_mat = x.to_matrix();
    let y_vec = DVector::from_iterator(x.n, y.iter().map(|&v| v as f64));
    let mut beta = DVector::<f64>::zeros(x.p);

    for iter in 1..=config.max_iter {
        let mu = (&x_mat * &beta).map(sigmoid);
        let grad = x_mat.transpose() * (&y_vec - &mu);
        let hess = information(&x_mat, &mu);
        let step = solve_newton_step(&hess, &grad).ok_or_else(|| {
            Error::Fit(format!("singular information matrix at Newton iteration {}", iter))
        })?;
        beta += &step;

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(Error::Fit(format!("non-finite coefficients at Newton iteration {}", iter)));
        }
        let mu_next = (&x_mat * &beta).map(sigmoid);
        if perfectly_predicted(&mu_next, y) {
            return Err(Error::Fit(
                "perfect separation: the response is perfectly predicted by the regressors"
                    .to_string(),
            ));
        }

        let max_step = step.amax();
        log::debug!("logit newton iter {}: max |step| = {:.3e}", iter, max_step);
        if max_step < config.tol {
            let eta = &x_mat * &beta;
            let log_likelihood: f64 =
                eta.iter().zip(y).map(|(&e, &yi)| (yi as f64) * e - log1pexp(e)).sum();
            let cov = information(&x_mat, &mu_next).try_inverse();
            let std_errors = match cov {
                Some(c) => (0..x.p).map(|j| c[(j, j)].sqrt()).collect(),
                None => {
                    log::warn!("logit information matrix not invertible; standard errors unavailable");
                    vec![f64::NAN; x.p]
                }
            };
            return Ok(LogitFit {
                names: x.names.clone(),
                coefficients: beta.iter().copied().collect(),
                std_errors,
                log_likelihood,
                n_obs: x.n,
                n_iter: iter,
            });
        }
    }

    Err(Error::Fit(format!(
        "logistic regression did not converge in {} Newton iterations",
        config.max_iter
    )))
}
