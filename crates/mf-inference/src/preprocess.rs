//! Panel preparation: merging, difference-in-differences deltas and quartile
//! treatment assignment.
//!
//! Inputs are already-normalized flat tables keyed by `city` and `year`.

use std::collections::HashMap;

use mf_core::{Column, Error, Result, Table};
use serde::{Deserialize, Serialize};

/// Binary treatment column written by [`binarize_treatment`].
pub const TREATMENT_COL: &str = "treatment";
/// City identifier column.
pub const CITY_COL: &str = "city";
/// Observation year column.
pub const YEAR_COL: &str = "year";

/// Quantile with linear interpolation between order statistics (`h = (n - 1) q`).
///
/// `NaN` values are ignored. `None` when no value remains or `q` is outside `[0, 1]`.
pub fn quantile_linear(values: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let h = (v.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(v[lo] + (h - lo as f64) * (v[hi] - v[lo]))
}

/// Top versus bottom quartile of `column`: `>= Q3` → 1, `<= Q1` → 0.
///
/// Middle-quartile rows (and rows with a missing value) are removed. The
/// result carries an integer [`TREATMENT_COL`].
pub fn binarize_treatment(table: &Table, column: &str) -> Result<Table> {
    let values = table.f64_column(column)?;
    let labels: Vec<i64> = match (quantile_linear(&values, 0.25), quantile_linear(&values, 0.75))
    {
        (Some(q1), Some(q3)) => values
            .iter()
            .map(|&v| {
                if v >= q3 {
                    1
                } else if v <= q1 {
                    0
                } else {
                    -1
                }
            })
            .collect(),
        _ => vec![-1; values.len()],
    };
    let keep: Vec<bool> = labels.iter().map(|&l| l != -1).collect();
    let labelled = table.clone().with_column(TREATMENT_COL, Column::Int(labels))?;
    let out = labelled.filter(&keep)?;
    log::debug!(
        "binarized '{}': kept {} of {} rows",
        column,
        out.n_rows(),
        table.n_rows()
    );
    Ok(out)
}

/// One `target = value(end_year) - value(base_year)` delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSpec {
    /// Column differenced across years.
    pub source: String,
    /// Output column name.
    pub target: String,
}

impl DeltaSpec {
    /// `source` differenced into `target`.
    pub fn new(source: &str, target: &str) -> Self {
        Self { source: source.to_string(), target: target.to_string() }
    }
}

/// Difference-in-differences panel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DidConfig {
    /// Pre-period year.
    pub base_year: i64,
    /// Post-period year; its rows carry the deltas.
    pub end_year: i64,
    /// Deltas to compute. Sources absent from the panel are skipped.
    pub deltas: Vec<DeltaSpec>,
}

impl Default for DidConfig {
    fn default() -> Self {
        Self {
            base_year: 2015,
            end_year: 2019,
            deltas: vec![
                DeltaSpec::new("violent_crime_rate", "delta_violent_crime"),
                DeltaSpec::new("property_crime_rate", "delta_property_crime"),
            ],
        }
    }
}

/// End-year rows of cities observed exactly once in each of the two years,
/// augmented with the configured deltas.
///
/// Cities missing a year (or observed more than once in a year) are dropped.
/// Output rows follow the panel order of the end-year rows.
pub fn difference_panel(panel: &Table, config: &DidConfig) -> Result<Table> {
    if config.base_year == config.end_year {
        return Err(Error::Validation("base_year and end_year must differ".into()));
    }
    let cities = panel.column(CITY_COL)?;
    let years = panel.i64_column(YEAR_COL)?;
    let city_key = |i: usize| -> String {
        match cities {
            Column::Str(v) => v[i].clone(),
            Column::Int(v) => v[i].to_string(),
            Column::Float(v) => v[i].to_string(),
        }
    };

    // city -> (base rows, end rows)
    let mut rows: HashMap<String, (Vec<usize>, Vec<usize>)> = HashMap::new();
    for (i, &year) in years.iter().enumerate() {
        if year == config.base_year {
            rows.entry(city_key(i)).or_default().0.push(i);
        } else if year == config.end_year {
            rows.entry(city_key(i)).or_default().1.push(i);
        }
    }

    let mut base_rows = Vec::new();
    let mut end_rows = Vec::new();
    for (i, &year) in years.iter().enumerate() {
        if year != config.end_year {
            continue;
        }
        if let Some((base, end)) = rows.get(&city_key(i)) {
            if base.len() == 1 && end.len() == 1 {
                base_rows.push(base[0]);
                end_rows.push(i);
            }
        }
    }

    let mut out = panel.take(&end_rows)?;
    for delta in &config.deltas {
        if !panel.has_column(&delta.source) {
            log::warn!("DiD: column '{}' not in panel; '{}' skipped", delta.source, delta.target);
            continue;
        }
        let values = panel.f64_column(&delta.source)?;
        let diffs: Vec<f64> =
            base_rows.iter().zip(&end_rows).map(|(&b, &e)| values[e] - values[b]).collect();
        out = out.with_column(delta.target.clone(), Column::Float(diffs))?;
    }
    log::debug!(
        "DiD {}→{}: {} cities observed in both years",
        config.base_year,
        config.end_year,
        end_rows.len()
    );
    Ok(out)
}

/// Settings for [`preprocess_panel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Difference-in-differences years and deltas.
    pub did: DidConfig,
    /// Continuous column binarized into [`TREATMENT_COL`].
    pub spending_col: String,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { did: DidConfig::default(), spending_col: "police_spending".to_string() }
    }
}

/// Build the analysis panel from finance, crime and demographic tables.
///
/// 1. finance ⋈ crime on (city, year);
/// 2. DiD deltas between the configured years;
/// 3. ⋈ demographics on (city, year);
/// 4. quartile treatment assignment on the spending column.
///
/// With no city spanning both years the cross-section is used instead, with a
/// zero violent-crime delta. If that merge lacks `violent_crime_rate` an empty
/// table is returned.
pub fn preprocess_panel(
    fisc: &Table,
    cius: &Table,
    acs: &Table,
    config: &PreprocessConfig,
) -> Result<Table> {
    let keys = [CITY_COL, YEAR_COL];
    let finance_crime = fisc.inner_join(cius, &keys)?;
    let panel = difference_panel(&finance_crime, &config.did)?;

    let merged = if panel.is_empty() {
        log::warn!(
            "no city observed in both {} and {}; falling back to the cross-section",
            config.did.base_year,
            config.did.end_year
        );
        let cross = finance_crime.inner_join(acs, &keys)?;
        if !cross.has_column("violent_crime_rate") {
            return Ok(Table::new());
        }
        let zeros = Column::Float(vec![0.0; cross.n_rows()]);
        cross.with_column("delta_violent_crime", zeros)?
    } else {
        panel.inner_join(acs, &keys)?
    };

    binarize_treatment(&merged, &config.spending_col)
}
