//! Nearest-neighbor matching on the logit propensity score.
//!
//! [`match_nearest_neighbor`] is a pure function of its inputs. [`CausalMatcher`]
//! wraps it with a fingerprint-keyed [`MatchCache`], so repeating a call with the
//! same table and settings reuses the earlier result while any change in the
//! inputs triggers a fresh match.
//!
//! Matching is with replacement: a control may serve several treated units.
//! Only the nearest control's distance is checked against the caliper; the
//! remaining `k - 1` neighbors are kept as found.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use mf_core::{Column, Error, Result, Role, Table};
use mf_prob::math::{logit_eps, nanmean, sample_std};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::effect::{self, RegressionSpec};
use crate::regression::OlsFit;

/// Column holding `ln((p + ε) / (1 - p + ε))` of the propensity score.
pub const LOGIT_COL: &str = "ps_logit";
/// Column grouping a treated row with its matched controls.
pub const MATCH_ID_COL: &str = "match_id";
/// Column holding the [`Role`] label of a matched row.
pub const ROLE_COL: &str = "role";

/// Matching settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Caliper in units of the pooled standard deviation of the logit score.
    pub caliper: f64,
    /// Controls emitted per accepted treated unit (at most the number of controls).
    pub n_neighbors: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { caliper: 0.2, n_neighbors: 1 }
    }
}

impl MatchConfig {
    fn validate(&self) -> Result<()> {
        if !self.caliper.is_finite() || self.caliper < 0.0 {
            return Err(Error::Validation(format!(
                "caliper must be finite and >= 0, got {}",
                self.caliper
            )));
        }
        if self.n_neighbors == 0 {
            return Err(Error::Validation("n_neighbors must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Counts and widths recorded by one matching pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MatchDiagnostics {
    /// Treated candidates (indicator == 1).
    pub n_treated: usize,
    /// Control candidates (indicator == 0).
    pub n_control: usize,
    /// Treated units that found a control within the caliper.
    pub n_matched: usize,
    /// Treated units dropped for lack of a control within the caliper.
    pub n_dropped: usize,
    /// Sample standard deviation (ddof = 1) of the logit score over treated and
    /// control rows. `None` when unknown (no matching pass on a non-empty table).
    pub pooled_std: Option<f64>,
    /// Absolute caliper on the logit scale (`caliper * pooled_std`). `None` when unknown.
    pub caliper_width: Option<f64>,
}

/// Matched-pairs table: selected rows plus their `match_id` and [`Role`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchedTable {
    rows: Table,
    match_ids: Vec<u64>,
    roles: Vec<Role>,
    diagnostics: MatchDiagnostics,
}

impl MatchedTable {
    /// Matched table with no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble from parts; `match_ids` and `roles` must be row-aligned with `rows`.
    pub fn from_parts(
        rows: Table,
        match_ids: Vec<u64>,
        roles: Vec<Role>,
        diagnostics: MatchDiagnostics,
    ) -> Result<Self> {
        if match_ids.len() != rows.n_rows() || roles.len() != rows.n_rows() {
            return Err(Error::Validation(format!(
                "matched table parts disagree: {} rows, {} match ids, {} roles",
                rows.n_rows(),
                match_ids.len(),
                roles.len()
            )));
        }
        Ok(Self { rows, match_ids, roles, diagnostics })
    }

    /// Rebuild from a flat table carrying `match_id` and `role` columns.
    ///
    /// Only what the rows carry is recovered: `n_treated` and `n_matched` count
    /// the matched treated units, while candidate counts and caliper widths of
    /// the original pass are unknown (`pooled_std`/`caliper_width` are `None`).
    pub fn from_table(table: &Table) -> Result<Self> {
        let match_ids = table
            .i64_column(MATCH_ID_COL)?
            .into_iter()
            .map(|id| {
                u64::try_from(id)
                    .map_err(|_| Error::Validation(format!("negative match id {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        let roles =
            table.str_column(ROLE_COL)?.iter().map(|r| Role::parse(r)).collect::<Result<_>>()?;
        let rows = Table::from_columns(
            table
                .iter()
                .filter(|(name, _)| *name != MATCH_ID_COL && *name != ROLE_COL)
                .map(|(name, col)| (name.to_string(), col.clone()))
                .collect(),
        )?;
        let mut out = Self::from_parts(rows, match_ids, roles, MatchDiagnostics::default())?;
        out.diagnostics.n_matched = out.n_pairs();
        out.diagnostics.n_treated = out.n_pairs();
        Ok(out)
    }

    /// Flat table with `match_id` (i64) and `role` (str) columns appended.
    pub fn to_table(&self) -> Result<Table> {
        let ids = self.match_ids.iter().map(|&id| id as i64).collect();
        self.rows
            .clone()
            .with_column(MATCH_ID_COL, Column::Int(ids))?
            .with_column(
                ROLE_COL,
                Column::Str(self.roles.iter().map(|r| r.as_str().to_string()).collect()),
            )
    }

    /// Matched rows without the bookkeeping columns.
    pub fn rows(&self) -> &Table {
        &self.rows
    }

    /// Match id per row.
    pub fn match_ids(&self) -> &[u64] {
        &self.match_ids
    }

    /// Role per row.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Diagnostics of the matching pass that produced this table.
    pub fn diagnostics(&self) -> &MatchDiagnostics {
        &self.diagnostics
    }

    /// Number of rows (treated plus control).
    pub fn n_rows(&self) -> usize {
        self.match_ids.len()
    }

    /// `true` when no pair was formed.
    pub fn is_empty(&self) -> bool {
        self.match_ids.is_empty()
    }

    /// Number of distinct match ids.
    pub fn n_pairs(&self) -> usize {
        self.match_ids.iter().collect::<HashSet<_>>().len()
    }

    /// Values of `column` for rows with the given role.
    pub fn group_values(&self, column: &str, role: Role) -> Result<Vec<f64>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.rows.f64_column(column)?;
        Ok(values.into_iter().zip(&self.roles).filter(|(_, r)| **r == role).map(|(v, _)| v).collect())
    }

    /// Per match id (ascending): treated value minus the mean control value.
    ///
    /// `NaN` marks a pair whose difference is undefined (missing treated value or
    /// no non-missing control value).
    pub fn paired_differences(&self, column: &str) -> Result<Vec<f64>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.rows.f64_column(column)?;
        let mut groups: BTreeMap<u64, (Option<f64>, Vec<f64>)> = BTreeMap::new();
        for ((&id, role), v) in self.match_ids.iter().zip(&self.roles).zip(values) {
            let entry = groups.entry(id).or_default();
            match role {
                Role::Treated => {
                    entry.0.get_or_insert(v);
                }
                Role::Control => entry.1.push(v),
            }
        }
        Ok(groups
            .into_values()
            .map(|(treated, controls)| match (treated, nanmean(controls)) {
                (Some(t), Some(c)) => t - c,
                _ => f64::NAN,
            })
            .collect())
    }
}

/// Up to `k` nearest controls of `target`, ordered by (distance, control position).
fn nearest_controls(target: f64, control_logits: &[f64], k: usize) -> Vec<(f64, usize)> {
    let mut dists: Vec<(f64, usize)> =
        control_logits.iter().enumerate().map(|(pos, &c)| ((target - c).abs(), pos)).collect();
    dists.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    dists.truncate(k);
    dists
}

/// Match each treated unit to its nearest control(s) on the logit score.
///
/// `ps_logit` is computed over every row of `table` before splitting. Rows whose
/// indicator is neither 0 nor 1 are ignored. A treated unit is accepted when its
/// nearest control lies within `caliper * sd(ps_logit)`, where the standard
/// deviation is taken over treated and control rows. Accepted units get
/// `match_id` = their position among treated rows; the rest are dropped. No
/// accepted unit yields an empty [`MatchedTable`].
///
/// Queries run as an order-preserving parallel map, so results do not depend on
/// the rayon pool size.
pub fn match_nearest_neighbor(
    table: &Table,
    treatment_col: &str,
    score_col: &str,
    config: &MatchConfig,
) -> Result<MatchedTable> {
    config.validate()?;
    if table.is_empty() {
        return Ok(MatchedTable::empty());
    }

    let logits: Vec<f64> = table.f64_column(score_col)?.into_iter().map(logit_eps).collect();
    let indicator = table.i64_column(treatment_col)?;
    let treated_idx: Vec<usize> = (0..indicator.len()).filter(|&i| indicator[i] == 1).collect();
    let control_idx: Vec<usize> = (0..indicator.len()).filter(|&i| indicator[i] == 0).collect();

    let pooled: Vec<f64> =
        (0..indicator.len()).filter(|&i| indicator[i] == 0 || indicator[i] == 1).map(|i| logits[i]).collect();
    let pooled_std = sample_std(&pooled);
    let caliper_width = config.caliper * pooled_std;

    let mut diagnostics = MatchDiagnostics {
        n_treated: treated_idx.len(),
        n_control: control_idx.len(),
        pooled_std: Some(pooled_std),
        caliper_width: Some(caliper_width),
        ..Default::default()
    };
    if treated_idx.is_empty() || control_idx.is_empty() {
        diagnostics.n_dropped = treated_idx.len();
        log::debug!(
            "matching skipped: {} treated, {} control candidates",
            diagnostics.n_treated,
            diagnostics.n_control
        );
        return Ok(MatchedTable { diagnostics, ..Default::default() });
    }

    let control_logits: Vec<f64> = control_idx.iter().map(|&i| logits[i]).collect();
    let k = config.n_neighbors.min(control_idx.len());
    let neighbors: Vec<Vec<(f64, usize)>> = treated_idx
        .par_iter()
        .map(|&t| nearest_controls(logits[t], &control_logits, k))
        .collect();

    let mut take = Vec::new();
    let mut match_ids = Vec::new();
    let mut roles = Vec::new();
    for (i, (&t, nbrs)) in treated_idx.iter().zip(&neighbors).enumerate() {
        // NaN distances and a NaN caliper both fail this comparison.
        let accepted = nbrs.first().is_some_and(|&(d, _)| d <= caliper_width);
        if !accepted {
            continue;
        }
        take.push(t);
        match_ids.push(i as u64);
        roles.push(Role::Treated);
        for &(_, pos) in nbrs {
            take.push(control_idx[pos]);
            match_ids.push(i as u64);
            roles.push(Role::Control);
        }
        diagnostics.n_matched += 1;
    }
    diagnostics.n_dropped = diagnostics.n_treated - diagnostics.n_matched;
    log::debug!(
        "matched {} of {} treated units (caliper width {:.4}, k={})",
        diagnostics.n_matched,
        diagnostics.n_treated,
        caliper_width,
        k
    );

    if take.is_empty() {
        return Ok(MatchedTable { diagnostics, ..Default::default() });
    }
    let rows = table.clone().with_column(LOGIT_COL, Column::Float(logits))?.take(&take)?;
    MatchedTable::from_parts(rows, match_ids, roles, diagnostics)
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Bounded FIFO cache of matching results keyed by input fingerprint.
#[derive(Debug, Clone)]
pub struct MatchCache {
    entries: HashMap<String, MatchedTable>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchCache {
    /// Entries kept by [`MatchCache::new`].
    pub const DEFAULT_CAPACITY: usize = 8;

    /// Empty cache with [`Self::DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Empty cache holding at most `capacity` results (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// SHA-256 key over the table contents and every matching argument.
    pub fn key(table: &Table, treatment_col: &str, score_col: &str, config: &MatchConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(table.fingerprint().as_bytes());
        hasher.update([0u8]);
        hasher.update(treatment_col.as_bytes());
        hasher.update([0u8]);
        hasher.update(score_col.as_bytes());
        hasher.update([0u8]);
        hasher.update((config.n_neighbors as u64).to_le_bytes());
        hasher.update(config.caliper.to_bits().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Cached result for `key`, computing and storing it with `f` on a miss.
    ///
    /// The oldest entry is evicted only after `f` succeeds; a failing `f` leaves
    /// the cache as it was.
    pub fn get_or_try_insert_with<F>(&mut self, key: String, f: F) -> Result<&MatchedTable>
    where
        F: FnOnce() -> Result<MatchedTable>,
    {
        if self.entries.contains_key(&key) {
            self.hits += 1;
            log::debug!("match cache: hit {}", &key[..12.min(key.len())]);
            return Ok(&self.entries[&key]);
        }

        self.misses += 1;
        let value = f()?;
        while self.entries.len() >= self.capacity {
            let Some(old) = self.order.pop_front() else { break };
            self.entries.remove(&old);
            log::debug!("match cache: evicted {}", &old[..12.min(old.len())]);
        }
        self.order.push_back(key.clone());
        Ok(self.entries.entry(key).or_insert(value))
    }

    /// Cached result for `key` without touching the hit counters.
    pub fn peek(&self, key: &str) -> Option<&MatchedTable> {
        self.entries.get(key)
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that ran the matcher.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Drop every cached result.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

// ---------------------------------------------------------------------------
// Stateful matcher
// ---------------------------------------------------------------------------

/// Matcher holding a caliper, a result cache and the most recent match.
#[derive(Debug, Clone, Default)]
pub struct CausalMatcher {
    config: MatchConfig,
    cache: MatchCache,
    last_key: Option<String>,
}

impl CausalMatcher {
    /// Matcher with caliper 0.2 and an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher with the given caliper.
    pub fn with_caliper(caliper: f64) -> Self {
        Self { config: MatchConfig { caliper, ..MatchConfig::default() }, ..Self::default() }
    }

    /// Configured caliper.
    pub fn caliper(&self) -> f64 {
        self.config.caliper
    }

    /// Result cache.
    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    /// Match `table` and remember the result as the current matched table.
    pub fn match_nearest_neighbor(
        &mut self,
        table: &Table,
        treatment_col: &str,
        score_col: &str,
        n_neighbors: usize,
    ) -> Result<&MatchedTable> {
        let config = MatchConfig { n_neighbors, ..self.config };
        let key = MatchCache::key(table, treatment_col, score_col, &config);
        self.cache.get_or_try_insert_with(key.clone(), || {
            match_nearest_neighbor(table, treatment_col, score_col, &config)
        })?;
        self.last_key = Some(key);
        self.matched().ok_or_else(|| Error::Computation("match cache lost its newest entry".into()))
    }

    /// Most recent matched table, if any match has been run.
    pub fn matched(&self) -> Option<&MatchedTable> {
        self.last_key.as_deref().and_then(|k| self.cache.peek(k))
    }

    /// Raw ATT on the current matched table. `None` when unset or empty.
    pub fn calculate_att(&self, outcome_col: &str) -> Result<Option<f64>> {
        match self.matched() {
            Some(m) => effect::calculate_att(m, outcome_col),
            None => Ok(None),
        }
    }

    /// Regression-adjusted effect on the current matched table. `None` when unset or empty.
    pub fn bias_adjustment(&self, spec: &RegressionSpec) -> Result<Option<OlsFit>> {
        match self.matched() {
            Some(m) => effect::bias_adjustment(m, spec),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mf_prob::math::sigmoid;

    /// Table whose propensity scores map back exactly onto the given logits.
    fn from_logits(treated: &[f64], control: &[f64]) -> Table {
        let mut ps = Vec::new();
        let mut t = Vec::new();
        for &l in treated {
            ps.push(sigmoid(l));
            t.push(1);
        }
        for &l in control {
            ps.push(sigmoid(l));
            t.push(0);
        }
        let n = ps.len();
        Table::from_columns(vec![
            ("unit", Column::Int((0..n as i64).collect())),
            ("treatment", Column::Int(t)),
            ("propensity_score", Column::Float(ps)),
            ("y", Column::Float((0..n).map(|i| i as f64).collect())),
        ])
        .unwrap()
    }

    fn run(table: &Table, caliper: f64, k: usize) -> MatchedTable {
        let cfg = MatchConfig { caliper, n_neighbors: k };
        match_nearest_neighbor(table, "treatment", "propensity_score", &cfg).unwrap()
    }

    #[test]
    fn test_two_pair_scenario() {
        let t = from_logits(&[0.5, 0.5, -3.0, 3.0], &[0.48, 0.52, -0.1, 0.1]);
        let m = run(&t, 0.25, 1);
        assert_eq!(m.n_pairs(), 2);
        assert_eq!(m.match_ids(), &[0, 0, 1, 1]);
        assert_eq!(m.roles(), &[Role::Treated, Role::Control, Role::Treated, Role::Control]);
        // 0.48 and 0.52 are equidistant from 0.5 up to rounding; either may win.
        let units = m.rows().i64_column("unit").unwrap();
        assert_eq!((units[0], units[2]), (0, 1));
        assert!([4, 5].contains(&units[1]) && [4, 5].contains(&units[3]));

        let d = m.diagnostics();
        assert_eq!((d.n_treated, d.n_control, d.n_matched, d.n_dropped), (4, 4, 2, 2));
        let pooled_std = d.pooled_std.unwrap();
        assert_relative_eq!(pooled_std, 1.626600310902642, epsilon = 1e-6);
        assert_relative_eq!(d.caliper_width.unwrap(), 0.25 * pooled_std, epsilon = 1e-12);
    }

    #[test]
    fn test_caliper_invariant_holds() {
        let treated: Vec<f64> = (0..20).map(|i| -2.0 + i as f64 * 0.23).collect();
        let control: Vec<f64> = (0..15).map(|i| -1.0 + i as f64 * 0.31).collect();
        let t = from_logits(&treated, &control);
        let m = run(&t, 0.1, 1);
        let width = m.diagnostics().caliper_width.unwrap();
        assert!(!m.is_empty());

        let logits = m.rows().f64_column(LOGIT_COL).unwrap();
        let mut by_id: BTreeMap<u64, Vec<(Role, f64)>> = BTreeMap::new();
        for ((&id, &r), l) in m.match_ids().iter().zip(m.roles()).zip(logits) {
            by_id.entry(id).or_default().push((r, l));
        }
        for rows in by_id.values() {
            // Pairing invariant: exactly one treated and one control per match id.
            assert_eq!(rows.len(), 2);
            assert_eq!(rows.iter().filter(|(r, _)| *r == Role::Treated).count(), 1);
            assert!((rows[0].1 - rows[1].1).abs() <= width + 1e-12);
        }
    }

    #[test]
    fn test_k_neighbors_caps_at_control_count() {
        let t = from_logits(&[0.0], &[0.1, -0.2]);
        let m = run(&t, 10.0, 5);
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.rows().i64_column("unit").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_nearest_is_checked_against_caliper() {
        // Second neighbor is far outside the caliper but still emitted.
        let t = from_logits(&[0.0, 5.0], &[0.01, 4.0, -5.0]);
        let m = run(&t, 0.01, 2);
        assert_eq!(m.n_pairs(), 1);
        assert_eq!(m.rows().i64_column("unit").unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let t = from_logits(&[3.0, 4.0], &[-3.0, -4.0]);
        let m = run(&t, 0.01, 1);
        assert!(m.is_empty());
        assert_eq!(m.n_pairs(), 0);
        assert_eq!(m.diagnostics().n_dropped, 2);

        let empty = run(&t.filter(&[false; 4]).unwrap(), 0.2, 1);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_one_sided_population() {
        let t = from_logits(&[0.1, 0.2], &[]);
        let m = run(&t, 0.2, 1);
        assert!(m.is_empty());
        assert_eq!(m.diagnostics().n_treated, 2);
    }

    #[test]
    fn test_invalid_config() {
        let t = from_logits(&[0.1], &[0.2]);
        let bad = MatchConfig { caliper: 0.2, n_neighbors: 0 };
        assert!(match_nearest_neighbor(&t, "treatment", "propensity_score", &bad).is_err());
        let bad = MatchConfig { caliper: f64::NAN, n_neighbors: 1 };
        assert!(match_nearest_neighbor(&t, "treatment", "propensity_score", &bad).is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let treated: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 / 25.0 - 2.0).collect();
        let control: Vec<f64> = (0..300).map(|i| ((i * 53) % 97) as f64 / 24.0 - 2.0).collect();
        let t = from_logits(&treated, &control);
        let cfg = MatchConfig { caliper: 0.05, n_neighbors: 2 };

        let single = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let many = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let a = single
            .install(|| match_nearest_neighbor(&t, "treatment", "propensity_score", &cfg))
            .unwrap();
        let b = many
            .install(|| match_nearest_neighbor(&t, "treatment", "propensity_score", &cfg))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_table_round_trip_through_flat_form() {
        let t = from_logits(&[0.5, 0.5, -3.0, 3.0], &[0.48, 0.52, -0.1, 0.1]);
        let m = run(&t, 0.25, 1);
        let flat = m.to_table().unwrap();
        assert_eq!(flat.i64_column(MATCH_ID_COL).unwrap(), vec![0, 0, 1, 1]);
        assert_eq!(flat.str_column(ROLE_COL).unwrap()[1], "Control");

        let back = MatchedTable::from_table(&flat).unwrap();
        assert_eq!(back.rows(), m.rows());
        assert_eq!(back.match_ids(), m.match_ids());
        assert_eq!(back.roles(), m.roles());

        let d = back.diagnostics();
        assert_eq!((d.n_treated, d.n_matched), (2, 2));
        assert_eq!(d.pooled_std, None);
        assert_eq!(d.caliper_width, None);
        assert!(m.diagnostics().caliper_width.is_some());
    }

    #[test]
    fn test_paired_differences_average_controls() {
        let rows = Table::from_columns(vec![("y", Column::Float(vec![10.0, 4.0, 6.0, 1.0, f64::NAN]))])
            .unwrap();
        let m = MatchedTable::from_parts(
            rows,
            vec![3, 3, 3, 7, 7],
            vec![Role::Treated, Role::Control, Role::Control, Role::Treated, Role::Control],
            MatchDiagnostics::default(),
        )
        .unwrap();
        let d = m.paired_differences("y").unwrap();
        assert_eq!(d.len(), 2);
        assert_relative_eq!(d[0], 5.0);
        assert!(d[1].is_nan());
        assert_eq!(m.group_values("y", Role::Treated).unwrap(), vec![10.0, 1.0]);
    }

    #[test]
    fn test_matcher_cache_reuses_and_refreshes() {
        let t = from_logits(&[0.5, 0.5, -3.0, 3.0], &[0.48, 0.52, -0.1, 0.1]);
        let mut matcher = CausalMatcher::with_caliper(0.25);
        assert!(matcher.matched().is_none());
        assert_eq!(matcher.calculate_att("y").unwrap(), None);

        let first =
            matcher.match_nearest_neighbor(&t, "treatment", "propensity_score", 1).unwrap().clone();
        let again =
            matcher.match_nearest_neighbor(&t, "treatment", "propensity_score", 1).unwrap().clone();
        assert_eq!(first, again);
        assert_eq!((matcher.cache().hits(), matcher.cache().misses()), (1, 1));

        // Different arguments must not return the stale result.
        let wider_rows =
            matcher.match_nearest_neighbor(&t, "treatment", "propensity_score", 2).unwrap().n_rows();
        assert_eq!(wider_rows, 6);
        assert_eq!(matcher.cache().misses(), 2);

        let subset = t.take(&[0, 4, 5]).unwrap();
        let sub = matcher
            .match_nearest_neighbor(&subset, "treatment", "propensity_score", 1)
            .unwrap()
            .clone();
        assert_eq!(sub.diagnostics().n_treated, 1);
        assert_eq!(matcher.matched().unwrap().diagnostics().n_treated, 1);
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = MatchCache::with_capacity(2);
        for key in ["a", "b", "c"] {
            cache.get_or_try_insert_with(key.to_string(), || Ok(MatchedTable::empty())).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_none());
        assert!(cache.peek("c").is_some());

        let err = cache.get_or_try_insert_with("d".into(), || Err(Error::Computation("boom".into())));
        assert!(err.is_err());
        assert!(cache.peek("d").is_none());
        assert!(cache.peek("b").is_some() && cache.peek("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_match_keeps_current_result() {
        let t = from_logits(&[0.5, 0.5, -3.0, 3.0], &[0.48, 0.52, -0.1, 0.1]);
        let mut matcher =
            CausalMatcher { cache: MatchCache::with_capacity(1), ..CausalMatcher::with_caliper(0.25) };
        let before =
            matcher.match_nearest_neighbor(&t, "treatment", "propensity_score", 1).unwrap().clone();
        let att = matcher.calculate_att("y").unwrap();
        assert!(att.is_some());

        assert!(matcher.match_nearest_neighbor(&t, "no_such_col", "propensity_score", 1).is_err());
        assert_eq!(matcher.matched(), Some(&before));
        assert_eq!(matcher.calculate_att("y").unwrap(), att);
        assert_eq!(matcher.cache().len(), 1);
    }
}
