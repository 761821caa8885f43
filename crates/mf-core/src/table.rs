//! Columnar in-memory table passed between pipeline stages.
//!
//! Tables have value semantics: every transformation (`with_column`, `filter`,
//! `take`, `inner_join`) returns a new table and leaves its input untouched.
//! Missing numeric values are represented as `NaN`.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Separator used when composing multi-column join keys.
const KEY_SEP: char = '\u{1f}';

/// A single named column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// 64-bit floats (`NaN` = missing).
    Float(Vec<f64>),
    /// 64-bit integers (years, indicators, ids).
    Int(Vec<i64>),
    /// UTF-8 strings (identifiers).
    Str(Vec<String>),
}

impl Column {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    /// `true` if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name for diagnostics.
    pub fn dtype(&self) -> &'static str {
        match self {
            Column::Float(_) => "f64",
            Column::Int(_) => "i64",
            Column::Str(_) => "str",
        }
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Int(v) => Column::Int(indices.iter().map(|&i| v[i]).collect()),
            Column::Str(v) => Column::Str(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Canonical string form of row `i`, used for join keys.
    ///
    /// Integral floats render like integers so that `2019` and `2019.0` join.
    fn key_at(&self, i: usize) -> String {
        match self {
            Column::Float(v) => {
                let x = v[i];
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e15 {
                    format!("{}", x as i64)
                } else {
                    format!("{}", x)
                }
            }
            Column::Int(v) => v[i].to_string(),
            Column::Str(v) => v[i].clone(),
        }
    }

    fn is_missing(&self, i: usize) -> bool {
        match self {
            Column::Float(v) => v[i].is_nan(),
            Column::Int(_) => false,
            Column::Str(v) => v[i].is_empty(),
        }
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Column::Float(v) => {
                hasher.update([0u8]);
                for x in v {
                    hasher.update(x.to_bits().to_le_bytes());
                }
            }
            Column::Int(v) => {
                hasher.update([1u8]);
                for x in v {
                    hasher.update(x.to_le_bytes());
                }
            }
            Column::Str(v) => {
                hasher.update([2u8]);
                for s in v {
                    hasher.update(s.as_bytes());
                    hasher.update([0xffu8]);
                }
            }
        }
    }
}

/// Ordered collection of equally long named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Empty table (no columns, no rows).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, column)` pairs.
    ///
    /// All columns must have the same length and names must be unique.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        let mut table = Table::new();
        for (i, (name, col)) in columns.into_iter().enumerate() {
            let name = name.into();
            if table.has_column(&name) {
                return Err(Error::Validation(format!("duplicate column name '{}'", name)));
            }
            if i > 0 && col.len() != table.n_rows {
                return Err(Error::Validation(format!(
                    "column '{}' has length {}, expected {}",
                    name,
                    col.len(),
                    table.n_rows
                )));
            }
            table.n_rows = col.len();
            table.names.push(name);
            table.columns.push(col);
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// `true` when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// `true` if a column named `name` exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Iterate `(name, column)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Numeric column as `f64` (integers are widened).
    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        match self.column(name)? {
            Column::Float(v) => Ok(v.clone()),
            Column::Int(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Column::Str(_) => Err(Error::Validation(format!(
                "column '{}' is a string column, expected numeric",
                name
            ))),
        }
    }

    /// Integer column. Float columns are accepted when every value is integral.
    pub fn i64_column(&self, name: &str) -> Result<Vec<i64>> {
        match self.column(name)? {
            Column::Int(v) => Ok(v.clone()),
            Column::Float(v) => v
                .iter()
                .map(|&x| {
                    if x.is_finite() && x.fract() == 0.0 {
                        Ok(x as i64)
                    } else {
                        Err(Error::Validation(format!(
                            "column '{}' contains non-integral value {}",
                            name, x
                        )))
                    }
                })
                .collect(),
            Column::Str(_) => Err(Error::Validation(format!(
                "column '{}' is a string column, expected integer",
                name
            ))),
        }
    }

    /// String column.
    pub fn str_column(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Str(v) => Ok(v),
            other => Err(Error::Validation(format!(
                "column '{}' has type {}, expected str",
                name,
                other.dtype()
            ))),
        }
    }

    /// Return a new table with `column` added (or replacing an existing column of the same name).
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        let name = name.into();
        if self.n_cols() > 0 && column.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column '{}' has length {}, expected {}",
                name,
                column.len(),
                self.n_rows
            )));
        }
        self.n_rows = column.len();
        match self.position(&name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(self)
    }

    /// Rows selected by `indices`, in the given order (repeats allowed).
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows) {
            return Err(Error::Validation(format!(
                "row index {} out of bounds for table with {} rows",
                bad, self.n_rows
            )));
        }
        Ok(Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            n_rows: indices.len(),
        })
    }

    /// Rows where `mask` is `true`.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "mask has length {}, expected {}",
                mask.len(),
                self.n_rows
            )));
        }
        let indices: Vec<usize> =
            mask.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect();
        self.take(&indices)
    }

    /// Drop rows with a missing value (`NaN` / empty string) in any of `columns`.
    pub fn drop_missing(&self, columns: &[&str]) -> Result<Self> {
        let cols: Vec<&Column> = columns.iter().map(|c| self.column(c)).collect::<Result<_>>()?;
        let mask: Vec<bool> =
            (0..self.n_rows).map(|i| cols.iter().all(|c| !c.is_missing(i))).collect();
        self.filter(&mask)
    }

    /// Inner join on equal values of `keys`.
    ///
    /// Output rows follow the left table's order; each left row is repeated for
    /// every matching right row. Non-key right columns whose name already exists
    /// on the left are suffixed with `_right`; if the suffixed name is taken too
    /// the join fails with [`Error::Validation`].
    pub fn inner_join(&self, right: &Table, keys: &[&str]) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Validation("inner_join requires at least one key".to_string()));
        }
        let left_keys: Vec<&Column> = keys.iter().map(|k| self.column(k)).collect::<Result<_>>()?;
        let right_keys: Vec<&Column> =
            keys.iter().map(|k| right.column(k)).collect::<Result<_>>()?;

        let compose = |cols: &[&Column], i: usize| -> String {
            let mut key = String::new();
            for (j, c) in cols.iter().enumerate() {
                if j > 0 {
                    key.push(KEY_SEP);
                }
                key.push_str(&c.key_at(i));
            }
            key
        };

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for i in 0..right.n_rows {
            index.entry(compose(&right_keys, i)).or_default().push(i);
        }

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for i in 0..self.n_rows {
            if let Some(matches) = index.get(&compose(&left_keys, i)) {
                for &j in matches {
                    left_rows.push(i);
                    right_rows.push(j);
                }
            }
        }

        let mut out = self.take(&left_rows)?;
        for (name, col) in right.iter() {
            if keys.contains(&name) {
                continue;
            }
            let out_name =
                if out.has_column(name) { format!("{}_right", name) } else { name.to_string() };
            if out.has_column(&out_name) {
                return Err(Error::Validation(format!(
                    "inner_join: right column '{}' would overwrite existing column '{}'",
                    name, out_name
                )));
            }
            out = out.with_column(out_name, col.take(&right_rows))?;
        }
        out.n_rows = left_rows.len();
        Ok(out)
    }

    /// SHA-256 hex digest over column names, types and values.
    ///
    /// Two tables with equal contents always share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.n_rows as u64).to_le_bytes());
        for (name, col) in self.iter() {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            col.hash_into(&mut hasher);
        }
        format!("{:x}", hasher.finalize())
    }
}
