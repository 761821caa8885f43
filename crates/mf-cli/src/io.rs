//! Flat CSV files ⇄ [`Table`].

use anyhow::{Context, Result};
use mf_core::{Column, Table};
use std::path::Path;

/// Cell values read as missing in numeric columns.
const MISSING: [&str; 4] = ["", "NA", "NaN", "nan"];

fn is_missing(s: &str) -> bool {
    MISSING.contains(&s.trim())
}

/// Pick the narrowest column type that holds every cell.
///
/// - every cell an integer → `Int`
/// - every non-missing cell a number → `Float` (missing → `NaN`)
/// - otherwise → `Str`
fn infer_column(cells: Vec<String>) -> Column {
    if !cells.is_empty() && cells.iter().all(|c| c.trim().parse::<i64>().is_ok()) {
        return Column::Int(cells.iter().filter_map(|c| c.trim().parse().ok()).collect());
    }
    let floats: Option<Vec<f64>> = cells
        .iter()
        .map(|c| if is_missing(c) { Some(f64::NAN) } else { c.trim().parse::<f64>().ok() })
        .collect();
    match floats {
        Some(v) => Column::Float(v),
        None => Column::Str(cells),
    }
}

/// Read a headed CSV file into a [`Table`], inferring column types.
pub fn read_table(path: &Path) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        anyhow::bail!("CSV file {} has no columns", path.display());
    }

    let n_cols = headers.len();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); n_cols];
    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("failed to read CSV row {}", row + 1))?;
        if record.len() != n_cols {
            anyhow::bail!(
                "{}: row {} has {} fields, expected {}",
                path.display(),
                row + 1,
                record.len(),
                n_cols
            );
        }
        for (j, field) in record.iter().enumerate() {
            cells[j].push(field.to_string());
        }
    }

    let columns: Vec<(String, Column)> =
        headers.into_iter().zip(cells).map(|(h, c)| (h, infer_column(c))).collect();
    Table::from_columns(columns).with_context(|| format!("invalid table in {}", path.display()))
}

/// Write a [`Table`] as a headed CSV file. `NaN` is written as an empty cell.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if table.n_cols() == 0 {
        return Ok(());
    }
    wtr.write_record(table.column_names())?;
    for i in 0..table.n_rows() {
        let record: Vec<String> = table
            .iter()
            .map(|(_, col)| match col {
                Column::Float(v) if v[i].is_nan() => String::new(),
                Column::Float(v) => v[i].to_string(),
                Column::Int(v) => v[i].to_string(),
                Column::Str(v) => v[i].clone(),
            })
            .collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
