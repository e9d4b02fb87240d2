//! One-off profiling of an OWID extract: column types, `new_cases` range,
//! missing-value percentages and the covered date range.

use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, fs::File, path::Path};
use tracing::info;

use crate::process::date_parser::parse_date;
use crate::process::utils::{format_float, infer_column_type, parse_number};
use crate::process::{load_csv, RawTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRow {
    pub seccion: String,
    pub metro: String,
    pub valor: String,
    pub notas: String,
}

impl ProfileRow {
    fn new(seccion: &str, metro: &str, valor: Option<String>, notas: &str) -> Self {
        Self {
            seccion: seccion.to_string(),
            metro: metro.to_string(),
            valor: valor.unwrap_or_default(),
            notas: notas.to_string(),
        }
    }
}

fn pct_missing(raw: &RawTable, col: &str) -> Option<f64> {
    if !raw.has_column(col) || raw.num_rows() == 0 {
        return None;
    }
    let missing = raw.column(col).filter(|c| c.is_none()).count();
    Some(missing as f64 / raw.num_rows() as f64 * 100.0)
}

/// Build the profile table for an already loaded CSV.
pub fn profile_table(raw: &RawTable) -> Vec<ProfileRow> {
    let mut rows: Vec<ProfileRow> = raw
        .headers
        .iter()
        .map(|h| {
            let ty = infer_column_type(raw.column(h));
            ProfileRow::new("columnas_tipos", h, Some(ty.as_str().to_string()), "")
        })
        .collect();

    let cases: Vec<f64> = raw.column("new_cases").filter_map(parse_number).collect();
    let min_cases = cases.iter().copied().reduce(f64::min);
    let max_cases = cases.iter().copied().reduce(f64::max);

    let dates: Vec<_> = raw.column("date").filter_map(|c| c.and_then(parse_date)).collect();
    let min_date = dates.iter().min();
    let max_date = dates.iter().max();

    rows.extend([
        ProfileRow::new("resumen", "min_new_cases", min_cases.map(format_float), ""),
        ProfileRow::new("resumen", "max_new_cases", max_cases.map(format_float), ""),
        ProfileRow::new(
            "resumen",
            "pct_missing_new_cases",
            pct_missing(raw, "new_cases").map(format_float),
            "%",
        ),
        ProfileRow::new(
            "resumen",
            "pct_missing_people_vaccinated",
            pct_missing(raw, "people_vaccinated").map(format_float),
            "%",
        ),
        ProfileRow::new("resumen", "min_date", min_date.map(|d| d.to_string()), ""),
        ProfileRow::new("resumen", "max_date", max_date.map(|d| d.to_string()), ""),
    ]);
    rows
}

/// Profile `input` and write the table to `output` as CSV.
pub fn profile(input: &Path, output: &Path) -> Result<Vec<ProfileRow>> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let raw = load_csv(file).with_context(|| format!("parsing {}", input.display()))?;
    let rows = profile_table(&raw);

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(output)
        .with_context(|| format!("creating {}", output.display()))?;
    for r in &rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    info!(output = %output.display(), rows = rows.len(), "profile written");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn value<'a>(rows: &'a [ProfileRow], metro: &str) -> &'a str {
        &rows.iter().find(|r| r.metro == metro).unwrap().valor
    }

    #[test]
    fn test_profile_summary() -> Result<()> {
        let mut input = NamedTempFile::new()?;
        writeln!(input, "location,date,new_cases,people_vaccinated")?;
        writeln!(input, "Peru,2021-07-02,5,")?;
        writeln!(input, "Peru,2021-07-01,-2,10")?;
        writeln!(input, "Ecuador,2021-07-03,,20")?;
        writeln!(input, "Ecuador,2021-07-04,9,")?;

        let dir = tempdir()?;
        let output = dir.path().join("reports/tabla_perfilado.csv");
        let rows = profile(input.path(), &output)?;

        assert_eq!(value(&rows, "location"), "object");
        assert_eq!(value(&rows, "new_cases"), "float64");
        assert_eq!(value(&rows, "min_new_cases"), "-2.0");
        assert_eq!(value(&rows, "max_new_cases"), "9.0");
        assert_eq!(value(&rows, "pct_missing_new_cases"), "25.0");
        assert_eq!(value(&rows, "pct_missing_people_vaccinated"), "50.0");
        assert_eq!(value(&rows, "min_date"), "2021-07-01");
        assert_eq!(value(&rows, "max_date"), "2021-07-04");

        let written = fs::read_to_string(&output)?;
        assert!(written.starts_with("seccion,metro,valor,notas\n"));
        assert!(written.contains("resumen,pct_missing_new_cases,25.0,%\n"));
        Ok(())
    }
}
