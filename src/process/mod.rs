// src/process/mod.rs
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, info};

use crate::error::PipelineError;

pub mod date_parser;
pub mod metrics;
pub mod raw_table;
pub mod types;
pub mod utils;

pub use raw_table::{normalize_columns, RawTable};
pub use types::{DailyRecord, GrowthRow, IncidenceRow};

use date_parser::parse_date;
use utils::parse_number;

/// Columns `datos_procesados` needs from the raw table, and the order it keeps them in.
pub const PROCESSED_COLUMNS: [&str; 5] = [
    "location",
    "date",
    "new_cases",
    "people_vaccinated",
    "population",
];

/// Parse a CSV with a header row into a `RawTable`. Short rows are padded
/// with missing cells; empty cells become `None`.
pub fn load_csv<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .context("reading CSV header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let width = headers.len();
    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {}", idx))?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|cell| {
                if cell.trim().is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        row.resize(width, None);
        rows.push(row);
    }

    debug!(rows = rows.len(), columns = width, "parsed CSV");
    Ok(RawTable::new(headers, rows))
}

/// Output of the cleaning step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Processed {
    pub records: Vec<DailyRecord>,
    pub removed_duplicates: usize,
}

/// Keep the target countries, drop rows without cases/vaccination figures
/// or with an unusable date, and dedupe on `(location, date)` keeping the first row.
#[tracing::instrument(level = "info", skip(raw), fields(rows = raw.num_rows()))]
pub fn process_records(raw: &RawTable, countries: &[String]) -> Result<Processed> {
    let missing = raw.missing_columns(&PROCESSED_COLUMNS);
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            stage: "datos_procesados",
            columns: missing,
        }
        .into());
    }
    let idx = raw.index_of(&PROCESSED_COLUMNS);
    let col = |name: &str| idx[name];
    let (loc_i, date_i, cases_i, vax_i, pop_i) = (
        col("location"),
        col("date"),
        col("new_cases"),
        col("people_vaccinated"),
        col("population"),
    );

    let targets: HashSet<&str> = countries.iter().map(String::as_str).collect();
    fn cell(row: &[Option<String>], i: usize) -> Option<&str> {
        row.get(i).and_then(|c| c.as_deref())
    }

    let mut kept = Vec::new();
    for row in &raw.rows {
        let Some(location) = cell(row, loc_i) else {
            continue;
        };
        if !targets.contains(location) {
            continue;
        }
        let (Some(new_cases), Some(people_vaccinated)) =
            (parse_number(cell(row, cases_i)), parse_number(cell(row, vax_i)))
        else {
            continue;
        };
        let Some(date) = cell(row, date_i).and_then(parse_date) else {
            continue;
        };
        kept.push(DailyRecord {
            location: location.to_string(),
            date,
            new_cases,
            people_vaccinated,
            population: parse_number(cell(row, pop_i)),
        });
    }

    let before = kept.len();
    let mut seen = HashSet::new();
    kept.retain(|r| seen.insert((r.location.clone(), r.date)));
    let removed_duplicates = before - kept.len();

    info!(
        rows = kept.len(),
        removed_duplicates, "rows after cleaning"
    );
    Ok(Processed {
        records: kept,
        removed_duplicates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = "\
country,date,new_cases,people_vaccinated,population,code
Ecuador,2021-07-01,100,5000,17000000,ECU
Ecuador,2021-07-01,999,5000,17000000,ECU
Ecuador,2021-07-02,,5000,17000000,ECU
Ecuador,2021-07-03,50,,17000000,ECU
Peru,2021-07-01,200,8000,,PER
Chile,2021-07-01,300,9000,19000000,CHL
Peru,bad-date,1,1,1,PER
Peru,2021-07-02,abc,1,1,PER
";

    fn targets() -> Vec<String> {
        vec!["Ecuador".into(), "Peru".into()]
    }

    #[test]
    fn test_load_csv_marks_empty_cells_missing() -> Result<()> {
        let raw = load_csv("a,b,c\n1,,3\n4\n".as_bytes())?;
        assert_eq!(raw.headers, vec!["a", "b", "c"]);
        assert_eq!(
            raw.rows,
            vec![
                vec![Some("1".to_string()), None, Some("3".to_string())],
                vec![Some("4".to_string()), None, None],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_process_filters_and_dedupes() -> Result<()> {
        let raw = normalize_columns(load_csv(SAMPLE.as_bytes())?);
        let out = process_records(&raw, &targets())?;

        assert_eq!(out.removed_duplicates, 1);
        assert_eq!(out.records.len(), 2);

        let ecu = &out.records[0];
        assert_eq!(ecu.location, "Ecuador");
        assert_eq!(ecu.date, NaiveDate::from_ymd_opt(2021, 7, 1).unwrap());
        assert_eq!(ecu.new_cases, 100.0, "first duplicate wins");
        assert_eq!(ecu.population, Some(17_000_000.0));

        let per = &out.records[1];
        assert_eq!(per.location, "Peru");
        assert_eq!(per.population, None);
        Ok(())
    }

    #[test]
    fn test_process_reports_missing_columns() -> Result<()> {
        let raw = load_csv("location,date\nPeru,2021-07-01\n".as_bytes())?;
        let err = process_records(&raw, &targets()).unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert_eq!(
            err,
            PipelineError::MissingColumns {
                stage: "datos_procesados",
                columns: vec![
                    "new_cases".into(),
                    "people_vaccinated".into(),
                    "population".into()
                ],
            }
        );
        Ok(())
    }
}
