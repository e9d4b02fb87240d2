//! Export of the processed data and both metrics as CSV files plus a
//! Parquet workbook (one file per sheet).

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::assets::AssetValue;
use crate::process::utils::format_float;
use crate::process::{DailyRecord, GrowthRow, IncidenceRow};
use crate::storage::{to_record_batch, write_parquet};

pub const WORKBOOK_DIR: &str = "reporte_covid";

fn write_csv<T>(
    path: &Path,
    header: &[&str],
    rows: &[T],
    to_record: impl Fn(&T) -> Vec<String>,
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(header)?;
    for r in rows {
        wtr.write_record(to_record(r))?;
    }
    wtr.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

pub fn write_processed_csv(path: &Path, rows: &[DailyRecord]) -> Result<()> {
    write_csv(
        path,
        &["location", "date", "new_cases", "people_vaccinated", "population"],
        rows,
        |r| {
            vec![
                r.location.clone(),
                r.date.to_string(),
                format_float(r.new_cases),
                format_float(r.people_vaccinated),
                r.population.map(format_float).unwrap_or_default(),
            ]
        },
    )
}

pub fn write_incidence_csv(path: &Path, rows: &[IncidenceRow]) -> Result<()> {
    write_csv(path, &["fecha", "pais", "incidencia_7d"], rows, |r| {
        vec![r.fecha.to_string(), r.pais.clone(), format_float(r.incidencia_7d)]
    })
}

pub fn write_growth_csv(path: &Path, rows: &[GrowthRow]) -> Result<()> {
    write_csv(
        path,
        &["semana_fin", "pais", "casos_semana", "factor_crec_7d"],
        rows,
        |r| {
            vec![
                r.semana_fin.to_string(),
                r.pais.clone(),
                format_float(r.casos_semana),
                format_float(r.factor_crec_7d),
            ]
        },
    )
}

/// Write every report file under `reports_dir`; returns the workbook directory.
#[tracing::instrument(level = "info", skip_all, fields(dir = %reports_dir.display()))]
pub fn export(
    reports_dir: &Path,
    processed: &[DailyRecord],
    incidence: &[IncidenceRow],
    growth: &[GrowthRow],
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("creating reports directory {}", reports_dir.display()))?;

    let workbook = reports_dir.join(WORKBOOK_DIR);
    let sheets = [
        ("datos_procesados", AssetValue::Processed(processed.to_vec())),
        ("metrica_incidencia_7d", AssetValue::Incidence(incidence.to_vec())),
        ("metrica_factor_crec_7d", AssetValue::Growth(growth.to_vec())),
    ];
    for (sheet, value) in &sheets {
        let batch = to_record_batch(value)?;
        write_parquet(&workbook.join(format!("{}.parquet", sheet)), &batch)
            .with_context(|| format!("writing sheet {}", sheet))?;
    }

    write_processed_csv(&reports_dir.join("datos_procesados.csv"), processed)?;
    write_incidence_csv(&reports_dir.join("metrica_incidencia_7d.csv"), incidence)?;
    write_growth_csv(&reports_dir.join("metrica_factor_crec_7d.csv"), growth)?;

    info!(workbook = %workbook.display(), "report exported");
    Ok(workbook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn test_export_writes_all_files() -> Result<()> {
        let tmp = tempdir()?;
        let reports = tmp.path().join("reports");
        let date = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
        let processed = vec![DailyRecord {
            location: "Ecuador".into(),
            date,
            new_cases: 120.0,
            people_vaccinated: 3000.0,
            population: None,
        }];
        let incidence = vec![IncidenceRow {
            fecha: date,
            pais: "Ecuador".into(),
            incidencia_7d: 1.5,
        }];

        let workbook = export(&reports, &processed, &incidence, &[])?;
        assert_eq!(workbook, reports.join(WORKBOOK_DIR));
        for sheet in ["datos_procesados", "metrica_incidencia_7d", "metrica_factor_crec_7d"] {
            assert!(workbook.join(format!("{}.parquet", sheet)).is_file());
        }

        let inc = fs::read_to_string(reports.join("metrica_incidencia_7d.csv"))?;
        assert_eq!(inc, "fecha,pais,incidencia_7d\n2021-07-01,Ecuador,1.5\n");

        let proc = fs::read_to_string(reports.join("datos_procesados.csv"))?;
        assert_eq!(
            proc,
            "location,date,new_cases,people_vaccinated,population\n\
             Ecuador,2021-07-01,120.0,3000.0,\n"
        );

        let growth = fs::read_to_string(reports.join("metrica_factor_crec_7d.csv"))?;
        assert_eq!(growth, "semana_fin,pais,casos_semana,factor_crec_7d\n");
        Ok(())
    }

    #[test]
    fn test_growth_csv_writes_infinite_factor() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("metrica_factor_crec_7d.csv");
        let rows = vec![GrowthRow {
            semana_fin: NaiveDate::from_ymd_opt(2021, 6, 14).unwrap(),
            pais: "Ecuador".into(),
            casos_semana: 35.0,
            factor_crec_7d: f64::INFINITY,
        }];
        write_growth_csv(&path, &rows)?;
        assert_eq!(
            fs::read_to_string(&path)?,
            "semana_fin,pais,casos_semana,factor_crec_7d\n2021-06-14,Ecuador,35.0,inf\n"
        );
        Ok(())
    }
}
