use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::process::types::{DailyRecord, GrowthRow, IncidenceRow};

/// Rows per rolling window.
pub const WINDOW: usize = 7;

/// Split records by location (sorted by name), each group sorted by date.
fn by_location(records: &[DailyRecord]) -> Vec<(&str, Vec<&DailyRecord>)> {
    let mut groups: BTreeMap<&str, Vec<&DailyRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.location.as_str()).or_default().push(r);
    }
    groups
        .into_iter()
        .map(|(loc, mut rows)| {
            rows.sort_by_key(|r| r.date);
            (loc, rows)
        })
        .collect()
}

/// Cases per 100k inhabitants for one day; undefined without a positive population.
pub fn daily_incidence(r: &DailyRecord) -> Option<f64> {
    match r.population {
        Some(p) if p > 0.0 => Some(r.new_cases / p * 100_000.0),
        _ => None,
    }
}

/// Sum of a full window ending at `end` (inclusive). `None` if the window
/// runs off the front or any value is missing.
fn window_sum(values: &[Option<f64>], end: usize) -> Option<f64> {
    if end + 1 < WINDOW {
        return None;
    }
    values[end + 1 - WINDOW..=end]
        .iter()
        .copied()
        .sum::<Option<f64>>()
}

/// 7-row mean of the daily incidence, per location. Rows without a full
/// window of valid values are dropped.
#[tracing::instrument(level = "info", skip(records), fields(records = records.len()))]
pub fn incidence_7d(records: &[DailyRecord]) -> Vec<IncidenceRow> {
    by_location(records)
        .into_par_iter()
        .flat_map_iter(|(loc, rows)| {
            let daily: Vec<Option<f64>> = rows.iter().map(|r| daily_incidence(r)).collect();
            rows.iter()
                .enumerate()
                .filter_map(|(i, r)| {
                    let mean = window_sum(&daily, i)? / WINDOW as f64;
                    Some(IncidenceRow {
                        fecha: r.date,
                        pais: loc.to_string(),
                        incidencia_7d: mean,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Cases in the 7 rows ending at each row divided by the 7 rows before them.
/// Rows with less than two full windows of history are dropped, as is 0/0.
/// A non-empty week after an empty one yields an infinite factor.
#[tracing::instrument(level = "info", skip(records), fields(records = records.len()))]
pub fn growth_factor_7d(records: &[DailyRecord]) -> Vec<GrowthRow> {
    by_location(records)
        .into_par_iter()
        .flat_map_iter(|(loc, rows)| {
            let cases: Vec<Option<f64>> = rows.iter().map(|r| Some(r.new_cases)).collect();
            rows.iter()
                .enumerate()
                .filter_map(|(i, r)| {
                    let week = window_sum(&cases, i)?;
                    let prev = window_sum(&cases, i.checked_sub(WINDOW)?)?;
                    let factor = week / prev;
                    if factor.is_nan() {
                        return None;
                    }
                    Some(GrowthRow {
                        semana_fin: r.date,
                        pais: loc.to_string(),
                        casos_semana: week,
                        factor_crec_7d: factor,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
