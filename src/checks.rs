//! Data quality checks attached to assets. Checks never mutate data; they
//! report a pass/fail verdict, an optional severity and metadata.

use anyhow::anyhow;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::assets::{AssetKey, AssetValue};
use crate::config::PipelineConfig;
use crate::process::{date_parser::parse_date, utils::parse_number, IncidenceRow, RawTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warn,
    Error,
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            other => Err(anyhow!("unknown check severity '{}'", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warn => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub asset: String,
    pub passed: bool,
    pub severity: Option<Severity>,
    pub metadata: BTreeMap<String, Value>,
}

impl CheckResult {
    fn new(check: CheckKey, passed: bool, severity: Option<Severity>) -> Self {
        Self {
            check: check.as_str().to_string(),
            asset: check.asset().as_str().to_string(),
            passed,
            severity,
            metadata: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// A failed check with ERROR severity.
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity == Some(Severity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKey {
    NoFechasFuturas,
    CamposYUnicidad,
    NewCasesNoNegativos,
    IncidenciaRango,
}

impl CheckKey {
    pub const ALL: [CheckKey; 4] = [
        CheckKey::NoFechasFuturas,
        CheckKey::CamposYUnicidad,
        CheckKey::NewCasesNoNegativos,
        CheckKey::IncidenciaRango,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKey::NoFechasFuturas => "check_no_fechas_futuras",
            CheckKey::CamposYUnicidad => "check_campos_y_unicidad",
            CheckKey::NewCasesNoNegativos => "check_new_cases_no_negativos",
            CheckKey::IncidenciaRango => "check_incidencia_rango",
        }
    }

    pub fn asset(&self) -> AssetKey {
        match self {
            CheckKey::IncidenciaRango => AssetKey::MetricaIncidencia7d,
            _ => AssetKey::LeerDatos,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CheckKey::NoFechasFuturas => "No hay fechas futuras.",
            CheckKey::CamposYUnicidad => {
                "Claves no nulas; unicidad (location,date); population>0."
            }
            CheckKey::NewCasesNoNegativos => "new_cases no negativos (revisiones OWID).",
            CheckKey::IncidenciaRango => "Incidencia 7d en el rango de referencia (solo informativo).",
        }
    }

    pub fn for_asset(asset: AssetKey) -> impl Iterator<Item = CheckKey> {
        Self::ALL.into_iter().filter(move |c| c.asset() == asset)
    }
}

/// Run every check attached to `asset` against its fresh value.
pub fn run_checks(asset: AssetKey, value: &AssetValue, cfg: &PipelineConfig) -> Vec<CheckResult> {
    let today = Utc::now().date_naive();
    CheckKey::for_asset(asset)
        .filter_map(|check| match (check, value) {
            (CheckKey::NoFechasFuturas, AssetValue::Raw(t)) => Some(no_future_dates(t, today)),
            (CheckKey::CamposYUnicidad, AssetValue::Raw(t)) => Some(fields_and_uniqueness(t)),
            (CheckKey::NewCasesNoNegativos, AssetValue::Raw(t)) => Some(new_cases_non_negative(t)),
            (CheckKey::IncidenciaRango, AssetValue::Incidence(rows)) => {
                Some(incidence_in_range(rows, cfg))
            }
            _ => None,
        })
        .collect()
}

pub fn no_future_dates(raw: &RawTable, today: NaiveDate) -> CheckResult {
    let check = CheckKey::NoFechasFuturas;
    if !raw.has_column("date") {
        return CheckResult::new(check, false, Some(Severity::Error))
            .with("error", "Falta columna 'date'");
    }
    let affected = raw
        .column("date")
        .filter_map(|c| c.and_then(parse_date))
        .filter(|d| *d > today)
        .count();
    let severity = (affected > 0).then_some(Severity::Error);
    CheckResult::new(check, affected == 0, severity)
        .with("filas_afectadas", affected)
        .with("hoy", today.to_string())
}

pub fn fields_and_uniqueness(raw: &RawTable) -> CheckResult {
    let check = CheckKey::CamposYUnicidad;
    let missing = raw.missing_columns(&["location", "date", "population"]);
    if !missing.is_empty() {
        return CheckResult::new(check, false, Some(Severity::Error))
            .with("faltan_columnas", missing.join(", "));
    }

    let idx = raw.index_of(&["location", "date", "population"]);
    let (loc_i, date_i, pop_i) = (idx["location"], idx["date"], idx["population"]);

    let mut null_location = 0usize;
    let mut null_date = 0usize;
    let mut null_population = 0usize;
    let mut population_le_0 = 0usize;
    let mut duplicates = 0usize;
    let mut seen: HashSet<(Option<&str>, Option<NaiveDate>)> = HashSet::new();

    for row in &raw.rows {
        let location = row[loc_i].as_deref();
        let date = row[date_i].as_deref().and_then(parse_date);
        let population = row[pop_i].as_deref();

        null_location += usize::from(location.is_none());
        null_date += usize::from(date.is_none());
        null_population += usize::from(population.is_none());
        if matches!(parse_number(population), Some(p) if p <= 0.0) {
            population_le_0 += 1;
        }
        if !seen.insert((location, date)) {
            duplicates += 1;
        }
    }

    let passed = null_location == 0
        && null_date == 0
        && null_population == 0
        && duplicates == 0
        && population_le_0 == 0;
    let result = CheckResult::new(check, passed, (!passed).then_some(Severity::Error))
        .with("null_location", null_location)
        .with("null_date", null_date)
        .with("null_population", null_population)
        .with("duplicados_location_date", duplicates)
        .with("population_le_0", population_le_0);
    if population_le_0 > 0 {
        // daily incidence is undefined for these rows
        result.with(
            "nota",
            "population<=0: filas excluidas de metrica_incidencia_7d",
        )
    } else {
        result
    }
}

pub fn new_cases_non_negative(raw: &RawTable) -> CheckResult {
    let check = CheckKey::NewCasesNoNegativos;
    if !raw.has_column("new_cases") {
        return CheckResult::new(check, true, Some(Severity::Warn))
            .with("nota", "Falta columna 'new_cases' para el check");
    }
    let negatives = raw
        .column("new_cases")
        .filter_map(parse_number)
        .filter(|v| *v < 0.0)
        .count();
    CheckResult::new(check, true, Some(Severity::Warn))
        .with("new_cases_negativos", negatives)
        .with("nota", "OWID puede tener revisiones negativas puntuales.")
}

pub fn incidence_in_range(rows: &[IncidenceRow], cfg: &PipelineConfig) -> CheckResult {
    let (lo, hi) = cfg.incidence_range;
    let outside = rows
        .iter()
        .filter(|r| r.incidencia_7d < lo || r.incidencia_7d > hi)
        .count();
    CheckResult::new(CheckKey::IncidenciaRango, true, Some(Severity::Warn))
        .with("valores_fuera_de_rango", outside)
        .with("rango_referencia", cfg.incidence_range_label())
}
