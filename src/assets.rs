//! The pipeline's assets: names, groups, dependencies and output values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::process::{DailyRecord, GrowthRow, IncidenceRow, RawTable};

/// Every asset the pipeline knows how to materialize, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetKey {
    LeerDatos,
    DatosProcesados,
    MetricaIncidencia7d,
    MetricaFactorCrec7d,
    ReporteExcelCovid,
}

impl AssetKey {
    pub const ALL: [AssetKey; 5] = [
        AssetKey::LeerDatos,
        AssetKey::DatosProcesados,
        AssetKey::MetricaIncidencia7d,
        AssetKey::MetricaFactorCrec7d,
        AssetKey::ReporteExcelCovid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKey::LeerDatos => "leer_datos",
            AssetKey::DatosProcesados => "datos_procesados",
            AssetKey::MetricaIncidencia7d => "metrica_incidencia_7d",
            AssetKey::MetricaFactorCrec7d => "metrica_factor_crec_7d",
            AssetKey::ReporteExcelCovid => "reporte_excel_covid",
        }
    }

    pub fn group(&self) -> &'static str {
        match self {
            AssetKey::LeerDatos => "ingesta",
            AssetKey::DatosProcesados => "procesamiento",
            AssetKey::MetricaIncidencia7d | AssetKey::MetricaFactorCrec7d => "metricas",
            AssetKey::ReporteExcelCovid => "reporte",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AssetKey::LeerDatos => "Reads the canonical OWID CSV without transforming it.",
            AssetKey::DatosProcesados => {
                "Filters target countries; drops missing values and duplicates; selects columns."
            }
            AssetKey::MetricaIncidencia7d => "7-day incidence per 100k inhabitants.",
            AssetKey::MetricaFactorCrec7d => {
                "7-day growth factor: 7-day case sum / previous 7-day case sum."
            }
            AssetKey::ReporteExcelCovid => "Exports results to the reports directory.",
        }
    }

    /// Direct inputs of this asset.
    pub fn deps(&self) -> &'static [AssetKey] {
        match self {
            AssetKey::LeerDatos => &[],
            AssetKey::DatosProcesados => &[AssetKey::LeerDatos],
            AssetKey::MetricaIncidencia7d | AssetKey::MetricaFactorCrec7d => {
                &[AssetKey::DatosProcesados]
            }
            AssetKey::ReporteExcelCovid => &[
                AssetKey::DatosProcesados,
                AssetKey::MetricaIncidencia7d,
                AssetKey::MetricaFactorCrec7d,
            ],
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| PipelineError::UnknownAsset(s.trim().to_string()))
    }
}

/// The materialized output of an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetValue {
    Raw(RawTable),
    Processed(Vec<DailyRecord>),
    Incidence(Vec<IncidenceRow>),
    Growth(Vec<GrowthRow>),
    /// Location of the exported workbook.
    Report(PathBuf),
}

impl AssetValue {
    pub fn num_rows(&self) -> usize {
        match self {
            AssetValue::Raw(t) => t.num_rows(),
            AssetValue::Processed(v) => v.len(),
            AssetValue::Incidence(v) => v.len(),
            AssetValue::Growth(v) => v.len(),
            AssetValue::Report(_) => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AssetValue::Raw(_) => "raw",
            AssetValue::Processed(_) => "processed",
            AssetValue::Incidence(_) => "incidence",
            AssetValue::Growth(_) => "growth",
            AssetValue::Report(_) => "report",
        }
    }
}
