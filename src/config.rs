//! Pipeline configuration: defaults, optional YAML file, environment
//! overrides, then command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::error::PipelineError;

pub const OWID_URL: &str =
    "https://catalog.ourworldindata.org/garden/covid/latest/compact/compact.csv";
pub const COMPARISON_COUNTRY: &str = "Peru";

pub const ENV_SOURCE: &str = "COVID_PIPELINE_SOURCE";
pub const ENV_STORAGE_DIR: &str = "COVID_PIPELINE_STORAGE_DIR";
pub const ENV_REPORTS_DIR: &str = "COVID_PIPELINE_REPORTS_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `http(s)://` URL or local path of the OWID CSV.
    pub source: String,
    pub countries: Vec<String>,
    /// Always kept alongside `countries`.
    pub comparison_country: String,
    pub storage_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub http_timeout_secs: u64,
    /// Stop downstream assets when an ERROR check fails.
    pub blocking_checks: bool,
    /// Inclusive reference range for 7-day incidence.
    pub incidence_range: (f64, f64),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: OWID_URL.to_string(),
            countries: vec!["Ecuador".to_string(), COMPARISON_COUNTRY.to_string()],
            comparison_country: COMPARISON_COUNTRY.to_string(),
            storage_dir: PathBuf::from("storage"),
            reports_dir: PathBuf::from("reports"),
            http_timeout_secs: 60,
            blocking_checks: false,
            incidence_range: (0.0, 2000.0),
        }
    }
}

/// Values given on the command line. They win over every other layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub source: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Defaults overlaid with `path` (if given), the process environment and
    /// then `flags`.
    pub fn load(path: Option<&Path>, flags: &Overrides) -> Result<Self> {
        Self::load_with(path, |key| env::var(key).ok(), flags)
    }

    /// Like [`PipelineConfig::load`] with environment lookups going through `lookup`.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
        flags: &Overrides,
    ) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env(lookup);
        cfg.apply_overrides(flags);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_SOURCE) {
            self.source = v;
        }
        if let Some(v) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_REPORTS_DIR) {
            self.reports_dir = PathBuf::from(v);
        }
    }

    pub fn apply_overrides(&mut self, flags: &Overrides) {
        if let Some(s) = &flags.source {
            self.source = s.clone();
        }
        if let Some(d) = &flags.storage_dir {
            self.storage_dir = d.clone();
        }
        if let Some(d) = &flags.reports_dir {
            self.reports_dir = d.clone();
        }
    }

    /// `countries` plus the comparison country, in order, without repeats.
    pub fn target_countries(&self) -> Vec<String> {
        let mut out = self.countries.clone();
        let cmp = self.comparison_country.trim();
        if !cmp.is_empty() && !out.iter().any(|c| c == cmp) {
            out.push(cmp.to_string());
        }
        out
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.countries.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one target country is required".into(),
            ));
        }
        let (lo, hi) = self.incidence_range;
        if lo > hi {
            return Err(PipelineError::InvalidConfig(format!(
                "incidence_range lower bound {} exceeds upper bound {}",
                lo, hi
            )));
        }
        Ok(())
    }

    pub fn history_dir(&self) -> PathBuf {
        self.storage_dir.join("history")
    }

    /// `[lo,hi]` as shown in check metadata.
    pub fn incidence_range_label(&self) -> String {
        let (lo, hi) = self.incidence_range;
        format!("[{},{}]", lo, hi)
    }
}
