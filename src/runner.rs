//! Materialization of an asset selection.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::{task::JoinSet, time::Instant};
use tracing::{error, info, warn};

use crate::assets::{AssetKey, AssetValue};
use crate::checks::{run_checks, CheckResult};
use crate::config::PipelineConfig;
use crate::fetch;
use crate::graph::AssetGraph;
use crate::history::{CheckRow, MaterializationRow, RunHistory};
use crate::process::{self, metrics, DailyRecord, GrowthRow, IncidenceRow};
use crate::report;
use crate::storage::IoStore;

type Inputs = HashMap<AssetKey, Arc<AssetValue>>;

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedAsset {
    pub asset: AssetKey,
    pub rows: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub materialized: Vec<MaterializedAsset>,
    pub checks: Vec<CheckResult>,
    /// Selected assets not run because an upstream check blocked them.
    pub skipped: Vec<AssetKey>,
}

impl RunSummary {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

pub struct Pipeline {
    cfg: Arc<PipelineConfig>,
    graph: AssetGraph,
    store: IoStore,
    history: RunHistory,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate()?;
        let store = IoStore::new(&cfg.storage_dir)?;
        let history = RunHistory::open(cfg.history_dir())?;
        Ok(Self {
            cfg: Arc::new(cfg),
            graph: AssetGraph::new(),
            store,
            history,
        })
    }

    pub fn graph(&self) -> &AssetGraph {
        &self.graph
    }

    pub fn store(&self) -> &IoStore {
        &self.store
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Materialize every asset `selection` names, in dependency order.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn materialize(&self, selection: &str) -> Result<RunSummary> {
        let selected: BTreeSet<AssetKey> = self.graph.select(selection)?;
        let waves = self
            .graph
            .waves(&selected)
            .ok_or_else(|| anyhow!("asset graph contains a cycle"))?;

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, assets = ?selected, "starting run");

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            ..Default::default()
        };
        let mut values: Inputs = HashMap::new();
        let mut blocked: HashSet<AssetKey> = HashSet::new();

        for wave in waves {
            let mut tasks = JoinSet::new();
            for asset in wave {
                if asset.deps().iter().any(|d| blocked.contains(d)) {
                    warn!(asset = %asset, "skipped: upstream check failed");
                    blocked.insert(asset);
                    summary.skipped.push(asset);
                    continue;
                }
                let inputs = self.gather_inputs(asset, &mut values).await?;
                let cfg = Arc::clone(&self.cfg);
                let store = self.store.clone();
                tasks.spawn(async move {
                    let started = Utc::now();
                    let clock = Instant::now();
                    info!(asset = %asset, "materializing");
                    let produced = produce(asset, inputs, cfg, store).await;
                    (asset, started, clock.elapsed(), produced)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (asset, started, elapsed, produced) = joined?;
                let (value, checks) = match produced {
                    Ok(v) => v,
                    Err(e) => {
                        error!(asset = %asset, error = %e, "materialization failed");
                        return Err(e.context(format!("materializing {}", asset)));
                    }
                };
                let finished = Utc::now();
                info!(asset = %asset, rows = value.num_rows(), elapsed = ?elapsed, "materialized");

                self.record(&run_id, asset, &value, &checks, started, finished)?;
                if self.cfg.blocking_checks && checks.iter().any(CheckResult::is_blocking_failure)
                {
                    blocked.insert(asset);
                }

                summary.materialized.push(MaterializedAsset {
                    asset,
                    rows: value.num_rows(),
                    started,
                    finished,
                });
                summary.checks.extend(checks);
                values.insert(asset, Arc::new(value));
            }
        }

        summary.materialized.sort_by_key(|m| m.asset);
        if let Err(e) = self.history.vacuum() {
            warn!(error = %e, "history vacuum failed");
        }
        info!(
            run_id = %run_id,
            materialized = summary.materialized.len(),
            skipped = summary.skipped.len(),
            failed_checks = summary.failed_checks().count(),
            "run finished"
        );
        Ok(summary)
    }

    /// Inputs for `asset`: values from this run, else the persisted copy.
    async fn gather_inputs(&self, asset: AssetKey, values: &mut Inputs) -> Result<Inputs> {
        let mut inputs = HashMap::new();
        for dep in asset.deps() {
            let value = match values.get(dep) {
                Some(v) => Arc::clone(v),
                None => {
                    let store = self.store.clone();
                    let key = *dep;
                    let loaded = tokio::task::spawn_blocking(move || store.load(key))
                        .await?
                        .with_context(|| format!("loading input {} for {}", dep, asset))?;
                    let loaded = Arc::new(loaded);
                    info!(asset = %dep, "loaded from storage");
                    values.insert(*dep, Arc::clone(&loaded));
                    loaded
                }
            };
            inputs.insert(*dep, value);
        }
        Ok(inputs)
    }

    /// Record a materialization and its check results in history.
    fn record(
        &self,
        run_id: &str,
        asset: AssetKey,
        value: &AssetValue,
        checks: &[CheckResult],
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Result<()> {
        self.history.materializations.add(&MaterializationRow {
            run_id: run_id.to_string(),
            asset: asset.to_string(),
            rows: value.num_rows() as u64,
            started,
            finished,
        })?;

        for r in checks {
            if r.passed {
                info!(check = %r.check, asset = %asset, metadata = ?r.metadata, "check passed");
            } else {
                warn!(
                    check = %r.check,
                    asset = %asset,
                    severity = ?r.severity,
                    metadata = ?r.metadata,
                    "check failed"
                );
            }
            self.history.checks.add(&CheckRow {
                run_id: run_id.to_string(),
                result: r.clone(),
                at: Utc::now(),
            })?;
        }
        Ok(())
    }
}

/// Compute `asset`, then store it and run its checks on the blocking pool.
async fn produce(
    asset: AssetKey,
    inputs: Inputs,
    cfg: Arc<PipelineConfig>,
    store: IoStore,
) -> Result<(AssetValue, Vec<CheckResult>)> {
    let value = compute(asset, inputs, Arc::clone(&cfg)).await?;
    tokio::task::spawn_blocking(move || -> Result<(AssetValue, Vec<CheckResult>)> {
        store.store(asset, &value)?;
        let checks = run_checks(asset, &value, &cfg);
        Ok((value, checks))
    })
    .await?
}

fn input(inputs: &Inputs, key: AssetKey) -> Result<&AssetValue> {
    inputs
        .get(&key)
        .map(Arc::as_ref)
        .ok_or_else(|| anyhow!("input {} was not provided", key))
}

fn processed_input(inputs: &Inputs) -> Result<&[DailyRecord]> {
    match input(inputs, AssetKey::DatosProcesados)? {
        AssetValue::Processed(v) => Ok(v),
        other => bail!("datos_procesados holds a {} value", other.kind()),
    }
}

fn incidence_input(inputs: &Inputs) -> Result<&[IncidenceRow]> {
    match input(inputs, AssetKey::MetricaIncidencia7d)? {
        AssetValue::Incidence(v) => Ok(v),
        other => bail!("metrica_incidencia_7d holds a {} value", other.kind()),
    }
}

fn growth_input(inputs: &Inputs) -> Result<&[GrowthRow]> {
    match input(inputs, AssetKey::MetricaFactorCrec7d)? {
        AssetValue::Growth(v) => Ok(v),
        other => bail!("metrica_factor_crec_7d holds a {} value", other.kind()),
    }
}

/// Produce one asset's value. CPU-bound work goes to the blocking pool.
async fn compute(asset: AssetKey, inputs: Inputs, cfg: Arc<PipelineConfig>) -> Result<AssetValue> {
    if asset == AssetKey::LeerDatos {
        let raw = fetch::read_source(&cfg.source, cfg.http_timeout_secs).await?;
        return Ok(AssetValue::Raw(raw));
    }
    tokio::task::spawn_blocking(move || compute_blocking(asset, &inputs, &cfg)).await?
}

fn compute_blocking(asset: AssetKey, inputs: &Inputs, cfg: &PipelineConfig) -> Result<AssetValue> {
    match asset {
        AssetKey::LeerDatos => bail!("leer_datos is read asynchronously"),
        AssetKey::DatosProcesados => {
            let raw = match input(inputs, AssetKey::LeerDatos)? {
                AssetValue::Raw(t) => t,
                other => bail!("leer_datos holds a {} value", other.kind()),
            };
            let out = process::process_records(raw, &cfg.target_countries())?;
            Ok(AssetValue::Processed(out.records))
        }
        AssetKey::MetricaIncidencia7d => Ok(AssetValue::Incidence(metrics::incidence_7d(
            processed_input(inputs)?,
        ))),
        AssetKey::MetricaFactorCrec7d => Ok(AssetValue::Growth(metrics::growth_factor_7d(
            processed_input(inputs)?,
        ))),
        AssetKey::ReporteExcelCovid => {
            let workbook = report::export(
                &cfg.reports_dir,
                processed_input(inputs)?,
                incidence_input(inputs)?,
                growth_input(inputs)?,
            )?;
            Ok(AssetValue::Report(workbook))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile, TempDir};

    fn fixture() -> Result<NamedTempFile> {
        let mut f = NamedTempFile::new()?;
        writeln!(f, "location,date,new_cases,people_vaccinated,population")?;
        for day in 1..=20 {
            writeln!(f, "Peru,2021-06-{:02},{},10,100000", day, day)?;
        }
        Ok(f)
    }

    fn config(dir: &TempDir, source: &NamedTempFile) -> PipelineConfig {
        PipelineConfig {
            source: source.path().display().to_string(),
            storage_dir: dir.path().join("storage"),
            reports_dir: dir.path().join("reports"),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_partial_selection_reads_upstream_from_storage() -> Result<()> {
        let dir = tempdir()?;
        let src = fixture()?;
        let pipeline = Pipeline::new(config(&dir, &src))?;

        let first = pipeline.materialize("leer_datos+").await?;
        let assets: Vec<_> = first.materialized.iter().map(|m| m.asset).collect();
        assert_eq!(assets, vec![AssetKey::LeerDatos, AssetKey::DatosProcesados]);

        let second = pipeline.materialize("metrica_incidencia_7d").await?;
        assert_eq!(second.materialized.len(), 1);
        // 20 rows, 7-row window
        assert_eq!(second.materialized[0].rows, 14);
        assert!(pipeline.store().contains(AssetKey::MetricaIncidencia7d));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_upstream_fails_the_run() -> Result<()> {
        let dir = tempdir()?;
        let src = fixture()?;
        let pipeline = Pipeline::new(config(&dir, &src))?;

        let err = pipeline
            .materialize("metrica_factor_crec_7d")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("datos_procesados"));
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking_checks_skip_downstream() -> Result<()> {
        let dir = tempdir()?;
        let mut src = NamedTempFile::new()?;
        writeln!(src, "location,date,new_cases,people_vaccinated,population")?;
        writeln!(src, "Peru,2021-06-01,1,1,100")?;
        writeln!(src, "Peru,2021-06-01,1,1,100")?;

        let mut cfg = config(&dir, &src);
        cfg.blocking_checks = true;
        let pipeline = Pipeline::new(cfg)?;

        let summary = pipeline.materialize("leer_datos++").await?;
        assert_eq!(summary.materialized.len(), 1);
        assert_eq!(summary.skipped.len(), 4);
        assert!(summary
            .failed_checks()
            .any(|c| c.check == "check_campos_y_unicidad"));
        Ok(())
    }

    #[tokio::test]
    async fn test_produce_stores_value_and_runs_checks() -> Result<()> {
        let dir = tempdir()?;
        let src = fixture()?;
        let cfg = Arc::new(config(&dir, &src));
        let store = IoStore::new(&cfg.storage_dir)?;

        let (value, checks) =
            produce(AssetKey::LeerDatos, HashMap::new(), Arc::clone(&cfg), store.clone()).await?;
        assert_eq!(value.num_rows(), 20);
        assert!(store.contains(AssetKey::LeerDatos));
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|c| c.asset == "leer_datos"));

        let mut inputs = HashMap::new();
        inputs.insert(AssetKey::LeerDatos, Arc::new(value));
        let (processed, checks) =
            produce(AssetKey::DatosProcesados, inputs, cfg, store.clone()).await?;
        assert_eq!(processed.num_rows(), 20);
        assert!(checks.is_empty());
        assert!(store.contains(AssetKey::DatosProcesados));
        Ok(())
    }

    #[tokio::test]
    async fn test_one_wave_stores_both_metrics() -> Result<()> {
        let dir = tempdir()?;
        let src = fixture()?;
        let pipeline = Pipeline::new(config(&dir, &src))?;
        pipeline.materialize("leer_datos+").await?;

        let summary = pipeline.materialize("group:metricas").await?;
        assert_eq!(summary.materialized.len(), 2);
        assert_eq!(summary.checks.len(), 1);
        assert!(pipeline.store().contains(AssetKey::MetricaIncidencia7d));
        assert!(pipeline.store().contains(AssetKey::MetricaFactorCrec7d));
        Ok(())
    }

    #[tokio::test]
    async fn test_history_records_the_run() -> Result<()> {
        let dir = tempdir()?;
        let src = fixture()?;
        let pipeline = Pipeline::new(config(&dir, &src))?;

        let summary = pipeline.materialize("leer_datos").await?;
        assert_eq!(summary.checks.len(), 3);

        let latest = pipeline.history().materializations.latest_per_asset()?;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, summary.run_id);
        assert_eq!(latest[0].rows, 20);
        assert_eq!(pipeline.history().checks.rows()?.len(), 3);
        Ok(())
    }
}
