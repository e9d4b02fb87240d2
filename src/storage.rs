// src/storage.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, Date32Array, Float64Array, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

use crate::assets::{AssetKey, AssetValue};
use crate::error::PipelineError;
use crate::process::date_parser::{from_epoch_days, to_epoch_days};
use crate::process::{DailyRecord, GrowthRow, IncidenceRow, RawTable};

/// Persists asset outputs as one Parquet file per asset, so later runs can
/// reuse upstream values they did not recompute.
#[derive(Debug, Clone)]
pub struct IoStore {
    dir: PathBuf,
}

impl IoStore {
    /// Construct a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating storage directory {:?}", &dir))?;
        Ok(Self { dir })
    }

    pub fn path(&self, asset: AssetKey) -> PathBuf {
        self.dir.join(format!("{}.parquet", asset))
    }

    pub fn contains(&self, asset: AssetKey) -> bool {
        self.path(asset).is_file()
    }

    pub fn store(&self, asset: AssetKey, value: &AssetValue) -> Result<PathBuf> {
        let batch = to_record_batch(value)
            .with_context(|| format!("converting {} to Arrow", asset))?;
        let path = self.path(asset);
        write_parquet(&path, &batch)?;
        debug!(asset = %asset, rows = batch.num_rows(), path = %path.display(), "stored");
        Ok(path)
    }

    pub fn load(&self, asset: AssetKey) -> Result<AssetValue> {
        let path = self.path(asset);
        if !path.is_file() {
            return Err(PipelineError::NotMaterialized(asset.to_string()).into());
        }
        let (schema, batches) = read_parquet(&path)?;
        from_record_batches(asset, &schema, &batches)
            .with_context(|| format!("decoding stored {} from {}", asset, path.display()))
    }
}

/// Write one batch to `path` via a temp file + rename.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {:?}", &tmp))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))
        .context("creating Arrow writer")?;
    writer.write(batch).context("writing batch")?;
    writer.close().context("closing writer")?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {:?} into place", &tmp))?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(8192);
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn batch(fields: Vec<Field>, columns: Vec<ArrayRef>, rows: usize) -> Result<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .map_err(Into::into)
}

fn utf8(values: impl IntoIterator<Item = String>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn dates(values: impl IntoIterator<Item = chrono::NaiveDate>) -> ArrayRef {
    Arc::new(Date32Array::from_iter_values(values.into_iter().map(to_epoch_days)))
}

fn floats(values: impl IntoIterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(values.into_iter().collect::<Float64Array>())
}

/// Typed Arrow view of an asset value.
pub fn to_record_batch(value: &AssetValue) -> Result<RecordBatch> {
    match value {
        AssetValue::Raw(t) => {
            let fields = t
                .headers
                .iter()
                .map(|h| Field::new(h, DataType::Utf8, true))
                .collect();
            let columns = (0..t.headers.len())
                .map(|i| {
                    let arr: StringArray = t.rows.iter().map(|r| r[i].as_deref()).collect();
                    Arc::new(arr) as ArrayRef
                })
                .collect();
            batch(fields, columns, t.num_rows())
        }
        AssetValue::Processed(rows) => batch(
            vec![
                Field::new("location", DataType::Utf8, false),
                Field::new("date", DataType::Date32, false),
                Field::new("new_cases", DataType::Float64, false),
                Field::new("people_vaccinated", DataType::Float64, false),
                Field::new("population", DataType::Float64, true),
            ],
            vec![
                utf8(rows.iter().map(|r| r.location.clone())),
                dates(rows.iter().map(|r| r.date)),
                floats(rows.iter().map(|r| Some(r.new_cases))),
                floats(rows.iter().map(|r| Some(r.people_vaccinated))),
                floats(rows.iter().map(|r| r.population)),
            ],
            rows.len(),
        ),
        AssetValue::Incidence(rows) => batch(
            vec![
                Field::new("fecha", DataType::Date32, false),
                Field::new("pais", DataType::Utf8, false),
                Field::new("incidencia_7d", DataType::Float64, false),
            ],
            vec![
                dates(rows.iter().map(|r| r.fecha)),
                utf8(rows.iter().map(|r| r.pais.clone())),
                floats(rows.iter().map(|r| Some(r.incidencia_7d))),
            ],
            rows.len(),
        ),
        AssetValue::Growth(rows) => batch(
            vec![
                Field::new("semana_fin", DataType::Date32, false),
                Field::new("pais", DataType::Utf8, false),
                Field::new("casos_semana", DataType::Float64, false),
                Field::new("factor_crec_7d", DataType::Float64, false),
            ],
            vec![
                dates(rows.iter().map(|r| r.semana_fin)),
                utf8(rows.iter().map(|r| r.pais.clone())),
                floats(rows.iter().map(|r| Some(r.casos_semana))),
                floats(rows.iter().map(|r| Some(r.factor_crec_7d))),
            ],
            rows.len(),
        ),
        AssetValue::Report(path) => batch(
            vec![Field::new("path", DataType::Utf8, false)],
            vec![utf8([path.display().to_string()])],
            1,
        ),
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("stored batch has no column `{}`", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column `{}` has an unexpected type", name))
}

/// Inverse of [`to_record_batch`] for the value type `asset` produces.
pub fn from_record_batches(
    asset: AssetKey,
    schema: &Schema,
    batches: &[RecordBatch],
) -> Result<AssetValue> {
    match asset {
        AssetKey::LeerDatos => {
            let headers: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
            let mut rows = Vec::new();
            for b in batches {
                let cols = headers
                    .iter()
                    .map(|h| column::<StringArray>(b, h))
                    .collect::<Result<Vec<_>>>()?;
                for i in 0..b.num_rows() {
                    rows.push(
                        cols.iter()
                            .map(|c| (!c.is_null(i)).then(|| c.value(i).to_string()))
                            .collect(),
                    );
                }
            }
            Ok(AssetValue::Raw(RawTable::new(headers, rows)))
        }
        AssetKey::DatosProcesados => {
            let mut out = Vec::new();
            for b in batches {
                let loc = column::<StringArray>(b, "location")?;
                let date = column::<Date32Array>(b, "date")?;
                let cases = column::<Float64Array>(b, "new_cases")?;
                let vax = column::<Float64Array>(b, "people_vaccinated")?;
                let pop = column::<Float64Array>(b, "population")?;
                for i in 0..b.num_rows() {
                    out.push(DailyRecord {
                        location: loc.value(i).to_string(),
                        date: from_epoch_days(date.value(i)),
                        new_cases: cases.value(i),
                        people_vaccinated: vax.value(i),
                        population: (!pop.is_null(i)).then(|| pop.value(i)),
                    });
                }
            }
            Ok(AssetValue::Processed(out))
        }
        AssetKey::MetricaIncidencia7d => {
            let mut out = Vec::new();
            for b in batches {
                let fecha = column::<Date32Array>(b, "fecha")?;
                let pais = column::<StringArray>(b, "pais")?;
                let inc = column::<Float64Array>(b, "incidencia_7d")?;
                for i in 0..b.num_rows() {
                    out.push(IncidenceRow {
                        fecha: from_epoch_days(fecha.value(i)),
                        pais: pais.value(i).to_string(),
                        incidencia_7d: inc.value(i),
                    });
                }
            }
            Ok(AssetValue::Incidence(out))
        }
        AssetKey::MetricaFactorCrec7d => {
            let mut out = Vec::new();
            for b in batches {
                let fin = column::<Date32Array>(b, "semana_fin")?;
                let pais = column::<StringArray>(b, "pais")?;
                let week = column::<Float64Array>(b, "casos_semana")?;
                let factor = column::<Float64Array>(b, "factor_crec_7d")?;
                for i in 0..b.num_rows() {
                    out.push(GrowthRow {
                        semana_fin: from_epoch_days(fin.value(i)),
                        pais: pais.value(i).to_string(),
                        casos_semana: week.value(i),
                        factor_crec_7d: factor.value(i),
                    });
                }
            }
            Ok(AssetValue::Growth(out))
        }
        AssetKey::ReporteExcelCovid => {
            let Some(b) = batches.iter().find(|b| b.num_rows() > 0) else {
                bail!("stored report is empty");
            };
            let path = column::<StringArray>(b, "path")?;
            Ok(AssetValue::Report(PathBuf::from(path.value(0))))
        }
    }
}
