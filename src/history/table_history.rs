use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Trait representing a row in the history table.
/// - Defines schema, to_arrays, unique_key for writes.
/// - Decodes rows back out of a batch for reads.
pub trait HistoryRow: Sized {
    /// Partition date (UTC naive) for hive partitioning
    fn partition_date(&self) -> NaiveDate;
    /// Arrow schema for this row type
    fn schema() -> ArrowSchema;
    /// Convert this row into column arrays matching the schema
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// Unique dedupe key for this row (used when writing)
    fn unique_key(&self) -> String;
    /// Decode row `row` of an existing batch
    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self>;
    /// Column index for key in schema
    const KEY_COLUMN: usize;
    /// Extract unique key from an existing batch row (for scanning)
    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String> {
        let arr = batch
            .column(Self::KEY_COLUMN)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| anyhow!("KEY_COLUMN must be StringArray"))?;
        Ok(arr.value(row).to_string())
    }
}

/// Generic hive-partitioned history table.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

impl<R: HistoryRow> TableHistory<R> {
    /// Create and scan existing keys into `seen`.
    pub fn new(base_dir: impl Into<PathBuf>, table: &str) -> Result<Self> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let mut seen_set = HashSet::new();
        for batch in scan_batches(&table_dir)? {
            for i in 0..batch.num_rows() {
                seen_set.insert(R::extract_key(&batch, i)?);
            }
        }

        Ok(Self {
            base_dir,
            table: table.to_string(),
            schema: Arc::new(R::schema()),
            seen: Mutex::new(seen_set),
            _marker: PhantomData,
        })
    }

    fn table_dir(&self) -> PathBuf {
        self.base_dir.join(&self.table)
    }

    /// Add a new row of type R. Rows whose key was already written are ignored.
    pub fn add(&self, row: &R) -> Result<()> {
        let key = row.unique_key();
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| anyhow!("history lock poisoned"))?;
            if !seen.insert(key.clone()) {
                return Ok(());
            }
        }

        let date = row.partition_date();
        let partition = format!("date={}", date.format("%Y%m%d"));
        let dir = self.table_dir().join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let fname = format!("{}---{}.parquet", key, ts);
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        Ok(())
    }

    /// Check if a row exists by its dedupe key
    pub fn get(&self, key: &str) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.contains(key))
            .unwrap_or(false)
    }

    /// Every row in the table, in no particular order.
    pub fn rows(&self) -> Result<Vec<R>> {
        let mut out = Vec::new();
        for batch in scan_batches(&self.table_dir())? {
            for i in 0..batch.num_rows() {
                out.push(R::from_batch(&batch, i)?);
            }
        }
        Ok(out)
    }

    /// Vacuum each partition into one consolidated file
    pub fn vacuum(&self) -> Result<()> {
        for part in fs::read_dir(self.table_dir())? {
            let part = part?;
            if !part.file_type()?.is_dir() {
                continue;
            }
            let dir = part.path();

            let files = partition_files(&dir)?;
            if files.len() < 2 {
                continue;
            }

            let tmp = dir.join("consolidated.parquet.tmp");
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;

            for p in &files {
                let f = File::open(p)?;
                let mut reader = ParquetRecordBatchReaderBuilder::try_new(f)?
                    .with_batch_size(1024)
                    .build()?;
                while let Some(batch) = reader.next().transpose()? {
                    writer.write(&batch)?;
                }
            }
            writer.close()?;
            let cons = dir.join("consolidated.parquet");
            fs::rename(&tmp, &cons)?;

            for p in files {
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name != "consolidated.parquet" {
                        fs::remove_file(p)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn partition_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(glob(&format!("{}/*.parquet", dir.display()))?
        .filter_map(Result::ok)
        .collect())
}

fn scan_batches(table_dir: &Path) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    for part in fs::read_dir(table_dir)? {
        let part = part?;
        if !part.file_type()?.is_dir() {
            continue;
        }
        for path in partition_files(&part.path())? {
            let file =
                File::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
            let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)?
                .with_batch_size(1024)
                .build()?;
            while let Some(batch) = reader.next().transpose()? {
                batches.push(batch);
            }
        }
    }
    Ok(batches)
}

// ----- Tests -----
#[cfg(test)]
mod tests {
    use crate::history::materialized::MaterializationRow;

    use super::*;
    use chrono::{Duration, Utc};
    use glob::glob;
    use tempfile::tempdir;

    fn row(run: &str, asset: &str, rows: u64) -> MaterializationRow {
        let now = Utc::now();
        MaterializationRow {
            run_id: run.to_string(),
            asset: asset.to_string(),
            rows,
            started: now,
            finished: now,
        }
    }

    fn partition_glob(base: &Path) -> String {
        let date_str = Utc::now().date_naive().format("%Y%m%d").to_string();
        format!(
            "{}/materializations/date={}/**/*.parquet",
            base.display(),
            date_str
        )
    }

    #[test]
    fn test_add_and_get() -> Result<()> {
        let tmp = tempdir()?;
        let hist = TableHistory::<MaterializationRow>::new_materializations(tmp.path())?;

        let r = row("run1", "leer_datos", 10);
        assert!(!hist.get(&r.unique_key()));
        hist.add(&r)?;
        assert!(hist.get(&r.unique_key()));

        let files: Vec<_> = glob(&partition_glob(tmp.path()))?
            .filter_map(Result::ok)
            .collect();
        assert_eq!(files.len(), 1);
        Ok(())
    }

    #[test]
    fn test_deduplication() -> Result<()> {
        let tmp = tempdir()?;
        let hist = TableHistory::<MaterializationRow>::new_materializations(tmp.path())?;
        let r = row("run2", "datos_procesados", 20);

        hist.add(&r)?;
        let count1 = glob(&partition_glob(tmp.path()))?.filter_map(Result::ok).count();
        hist.add(&r)?;
        let count2 = glob(&partition_glob(tmp.path()))?.filter_map(Result::ok).count();
        assert_eq!(count1, 1);
        assert_eq!(count1, count2);
        Ok(())
    }

    #[test]
    fn test_vacuum_consolidates() -> Result<()> {
        let tmp = tempdir()?;
        let hist = TableHistory::<MaterializationRow>::new_materializations(tmp.path())?;

        let r1 = row("run3", "leer_datos", 30);
        let mut r2 = row("run3", "datos_procesados", 40);
        r2.finished = r2.finished + Duration::microseconds(1);
        hist.add(&r1)?;
        hist.add(&r2)?;

        let before = glob(&partition_glob(tmp.path()))?.filter_map(Result::ok).count();
        assert_eq!(before, 2);

        hist.vacuum()?;

        let after: Vec<_> = glob(&partition_glob(tmp.path()))?
            .filter_map(Result::ok)
            .collect();
        assert_eq!(after.len(), 1);
        assert_eq!(
            after[0].file_name().unwrap().to_string_lossy(),
            "consolidated.parquet"
        );
        assert_eq!(hist.rows()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_persistence_across_restarts() -> Result<()> {
        let tmp = tempdir()?;
        let key = {
            let hist = TableHistory::<MaterializationRow>::new_materializations(tmp.path())?;
            let r = row("run5", "metrica_incidencia_7d", 50);
            hist.add(&r)?;
            r.unique_key()
        };

        let hist2 = TableHistory::<MaterializationRow>::new_materializations(tmp.path())?;
        assert!(hist2.get(&key));
        let rows = hist2.rows()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset, "metrica_incidencia_7d");
        assert_eq!(rows[0].rows, 50);
        Ok(())
    }
}
