use anyhow::{anyhow, Result};
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::history::table_history::{HistoryRow, TableHistory};

/// One asset materialized by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationRow {
    pub run_id: String,
    pub asset: String,
    pub rows: u64,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

pub(crate) fn micros_to_utc(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(ts).ok_or_else(|| anyhow!("timestamp {} out of range", ts))
}

pub(crate) fn downcast<'a, T: 'static>(batch: &'a RecordBatch, idx: usize) -> Result<&'a T> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("history column {} has an unexpected type", idx))
}

impl HistoryRow for MaterializationRow {
    const KEY_COLUMN: usize = 0;

    fn partition_date(&self) -> NaiveDate {
        self.finished.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("event_id", ArrowDataType::Utf8, false),
            Field::new("run_id", ArrowDataType::Utf8, false),
            Field::new("asset", ArrowDataType::Utf8, false),
            Field::new("rows", ArrowDataType::UInt64, false),
            Field::new(
                "started",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new(
                "finished",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.unique_key()])),
            Arc::new(StringArray::from(vec![self.run_id.clone()])),
            Arc::new(StringArray::from(vec![self.asset.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .started
                .timestamp_micros()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .finished
                .timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("{}--{}", self.run_id, self.asset)
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(Self {
            run_id: downcast::<StringArray>(batch, 1)?.value(row).to_string(),
            asset: downcast::<StringArray>(batch, 2)?.value(row).to_string(),
            rows: downcast::<UInt64Array>(batch, 3)?.value(row),
            started: micros_to_utc(downcast::<TimestampMicrosecondArray>(batch, 4)?.value(row))?,
            finished: micros_to_utc(downcast::<TimestampMicrosecondArray>(batch, 5)?.value(row))?,
        })
    }
}

impl TableHistory<MaterializationRow> {
    pub fn new_materializations(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::new(base, "materializations")
    }

    /// Most recent materialization of each asset.
    pub fn latest_per_asset(&self) -> Result<Vec<MaterializationRow>> {
        let mut latest: std::collections::BTreeMap<String, MaterializationRow> =
            std::collections::BTreeMap::new();
        for row in self.rows()? {
            match latest.get(&row.asset) {
                Some(prev) if prev.finished >= row.finished => {}
                _ => {
                    latest.insert(row.asset.clone(), row);
                }
            }
        }
        Ok(latest.into_values().collect())
    }
}
