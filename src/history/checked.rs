use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, BooleanArray, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::checks::CheckResult;
use crate::history::materialized::{downcast, micros_to_utc};
use crate::history::table_history::{HistoryRow, TableHistory};

/// One check evaluation from one run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRow {
    pub run_id: String,
    pub result: CheckResult,
    pub at: DateTime<Utc>,
}

impl HistoryRow for CheckRow {
    const KEY_COLUMN: usize = 0;

    fn partition_date(&self) -> NaiveDate {
        self.at.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("event_id", ArrowDataType::Utf8, false),
            Field::new("run_id", ArrowDataType::Utf8, false),
            Field::new("check", ArrowDataType::Utf8, false),
            Field::new("asset", ArrowDataType::Utf8, false),
            Field::new("passed", ArrowDataType::Boolean, false),
            Field::new("severity", ArrowDataType::Utf8, true),
            Field::new("metadata", ArrowDataType::Utf8, false),
            Field::new(
                "at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        let r = &self.result;
        // string-keyed map; cannot fail
        let metadata = serde_json::to_string(&r.metadata).unwrap_or_default();
        vec![
            Arc::new(StringArray::from(vec![self.unique_key()])),
            Arc::new(StringArray::from(vec![self.run_id.clone()])),
            Arc::new(StringArray::from(vec![r.check.clone()])),
            Arc::new(StringArray::from(vec![r.asset.clone()])),
            Arc::new(BooleanArray::from(vec![r.passed])),
            Arc::new(StringArray::from(vec![r.severity.map(|s| s.to_string())])),
            Arc::new(StringArray::from(vec![metadata])),
            Arc::new(TimestampMicrosecondArray::from(vec![self.at.timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("{}--{}", self.run_id, self.result.check)
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        let text = |idx: usize| -> Result<String> {
            Ok(downcast::<StringArray>(batch, idx)?.value(row).to_string())
        };
        let severity_col = downcast::<StringArray>(batch, 5)?;
        let severity = if severity_col.is_null(row) {
            None
        } else {
            Some(severity_col.value(row).parse()?)
        };
        let metadata = downcast::<StringArray>(batch, 6)?.value(row);
        Ok(Self {
            run_id: text(1)?,
            result: CheckResult {
                check: text(2)?,
                asset: text(3)?,
                passed: downcast::<BooleanArray>(batch, 4)?.value(row),
                severity,
                metadata: serde_json::from_str(metadata)
                    .context("decoding stored check metadata")?,
            },
            at: micros_to_utc(downcast::<TimestampMicrosecondArray>(batch, 7)?.value(row))?,
        })
    }
}

impl TableHistory<CheckRow> {
    pub fn new_checks(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::new(base, "checks")
    }
}
