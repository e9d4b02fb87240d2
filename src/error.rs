use thiserror::Error;

/// Errors callers may want to match on. Everything else travels as `anyhow::Error`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("missing required columns for {stage}: {columns:?}")]
    MissingColumns {
        stage: &'static str,
        columns: Vec<String>,
    },

    #[error("unknown asset `{0}`")]
    UnknownAsset(String),

    #[error("invalid selection `{selection}`: {reason}")]
    InvalidSelection { selection: String, reason: String },

    #[error("asset `{0}` has never been materialized; include it in the selection")]
    NotMaterialized(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
