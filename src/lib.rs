pub mod assets;
pub mod checks;
pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod history;
pub mod process;
pub mod profile;
pub mod report;
pub mod runner;
pub mod storage;

pub use assets::{AssetKey, AssetValue};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use runner::{Pipeline, RunSummary};
