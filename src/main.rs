use anyhow::Result;
use clap::{Parser, Subcommand};
use covid_pipeline::{
    checks::CheckKey,
    config::{Overrides, PipelineConfig},
    profile, AssetKey, Pipeline, RunSummary,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "COVID-19 incidence pipeline (OWID → reports)")]
struct Args {
    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Source CSV URL or path
    #[arg(long, global = true)]
    source: Option<String>,
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    /// Used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Materialize an asset selection, e.g. "leer_datos++"
    Materialize {
        #[arg(long, default_value = "leer_datos++")]
        select: String,
    },
    /// List assets, their dependencies and checks
    List,
    /// Show the latest materialization of each asset
    History,
    /// Profile a CSV extract
    Profile {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "reports/tabla_perfilado.csv")]
        output: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let flags = Overrides {
        source: args.source.clone(),
        storage_dir: args.storage_dir.clone(),
        reports_dir: args.reports_dir.clone(),
    };
    PipelineConfig::load(args.config.as_deref(), &flags)
}

fn print_summary(summary: &RunSummary) {
    println!("run {}", summary.run_id);
    for m in &summary.materialized {
        println!(
            "  ✔ {:<24} {:>8} rows  {:>6} ms",
            m.asset.as_str(),
            m.rows,
            (m.finished - m.started).num_milliseconds()
        );
    }
    for s in &summary.skipped {
        println!("  ⏭ {:<24} skipped", s.as_str());
    }
    for c in &summary.checks {
        let status = if c.passed { "PASS" } else { "FAIL" };
        let severity = c.severity.map(|s| s.to_string()).unwrap_or_default();
        let metadata = serde_json::to_string(&c.metadata).unwrap_or_default();
        println!(
            "  {} {:<5} {:<30} {}",
            status, severity, c.check, metadata
        );
    }
}

fn print_assets(pipeline: &Pipeline) {
    let graph = pipeline.graph();
    for asset in graph.topological_sort().unwrap_or_default() {
        let deps: Vec<&str> = graph.parents(asset).iter().map(AssetKey::as_str).collect();
        println!(
            "{:<24} [{}] deps: {}",
            asset.as_str(),
            asset.group(),
            if deps.is_empty() { "-".to_string() } else { deps.join(", ") }
        );
        println!("    {}", asset.description());
        for check in CheckKey::for_asset(asset) {
            println!("    check {}: {}", check.as_str(), check.description());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) dispatch ─────────────────────────────────────────────────
    match &args.command {
        Command::Materialize { select } => {
            let pipeline = Pipeline::new(load_config(&args)?)?;
            let summary = pipeline.materialize(select).await?;
            print_summary(&summary);
        }
        Command::List => {
            let pipeline = Pipeline::new(load_config(&args)?)?;
            print_assets(&pipeline);
        }
        Command::History => {
            let pipeline = Pipeline::new(load_config(&args)?)?;
            for row in pipeline.history().materializations.latest_per_asset()? {
                println!(
                    "{:<24} {:>8} rows  {}  run {}",
                    row.asset,
                    row.rows,
                    row.finished.format("%Y-%m-%d %H:%M:%S"),
                    row.run_id
                );
            }
        }
        Command::Profile { input, output } => {
            let rows = profile::profile(input, output)?;
            info!(rows = rows.len(), "profiled {}", input.display());
        }
    }

    Ok(())
}
