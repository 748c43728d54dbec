use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lake_ingest::config::{LakeConfig, load_config_path};
use lake_ingest::db::migrate;
use lake_ingest::dimension::SymbolDimension;
use lake_ingest::manifest::{ManifestStatus, ManifestStore, SqliteManifestStore};
use lake_ingest::store::SqliteQuarantineStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Lake ingestion CLI")]
struct Cli {
    /// Lake config TOML. Without it, DATABASE_URL and LAKE_ROOT are read from the environment.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending schema migrations.
    Migrate,
    Manifest(ManifestCmd),
    Quarantine(QuarantineCmd),
    Dimension(DimensionCmd),
}

#[derive(Args)]
struct ManifestCmd {
    #[command(subcommand)]
    sub: ManifestSub,
}

#[derive(Subcommand)]
enum ManifestSub {
    /// Print manifest records as JSON lines.
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<ManifestStatus>,
    },
}

#[derive(Args)]
struct QuarantineCmd {
    #[command(subcommand)]
    sub: QuarantineSub,
}

#[derive(Subcommand)]
enum QuarantineSub {
    /// Row counts per table and reason.
    Summary,
}

#[derive(Args)]
struct DimensionCmd {
    #[command(subcommand)]
    sub: DimensionSub,
}

#[derive(Subcommand)]
enum DimensionSub {
    /// Load a symbol dimension snapshot and report overlapping windows.
    Check {
        /// Snapshot to check; defaults to `symbol_dimension` from the config.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn parse_status(s: &str) -> Result<ManifestStatus, String> {
    s.parse().map_err(|e: lake_ingest::manifest::RepoError| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => load_config_path(path)?,
        None => LakeConfig::from_env()?,
    };

    match cli.cmd {
        Cmd::Migrate => {
            migrate::run_all(&cfg.database_url)?;
            tracing::info!(database_url = %cfg.database_url, "migrations up to date");
        }
        Cmd::Manifest(ManifestCmd {
            sub: ManifestSub::List { status },
        }) => {
            let store = SqliteManifestStore::open(&cfg.database_url)?;
            for rec in store.list(status)? {
                println!("{}", serde_json::to_string(&rec)?);
            }
        }
        Cmd::Quarantine(QuarantineCmd {
            sub: QuarantineSub::Summary,
        }) => {
            let store = SqliteQuarantineStore::open(&cfg.database_url)?;
            for row in store.summary()? {
                println!("{}\t{}\t{}", row.table_name, row.reason, row.rows);
            }
        }
        Cmd::Dimension(DimensionCmd {
            sub: DimensionSub::Check { path },
        }) => {
            let path = path
                .or(cfg.symbol_dimension)
                .context("no dimension snapshot: pass --path or set symbol_dimension")?;
            let dim = SymbolDimension::load_parquet(&path)?;
            let overlapping = dim.overlapping_keys();
            tracing::info!(path = %path.display(), windows = dim.len(), overlapping = overlapping.len(), "dimension loaded");
            for (exchange, symbol) in &overlapping {
                println!("{exchange}\t{symbol}");
            }
        }
    }

    Ok(())
}
