use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

mod config;
mod corrections;
mod error;
mod exclusion;
mod geometry;
mod logging;
mod normalize;
mod owner_map;
mod ownership;
mod pipeline;
mod reconcile;
mod records;
mod resolver;
mod storage;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "owntrack")]
#[command(about = "Carries parcel owner identities forward across years of tax records")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to ./owntrack.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `input_root`
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Overrides `output_root`
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build own-id-map.csv from past years' tables and the correction sheets
    BuildMap {
        /// Last year to read (defaults to every configured year)
        #[arg(long)]
        through: Option<u32>,
    },
    /// Resolve owner ids for a new year's table
    Resolve {
        #[arg(long)]
        year: u32,
    },
    /// Flag changed owners in a year and write the review sheet
    Reconcile {
        #[arg(long)]
        year: u32,
        /// Year to compare against (defaults to the previous configured year)
        #[arg(long)]
        prior: Option<u32>,
    },
    /// Build the multi-year ownership dataset and load it
    Clean {
        /// Write files only
        #[arg(long)]
        skip_db: bool,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading config")?;
    if let Some(input) = cli.input {
        config.input_root = input;
    }
    if let Some(output) = cli.output {
        config.output_root = output;
    }
    let _guard = logging::init_logging(&config.output_root).context("setting up logging")?;

    match cli.command {
        Commands::BuildMap { through } => {
            let map = pipeline::build_map(&config, through).context("building owner map")?;
            println!("owner map: {} entries", map.len());
        }
        Commands::Resolve { year } => {
            let stats = pipeline::resolve_year(&config, year)
                .with_context(|| format!("resolving {}", year))?;
            println!(
                "{}: {} resolved ({} existing, {} primary, {} secondary), {} unresolved",
                year,
                stats.resolved(),
                stats.existing,
                stats.primary,
                stats.secondary,
                stats.unresolved
            );
        }
        Commands::Reconcile { year, prior } => {
            let summary = pipeline::reconcile_year(&config, year, prior)
                .with_context(|| format!("reconciling {}", year))?;
            println!(
                "{}: {} records, {} flagged, {} names to review",
                year, summary.records, summary.flagged, summary.review_rows
            );
        }
        Commands::Clean { skip_db } => {
            let summary = pipeline::clean(&config, skip_db).context("cleaning ownership data")?;
            println!(
                "kept {} parcels ({} unresolved, {} excluded, {} below {} parcels)",
                summary.combine.kept,
                summary.combine.unresolved,
                summary.combine.excluded,
                summary.combine.small_owners,
                config.min_parcels
            );
            println!(
                "{} owner/taxpayer pairs, {} taxpayer mailing records",
                summary.owner_taxpayers, summary.taxpayers
            );
            if summary.loaded {
                println!("loaded into {}", config.database_url);
            }
        }
    }
    info!("done");
    Ok(())
}
