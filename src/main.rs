//! Planning Grid CLI
//!
//! ## Usage
//!
//! ```bash
//! # Generate grids for every region in a GeoJSON file
//! planning-grid generate regions.geojson --resolution 6
//!
//! # Create v_h3_* views and their metadata rows
//! planning-grid materialize
//!
//! # Map a project to a region, then assign its planning units
//! planning-grid register-project p1 Baltic
//! planning-grid populate p1
//!
//! # Row counts
//! planning-grid stats
//! ```
//!
//! Ctrl-C stops a stage before its next unit; units already running commit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use planning_grid::db::cells;
use planning_grid::db::projects::register_project_at;
use planning_grid::grid::validate_resolution;
use planning_grid::pipeline::{self, CancelFlag, GenerateOptions};
use planning_grid::source::load_regions;
use planning_grid::{Config, GridDb};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "planning-grid")]
#[command(about = "H3 hexagonal planning grids for conservation regions")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "PLANNING_GRID_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "PLANNING_GRID_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate and store cells for every region in a GeoJSON file
    Generate {
        /// GeoJSON FeatureCollection of named regions
        source: PathBuf,

        /// H3 resolution (0-15)
        #[arg(short, long)]
        resolution: Option<u8>,

        /// Feature property holding the region name
        #[arg(long)]
        name_field: Option<String>,

        /// Append even when a region already has cells at this resolution
        #[arg(long)]
        force: bool,
    },

    /// Create a view and metadata row for every generated (region, resolution)
    Materialize,

    /// Assign missing planning units to projects (all registered projects if none given)
    Populate {
        /// Project identifiers
        projects: Vec<String>,
    },

    /// Map a project to a region
    RegisterProject {
        project_id: String,
        region_name: String,

        /// Only assign cells of this resolution
        #[arg(short, long)]
        resolution: Option<u8>,
    },

    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("planning_grid=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(GridDb::open(&config.database_path())?);

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after running units finish");
                cancel.cancel();
            }
        });
    }

    let report = match args.command {
        Command::Generate {
            source,
            resolution,
            name_field,
            force,
        } => {
            let resolution = resolution.unwrap_or(config.default_resolution);
            validate_resolution(resolution)?;
            let name_field = name_field.unwrap_or_else(|| config.region_name_field.clone());

            let dataset = tokio::task::spawn_blocking(move || load_regions(&source, &name_field)).await??;
            for skipped in &dataset.skipped {
                println!("feature #{:<35} skipped: {}", skipped.position, skipped.reason);
            }

            let options = GenerateOptions {
                resolution,
                thresholds: config.scale,
                batch_size: config.insert_batch_size,
                workers: config.generation_workers,
                force,
            };
            pipeline::generate(Arc::clone(&db), dataset.regions, options, cancel).await?
        }

        Command::Materialize => {
            let db = Arc::clone(&db);
            let thresholds = config.scale;
            tokio::task::spawn_blocking(move || pipeline::materialize(&db, thresholds, &cancel)).await??
        }

        Command::Populate { projects } => {
            let db = Arc::clone(&db);
            let batch_size = config.insert_batch_size;
            tokio::task::spawn_blocking(move || {
                pipeline::populate(db.as_ref(), db.as_ref(), &projects, batch_size, &cancel)
            })
            .await??
        }

        Command::RegisterProject {
            project_id,
            region_name,
            resolution,
        } => {
            if let Some(resolution) = resolution {
                validate_resolution(resolution)?;
            }
            db.with_conn(|conn| register_project_at(conn, &project_id, &region_name, resolution))?;
            println!("registered {} -> {}", project_id, region_name);
            return Ok(());
        }

        Command::Stats => {
            let stats = db.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            let mismatched = db.with_conn(|conn| cells::scale_mismatches(conn, &config.scale))?;
            if mismatched > 0 {
                warn!(rows = mismatched, "Stored scale tiers differ from configured thresholds");
            }
            return Ok(());
        }
    };

    println!("{}", report);
    if report.failed() > 0 {
        anyhow::bail!("{} of {} units failed", report.failed(), report.units.len());
    }
    Ok(())
}
