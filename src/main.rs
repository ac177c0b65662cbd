use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod analyzer;
mod db;
mod models;
mod report;
mod retention;
mod snapshot;
mod store;

use models::Level;
use store::{FsAttendanceStore, RetentionStore, SnapshotStore};

#[derive(Parser)]
#[command(name = "attendance-streaks")]
#[command(about = "Daily attendance snapshots and consecutive absence/tardiness analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import raw check-in/out events from a CSV file
    ImportEvents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Build today's snapshot and update the retention window
    Ingest {
        #[arg(long, value_enum)]
        level: Level,
        /// Day to ingest; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Directory holding snapshots and retention indexes
        #[arg(long, default_value = "attendance-data")]
        data_dir: PathBuf,
        /// Include exit marks; defaults per level (secondary yes, primary no)
        #[arg(long)]
        track_exit: Option<bool>,
    },
    /// Analyze the retained window for consecutive absences and tardies
    Report {
        #[arg(long, value_enum)]
        level: Level,
        #[arg(long, default_value = "attendance-data")]
        data_dir: PathBuf,
        #[arg(long)]
        skip_absences: bool,
        #[arg(long)]
        skip_tardies: bool,
        /// Write the markdown report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportEvents { csv } => {
            let inserted = db::import_events_csv(&pool, &csv).await?;
            println!("Inserted {inserted} events from {}.", csv.display());
        }
        Commands::Ingest {
            level,
            date,
            data_dir,
            track_exit,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let track_exit = track_exit.unwrap_or(level == Level::Secondary);

            let config = db::fetch_report_config(&pool, level).await?;
            let students = db::fetch_active_students(&pool, level).await?;
            let events = db::fetch_raw_events(&pool, level, date).await?;
            let daily =
                snapshot::build_daily_snapshot(&students, &events, level, date, track_exit);

            let fs_store = FsAttendanceStore::open(&data_dir)
                .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
            let reference = fs_store.put(&daily)?;
            let index = fs_store.load_index(level)?;
            let (index, evicted) = retention::update_retention(
                index,
                date,
                reference.clone(),
                config.retention_bound(),
                &fs_store,
            );
            fs_store.save_index(level, &index)?;

            println!("Snapshot for {level} on {date} stored as {reference}.");
            println!(
                "Retention window now holds {} day(s); {} snapshot(s) evicted.",
                index.len(),
                evicted.len()
            );
        }
        Commands::Report {
            level,
            data_dir,
            skip_absences,
            skip_tardies,
            out,
        } => {
            let config = db::fetch_report_config(&pool, level).await?;
            let fs_store = FsAttendanceStore::open(&data_dir)
                .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
            let index = fs_store.load_index(level)?;

            let availability = retention::check_availability(
                &index,
                config.absence_threshold,
                config.tardiness_threshold,
            );
            let want_absences = !skip_absences && availability.enough_for_absences;
            let want_tardies = !skip_tardies && availability.enough_for_tardies;

            if !want_absences && !want_tardies {
                println!(
                    "Nothing to analyze for {level}: {} day(s) retained, need {} for absences and {} for tardies.",
                    availability.snapshots.len(),
                    config.absence_threshold,
                    config.tardiness_threshold
                );
                return Ok(());
            }

            let (roster, classrooms) = db::fetch_roster_maps(&pool, level).await?;
            let results = analyzer::analyze_consecutive(
                &availability.snapshots,
                &config,
                want_absences,
                want_tardies,
                &fs_store,
                &roster,
                &classrooms,
            );

            let rendered = report::build_report(level, &config, &results);
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}
