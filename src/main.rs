//! Temporal retrieval CLI
//!
//! Plans and runs time-ranged queries against a resource server, then prints
//! a preview or exports the full result set.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use timetrawl::{
    export::{self, ExportFormat},
    query::TimeRange,
    splitter::SplitterConfig,
    trawler::Trawler,
    types::Record,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "timetrawl")]
#[command(about = "Temporal query planner for time-series exchanges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Resource server base URL, e.g. https://rs.cos.example.org/ngsi-ld/v1
    #[arg(long, env = "TIMETRAWL_BASE_URL")]
    base_url: String,

    /// Access token for secure resources
    #[arg(long, env = "TIMETRAWL_TOKEN")]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve every observation in a time range
    During {
        /// Entity or resource id to query
        #[arg(short, long)]
        entity: String,

        /// Range start, RFC 3339 (e.g. 2021-12-01T00:00:00Z)
        #[arg(short, long)]
        start: String,

        /// Range end, RFC 3339
        #[arg(long)]
        end: String,

        /// Write results to this file instead of printing a preview
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (json, csv)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Largest page the server will return
        #[arg(long, default_value = "5000")]
        page_limit: u64,

        /// Offset window past which ranges are bisected
        #[arg(long, default_value = "50000")]
        max_offset_hits: u64,

        /// Concurrent request cap (default: one per core)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Fetch the latest observation of each resource behind an entity
    Latest {
        /// Entity or resource id to query
        #[arg(short, long)]
        entity: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut builder = Trawler::builder()
        .base_url(&cli.base_url)
        .timeout(Duration::from_secs(30));
    if let Some(token) = &cli.token {
        builder = builder.token(token.clone());
    }

    match cli.command {
        Commands::During {
            entity,
            start,
            end,
            output,
            format,
            page_limit,
            max_offset_hits,
            workers,
        } => {
            builder = builder.splitter_config(SplitterConfig {
                page_limit,
                max_offset_hits,
                ..Default::default()
            });
            if let Some(workers) = workers {
                builder = builder.workers(workers);
            }
            let trawler = builder.build().await?;
            run_during(&trawler, &entity, &start, &end, output, &format).await?;
        }

        Commands::Latest { entity } => {
            let trawler = builder.build().await?;
            run_latest(&trawler, &entity).await?;
        }
    }

    Ok(())
}

async fn run_during(
    trawler: &Trawler,
    entity: &str,
    start: &str,
    end: &str,
    output: Option<PathBuf>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let format: ExportFormat = format.parse()?;
    let range = TimeRange::new(parse_instant(start)?, parse_instant(end)?)?;

    let dataset = trawler.during(entity, range).await?;

    for warning in &dataset.warnings {
        tracing::warn!("incomplete range {}: {}", warning.range, warning.kind);
    }

    match output {
        Some(path) => {
            let file = File::create(&path)?;
            export::write_records(&dataset.records, format, file)?;
            println!("Wrote {} records to {}", dataset.len(), path.display());
        }
        None => {
            println!("Found {} records for {}", dataset.len(), entity);
            println!();
            preview(&dataset.records)?;
        }
    }

    if !dataset.is_complete() {
        println!(
            "Warning: {} sub-ranges came back incomplete (see log)",
            dataset.warnings.len()
        );
    }

    Ok(())
}

async fn run_latest(trawler: &Trawler, entity: &str) -> Result<(), Box<dyn std::error::Error>> {
    let records = trawler.latest(entity).await?;

    if records.is_empty() {
        println!("No data for {}", entity);
        return Ok(());
    }

    println!("Latest data for {} ({} records):", entity, records.len());
    println!();
    for record in &records {
        println!("{}", serde_json::to_string_pretty(record)?);
    }

    Ok(())
}

fn preview(records: &[Record]) -> Result<(), serde_json::Error> {
    for record in records.iter().take(10) {
        println!("{}", serde_json::to_string(record)?);
    }
    if records.len() > 10 {
        println!("... and {} more records", records.len() - 10);
    }
    Ok(())
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
