mod classify;
mod cursor;
mod db;
mod record;
mod resolver;
mod scrape;
mod skills;
mod taxonomy;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::taxonomy::{SheetConfig, TaxonomyTable};

#[derive(Parser)]
#[command(name = "rome_scraper", about = "ROME occupation taxonomy scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TaxonomyArgs {
    /// Local path of the taxonomy workbook
    #[arg(long, default_value = taxonomy::DEFAULT_WORKBOOK_PATH)]
    file: PathBuf,
    /// Download URL used when the workbook file is missing
    #[arg(long, default_value = taxonomy::DEFAULT_WORKBOOK_URL)]
    url: String,
    /// Sheet name inside the workbook
    #[arg(long)]
    sheet: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape occupation pages for every taxonomy row (stage 1, resumable)
    Ingest {
        #[command(flatten)]
        taxonomy: TaxonomyArgs,
        /// Max taxonomy rows to process (default: all remaining)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Generate and patch skill lists into records (stage 2)
    Skills {
        /// Max records to enrich (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Backfill domain/sub-domain names from the taxonomy (stage 3)
    Classify {
        #[command(flatten)]
        taxonomy: TaxonomyArgs,
    },
    /// All three stages in order, aborting on the first failure
    Run {
        #[command(flatten)]
        taxonomy: TaxonomyArgs,
        /// Max taxonomy rows to process in stage 1
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show sink statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest { taxonomy, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let table = load_taxonomy(&taxonomy).await?;
            let stats = scrape::run_ingest(&conn, &table, limit).await?;
            println!(
                "Ingest done: {} rows ({} inserted, {} existing, {} skipped, {} errors)",
                stats.rows, stats.inserted, stats.existing, stats.skipped, stats.errors
            );
            Ok(())
        }
        Commands::Skills { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let stats = skills::run_skills(&conn, &skills::Passthrough, limit)?;
            println!(
                "Skills done: {} patched, {} errors",
                stats.patched, stats.errors
            );
            Ok(())
        }
        Commands::Classify { taxonomy } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let table = load_taxonomy(&taxonomy).await?;
            let updated = classify::run_classify(&conn, &table)?;
            println!("Classify done: {} records updated", updated);
            Ok(())
        }
        Commands::Run { taxonomy, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let table = load_taxonomy(&taxonomy).await?;

            let t_ingest = Instant::now();
            let stats = scrape::run_ingest(&conn, &table, limit).await?;
            println!(
                "Ingest: {} rows ({} inserted, {} existing, {} skipped, {} errors) in {:.1}s",
                stats.rows,
                stats.inserted,
                stats.existing,
                stats.skipped,
                stats.errors,
                t_ingest.elapsed().as_secs_f64()
            );

            let sk = skills::run_skills(&conn, &skills::Passthrough, None)?;
            println!("Skills: {} patched, {} errors", sk.patched, sk.errors);

            let updated = classify::run_classify(&conn, &table)?;
            println!("Classify: {} records updated", updated);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Records:     {}", s.total);
            println!("With skills: {}", s.with_skills);
            println!("With domain: {}", s.with_domain);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Fetch the workbook if needed, then load the configured sheet.
async fn load_taxonomy(args: &TaxonomyArgs) -> Result<TaxonomyTable> {
    let client = scrape::http_client()?;
    taxonomy::ensure_workbook(&client, &args.url, &args.file).await?;

    let mut cfg = SheetConfig::default();
    if let Some(sheet) = &args.sheet {
        cfg.sheet = sheet.clone();
    }
    TaxonomyTable::load(&args.file, &cfg)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
