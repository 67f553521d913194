use clap::{Parser, Subcommand};
use tracing::error;

use go_pipeline::config::{Secrets, Settings};
use go_pipeline::logging;
use go_pipeline::pipeline::{Pipeline, RunOptions};
use go_pipeline::registry::SourceFilter;

#[derive(Parser)]
#[command(name = "go_pipeline")]
#[command(about = "Guide to Omaha event ingestion pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full ingestion pipeline
    Run {
        /// Only run specific source ids (comma-separated)
        #[arg(long)]
        source: Option<String>,
        /// Only run sources in a matching area
        #[arg(long)]
        area: Option<String>,
        /// Only run sources of the given trust tier (1 or 2)
        #[arg(long)]
        tier: Option<u8>,
        /// Print results without saving
        #[arg(long)]
        dry_run: bool,
        /// Skip outbound URL validation (faster)
        #[arg(long)]
        skip_url_check: bool,
        /// Use cached page content only; no scraping
        #[arg(long)]
        skip_scrape: bool,
        /// Union with the existing event store instead of replacing it
        #[arg(long)]
        merge: bool,
        /// Scrape concurrency (default from config.toml)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Merge the accumulated store and freeze the catalog artifact
    Prebuild,
    /// Print the pipeline health report
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let secrets = Secrets::from_env();
    let pipeline = Pipeline::new(settings, secrets)?;

    match cli.command {
        Commands::Run {
            source,
            area,
            tier,
            dry_run,
            skip_url_check,
            skip_scrape,
            merge,
            concurrency,
        } => {
            let options = RunOptions {
                filter: SourceFilter {
                    ids: source.map(|s| s.split(',').map(|id| id.trim().to_string()).collect()),
                    area,
                    tier,
                },
                dry_run,
                skip_url_check,
                skip_scrape,
                merge_with_store: merge,
                concurrency,
            };

            match pipeline.run(options).await {
                Ok(report) => {
                    println!("\n📊 Pipeline run {}", report.run.run_id);
                    println!(
                        "   Sources: {}/{} succeeded",
                        report.run.sources_succeeded, report.run.total_sources
                    );
                    println!(
                        "   Events: {} raw → {} validated → {} in catalog",
                        report.run.raw_events, report.validation.output, report.catalog_events
                    );
                    println!("   Duration: {:.1}s", report.run.duration_secs);
                    if !report.alerts.is_empty() {
                        println!("\n⚠️  Alerts:");
                        for alert in &report.alerts {
                            println!("   - {alert}");
                        }
                    }
                }
                Err(e) => {
                    error!("pipeline run failed: {}", e);
                    // Crash path: dispatch the critical alert, then exit
                    // non-zero so schedulers notice.
                    pipeline.channels().critical(&e.to_string()).await;
                    eprintln!("✗ Fatal: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Prebuild => match pipeline.prebuild() {
            Ok(count) => println!("✅ Catalog frozen with {count} events"),
            Err(e) => {
                error!("prebuild failed: {}", e);
                eprintln!("✗ Fatal: {e}");
                std::process::exit(1);
            }
        },
        Commands::Report => {
            println!("{}", pipeline.health_report());
        }
    }

    Ok(())
}
