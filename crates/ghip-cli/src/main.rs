use anyhow::Result;
use clap::{Parser, Subcommand};
use ghip_core::{CountryCode, UpdateCategory};
use ghip_sync::{
    connect_live, maybe_build_scheduler, PgStore, RefreshReport, SyncConfig, UnitOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ghip-cli")]
#[command(about = "Global health indicator pipeline command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply the database schema.
    Migrate,
    /// Refresh one category for specific countries.
    Refresh {
        /// One of: health-status, service-coverage, risk-factors, health-systems.
        category: String,
        /// Alpha-3 country codes, any case.
        #[arg(required = true)]
        countries: Vec<String>,
    },
    /// Refresh over every country in the registry.
    RefreshAll {
        /// Restrict to one category; all four when omitted.
        category: Option<String>,
    },
    /// Serve the JSON API, plus the cron scheduler when enabled.
    Serve,
}

fn parse_category(value: &str) -> Result<UpdateCategory> {
    UpdateCategory::parse(value).ok_or_else(|| anyhow::anyhow!("unknown category {value:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command {
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("schema applied");
        }
        Commands::Refresh {
            category,
            countries,
        } => {
            let category = parse_category(&category)?;
            let countries: Vec<CountryCode> =
                countries.iter().map(|c| CountryCode::new(c)).collect();
            let orchestrator = connect_live(&config).await?;
            let report = orchestrator.refresh(category, &countries).await;
            print_report(&report);
        }
        Commands::RefreshAll { category } => {
            let categories = match category {
                Some(value) => vec![parse_category(&value)?],
                None => UpdateCategory::ALL.to_vec(),
            };
            let orchestrator = connect_live(&config).await?;
            for category in categories {
                let report = orchestrator.refresh_all(category).await;
                print_report(&report);
            }
        }
        Commands::Serve => {
            let orchestrator = connect_live(&config).await?;
            if let Some(mut scheduler) = maybe_build_scheduler(&config, orchestrator).await? {
                scheduler.start().await?;
            }
            ghip_web::serve_from_env().await?;
        }
    }

    Ok(())
}

fn print_report(report: &RefreshReport) {
    let refreshed: usize = report.units.iter().map(|u| u.refreshed.len()).sum();
    let failed_units = report.units.iter().filter(|u| !u.is_ok()).count();
    println!(
        "{} refresh: run_id={} status={:?} units={} refreshed_pairs={} failed_units={}",
        report.category,
        report.run_id,
        report.status(),
        report.units.len(),
        refreshed,
        failed_units
    );
    for unit in report.units.iter().filter(|u| !u.is_ok()) {
        match &unit.country {
            Some(country) => eprintln!("  {} [{}]: {}", unit.source, country, describe(unit)),
            None => eprintln!("  {}: {}", unit.source, describe(unit)),
        }
    }
}

fn describe(unit: &UnitOutcome) -> String {
    match &unit.error {
        Some(err) => err.clone(),
        None => format!("{} pair(s) failed to upsert", unit.failed.len()),
    }
}
