use anyhow::{Context, Result};
use clap::Parser;
use evse_load_balancer::config::Config;
use evse_load_balancer::sim::{Scenario, run_scenario};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "evse-load-balancer")]
#[command(about = "Replays a load scenario through the balancer and prints a JSON report")]
#[command(version = env!("APP_VERSION"))]
struct Cli {
    /// Scenario file (YAML)
    scenario: PathBuf,

    /// Configuration file; the default locations are searched when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the report on a single line
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    evse_load_balancer::logging::init_logging(&config.logging)?;
    info!("EVSE load balancer {} starting", env!("APP_VERSION"));

    let scenario = Scenario::from_file(&cli.scenario)
        .with_context(|| format!("loading scenario {}", cli.scenario.display()))?;
    let report = run_scenario(&scenario, &config).await?;

    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", json);
    Ok(())
}
