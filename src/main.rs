use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tabsync::simulate::{self, Scenario};
use tabsync::SyncConfig;

/// Cross-tab auth state synchronization toolkit.
#[derive(Parser, Debug)]
#[command(name = "tabsync", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted two-tab scenario and print the final state as JSON.
    Simulate {
        #[arg(value_enum)]
        scenario: Scenario,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tabsync::telemetry::init_logging(&cli.log_level);

    let config = SyncConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Simulate { scenario } => {
            let report = simulate::run(scenario, config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
