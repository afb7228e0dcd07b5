use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "udaq")]
#[command(about = "UDP telemetry acquisition and rebroadcast service", long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.config/udaq/udaq.yml, then /etc/udaq/udaq.yml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition service (the default)
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate schema-shaped telemetry packets for testing
    Simulate(udaq::cli::simulate::SimulateArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default settings file
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "udaq=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            udaq::cli::run::run(cli.settings).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                udaq::cli::config::init(stdout)?;
            }
        },
        Some(Commands::Simulate(args)) => {
            udaq::cli::simulate::run(args).await?;
        }
    }

    Ok(())
}
