use anyhow::Result;
use clap::{Parser, Subcommand};
use relaydrop::common::{ConfigOverrides, RelayConfig};
use relaydrop::server;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaydrop")]
#[command(about = "Upload a file once, share a code, download it once")]
struct Cli {
    /// TOML config file; RELAY_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relaydrop=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { overrides } => {
            let config = RelayConfig::load(cli.config.as_deref(), &overrides)?;
            server::start_server(config).await
        }
        Commands::Config { overrides } => {
            let config = RelayConfig::load(cli.config.as_deref(), &overrides)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
