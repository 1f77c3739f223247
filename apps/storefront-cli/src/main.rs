use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{FeedArgs, SchemaArgs, SnapshotCmd};

#[derive(Parser)]
#[command(name = "storefront", version, about = "Storefront feed sync utilities")]
struct Cli {
    /// Path to a TOML config file; defaults plus STOREFRONT_* overrides when omitted
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the feed once and print the merged view (JSON)
    Feed(FeedArgs),
    /// Write the config JSON schema
    Schema(SchemaArgs),
    /// Inspect or clear the file snapshot store
    Snapshot {
        #[command(subcommand)]
        cmd: SnapshotCmd,
    },
}

#[tokio::main]
async fn main() {
    storefront_otel::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Feed(args) => {
            let cfg = commands::load(cli.config.as_deref())?;
            commands::feed::run(cfg, args).await
        }
        Commands::Schema(args) => commands::schema::run(args),
        Commands::Snapshot { cmd } => {
            let cfg = commands::load(cli.config.as_deref())?;
            commands::snapshot::run(cfg, cmd)
        }
    }
}
