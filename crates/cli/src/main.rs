//! apotheca CLI — the main entry point.
//!
//! Commands:
//! - `serve` — Start the HTTP gateway (seeds the store on first run)
//! - `seed`  — Create the schema and seed demo data, then exit

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "apotheca",
    about = "apotheca — streaming pharmacy agent service",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize the database schema and seed demo data
    Seed,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Seed => commands::seed::run().await?,
    }

    Ok(())
}
