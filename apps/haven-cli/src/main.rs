use anyhow::Result;
use clap::{Parser, Subcommand};
use haven_core::Settings;

mod commands;

use commands::{ChatArgs, DownloadArgs, JsonArgs, SchemaArgs};

#[derive(Parser)]
#[command(name = "haven", version, about = "Manage the on-device model asset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print effective paths and settings (JSON)
    Paths(JsonArgs),
    /// Reconcile with disk and print the asset state (JSON)
    Status(JsonArgs),
    /// Fetch, verify and install the asset; Ctrl-C cancels
    Download(DownloadArgs),
    /// Remove the asset, partial files and descriptor
    Delete,
    /// Check the installed asset against its descriptor
    Verify(JsonArgs),
    /// Send one message through the provider selector
    Chat(ChatArgs),
    /// Write the config JSON schema
    Schema(SchemaArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Paths(args) => commands::paths::run(&settings()?, args),
        Commands::Status(args) => commands::assets::status(settings()?, args).await,
        Commands::Download(args) => commands::assets::download(settings()?, args).await,
        Commands::Delete => commands::assets::delete(settings()?).await,
        Commands::Verify(args) => commands::assets::verify(&settings()?, args).await,
        Commands::Chat(args) => commands::chat::run(settings()?, args).await,
        Commands::Schema(args) => commands::schema::run(args),
    }
}

/// Load settings and install logging; the log directory comes from them.
fn settings() -> Result<Settings> {
    let settings = Settings::load();
    haven_otel::init_with_logs_dir(settings.as_ref().ok().map(|s| s.logs_dir.as_path()));
    settings
}
