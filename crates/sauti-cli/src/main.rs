//! Sauti CLI - offline tooling for the voice pipeline.

use clap::{Parser, Subcommand};
use console::style;

mod commands;
mod error;

#[derive(Debug, Parser)]
#[command(
    name = "sauti",
    about = "Tools for exercising the Sauti voice pipeline",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a WAV through the relay and write a run report
    Replay(commands::replay::ReplayArgs),
    /// Print the CLI version
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay(args) => commands::replay::execute(args).await,
        Commands::Version => {
            commands::version::execute();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}
