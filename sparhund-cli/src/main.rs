//! ## sparhund-cli
//! **Command line front end**
//! Reads a capture file or a live interface, writes conversations and
//! audit records below the output root and prints the final statistics.

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Read(args) => commands::read(args).await,
        Commands::Live(args) => commands::live(args).await,
    }
}
