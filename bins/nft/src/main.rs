//! nft-rules - list and install nf_tables rules.

mod commands;

use clap::{Parser, Subcommand};
use nftlink::nftables::Connection;

#[derive(Parser)]
#[command(name = "nft-rules", version, about = "nf_tables rule tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the rules of a chain.
    #[command(visible_alias = "ls")]
    List(commands::list::ListCmd),

    /// Append a rule matching an upper-layer protocol.
    Add(commands::add::AddCmd),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut conn = Connection::new()?;

    match cli.command {
        Command::List(cmd) => cmd.run(&mut conn).await,
        Command::Add(cmd) => cmd.run(&mut conn).await,
    }
}
