//! shellexec - run shell commands inside another local process
//!
//! One binary serves both sides: `shellexec serve` runs the execution
//! server in the target process context, `shellexec run` submits commands
//! to it (or executes them locally).

use clap::Parser;
use shellexec::commands::Commands;
use shellexec::{cli, common::logging};

#[derive(Parser)]
#[command(name = "shellexec", about = "Run shell commands inside another local process")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { .. } => {
            logging::init_server();
        }
        _ => logging::init_cli(),
    }

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
