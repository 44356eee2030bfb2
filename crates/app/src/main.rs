mod cli;
mod commands;
mod simulate;

use clap::Parser;

use crate::cli::{Cli, Command};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::SelectSize(args) => {
            let _ = tracing_subscriber::fmt::try_init();
            commands::select_size(args)
        }
        Command::Project(args) => {
            let _ = tracing_subscriber::fmt::try_init();
            commands::project(args)
        }
        Command::Simulate(args) => simulate::run(args),
    }
}
