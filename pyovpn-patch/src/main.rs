//! Main entry point for the pyovpn-patch CLI

mod cli;
mod commands;
mod utils;

use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::{Generator, generate};
use std::io;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = requested_level(&cli) {
        logger.filter_level(level);
    }
    logger.init();

    match cli.command {
        Commands::Patch(args) => commands::patch::execute(args, cli.quiet).await,

        Commands::Egg { command } => commands::egg::execute(command),

        Commands::Completions { shell } => {
            print_completions(shell, &mut Cli::command());
            Ok(())
        }
    }
}

/// Level asked for on the command line, if any
fn requested_level(cli: &Cli) -> Option<log::LevelFilter> {
    let debug = matches!(&cli.command, Commands::Patch(args) if args.debug);
    match cli.verbose {
        0 if debug => Some(log::LevelFilter::Debug),
        0 if cli.quiet => Some(log::LevelFilter::Error),
        0 => None,
        1 if debug => Some(log::LevelFilter::Debug),
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

fn print_completions<G: Generator>(generator: G, cmd: &mut clap::Command) {
    generate(
        generator,
        cmd,
        cmd.get_name().to_string(),
        &mut io::stdout(),
    );
}
