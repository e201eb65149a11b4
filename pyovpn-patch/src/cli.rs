//! Root CLI structure for pyovpn-patch

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pyovpn-patch")]
#[command(about = "Patch the OpenVPN Access Server licensing egg in place", long_about = None)]
#[command(version)]
#[command(author)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (can be repeated for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Patch the installed egg and deploy it
    Patch(crate::commands::patch::PatchArgs),

    /// Egg archive operations
    Egg {
        #[command(subcommand)]
        command: crate::commands::egg::EggCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
