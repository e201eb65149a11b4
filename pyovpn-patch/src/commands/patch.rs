//! The `patch` command

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use pyovpn_patch::config::{
    DEFAULT_BACKUP_DIR, DEFAULT_EGG_DIR, DEFAULT_EGG_PATTERN, DEFAULT_PYTHON, PatchConfig,
};
use pyovpn_patch::{Notice, PatchOutcome, Pipeline};

use crate::utils::{create_spinner, format_bytes};

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Directory holding the installed egg
    #[arg(long, env = "PYOVPN_EGG_DIR", default_value = DEFAULT_EGG_DIR)]
    pub egg_dir: PathBuf,

    /// Glob pattern for the egg file name
    #[arg(long, env = "PYOVPN_EGG_PATTERN", default_value = DEFAULT_EGG_PATTERN)]
    pub pattern: String,

    /// Directory receiving the timestamped backup
    #[arg(long, env = "PYOVPN_BACKUP_DIR", default_value = DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,

    /// Live egg to replace (defaults to the located egg)
    #[arg(long, env = "PYOVPN_DEPLOY_TARGET")]
    pub deploy_target: Option<PathBuf>,

    /// Python interpreter used to byte-compile the facade
    #[arg(long, env = "PYOVPN_PYTHON", default_value = DEFAULT_PYTHON)]
    pub python: String,

    /// Create the temporary workspace under this directory
    #[arg(long)]
    pub workspace_dir: Option<PathBuf>,

    /// Keep the workspace and facade source, log at debug level
    #[arg(long, env = "PYOVPN_PATCH_DEBUG")]
    pub debug: bool,
}

impl PatchArgs {
    fn into_config(self) -> PatchConfig {
        let mut config = PatchConfig::default()
            .with_egg_dir(self.egg_dir)
            .with_egg_pattern(self.pattern)
            .with_backup_dir(self.backup_dir)
            .with_python(self.python)
            .with_debug(self.debug);
        if let Some(target) = self.deploy_target {
            config = config.with_deploy_target(target);
        }
        if let Some(dir) = self.workspace_dir {
            config = config.with_workspace_parent(dir);
        }
        config
    }
}

pub async fn execute(args: PatchArgs, quiet: bool) -> Result<()> {
    let pipeline = Pipeline::new(args.into_config());
    let interrupt = pipeline.interrupt_flag();
    let config = pipeline.config();
    log::debug!(
        "Looking for {} in {}, backups go to {}",
        config.egg_pattern,
        config.egg_dir.display(),
        config.backup_dir.display()
    );

    let spinner = (!quiet).then(|| create_spinner("Patching egg..."));
    let mut run = tokio::task::spawn_blocking(move || pipeline.run());

    let outcome = tokio::select! {
        joined = &mut run => joined.context("Patch task failed")?,
        Ok(()) = tokio::signal::ctrl_c() => {
            log::warn!("Interrupt received, stopping at the next stage boundary");
            interrupt.store(true, Ordering::SeqCst);
            run.await.context("Patch task failed")?
        }
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    render_outcome(&outcome, quiet);

    match outcome {
        PatchOutcome::Completed(_) => Ok(()),
        PatchOutcome::Aborted { stage, error, .. } => {
            Err(error).with_context(|| format!("Patch aborted while {stage}"))
        }
    }
}

fn render_outcome(outcome: &PatchOutcome, quiet: bool) {
    for notice in outcome.notices() {
        let label = match notice {
            Notice::WorkspaceRetained(_) => style("note").cyan(),
            _ => style("warning").yellow(),
        };
        eprintln!("{}: {notice}", label.bold());
    }

    match outcome {
        PatchOutcome::Completed(report) => {
            if quiet {
                return;
            }
            println!("{}", style("Patch applied").bold().green());
            println!("{}: {}", style("Source").bold(), report.source.display());
            println!(
                "{}: {} ({})",
                style("Deployed").bold(),
                report.deployed_to.display(),
                format_bytes(report.deployed_bytes)
            );
            match &report.backup {
                Some(backup) => println!("{}: {}", style("Backup").bold(), backup.display()),
                None => println!("{}: none", style("Backup").bold()),
            }
        }
        PatchOutcome::Aborted { error, .. } => {
            eprintln!("{} {}", style("Patch failed:").bold().red(), outcome.reason());
            if let Some(hint) = error.hint() {
                eprintln!("{}: {hint}", style("hint").bold());
            }
        }
    }
}
