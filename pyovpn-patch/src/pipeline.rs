//! Patch pipeline orchestration
//!
//! A run walks the stages in [`Stage::ALL`] order. The first failure ends the
//! run as [`PatchOutcome::Aborted`]; stages already completed are not rolled
//! back. The workspace is owned by the run and released on every exit path.

use crate::compiler::{ModuleCompiler, PythonCompiler};
use crate::config::PatchConfig;
use crate::deploy;
use crate::error::{PatchError, Result};
use crate::facade::ReturnOverride;
use crate::locator::find_source;
use crate::module_patch::{ModulePatcher, ModuleState};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One step of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Find the source egg
    LocateSource,
    /// Create the temporary workspace
    AcquireWorkspace,
    /// Copy the source egg into the workspace
    CopyToWorkspace,
    /// Unpack the copy
    Extract,
    /// Move the original compiled module aside
    RenameModule,
    /// Write the facade source
    WriteFacade,
    /// Run the external compiler
    Compile,
    /// Check the compiled facade exists
    VerifyArtifact,
    /// Drop the facade source
    CleanupIntermediate,
    /// Re-serialise the tree into the workspace copy
    Repack,
    /// Back up the live egg
    Backup,
    /// Replace the live egg
    Deploy,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 12] = [
        Stage::LocateSource,
        Stage::AcquireWorkspace,
        Stage::CopyToWorkspace,
        Stage::Extract,
        Stage::RenameModule,
        Stage::WriteFacade,
        Stage::Compile,
        Stage::VerifyArtifact,
        Stage::CleanupIntermediate,
        Stage::Repack,
        Stage::Backup,
        Stage::Deploy,
    ];

    /// Human readable description
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::LocateSource => "locating source egg",
            Stage::AcquireWorkspace => "creating workspace",
            Stage::CopyToWorkspace => "copying egg to workspace",
            Stage::Extract => "extracting egg",
            Stage::RenameModule => "renaming compiled module",
            Stage::WriteFacade => "writing facade module",
            Stage::Compile => "compiling facade module",
            Stage::VerifyArtifact => "verifying compiled module",
            Stage::CleanupIntermediate => "removing facade source",
            Stage::Repack => "repacking egg",
            Stage::Backup => "backing up live egg",
            Stage::Deploy => "deploying patched egg",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Non-fatal condition observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Several eggs matched; the first listed was used
    AmbiguousSource {
        /// Egg that was used
        chosen: PathBuf,
        /// Every match in listing order
        candidates: Vec<PathBuf>,
    },
    /// The egg had been patched by an earlier run
    AlreadyPatched {
        /// Alias module that was kept as the wrapped original
        alias: PathBuf,
    },
    /// There was no live egg to back up
    BackupSkipped {
        /// Live path that was missing
        live: PathBuf,
    },
    /// Debug mode kept the workspace
    WorkspaceRetained(PathBuf),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::AmbiguousSource { chosen, candidates } => write!(
                f,
                "{} eggs matched, used {}",
                candidates.len(),
                chosen.display()
            ),
            Notice::AlreadyPatched { alias } => write!(
                f,
                "egg was already patched, re-wrapped {}",
                alias.display()
            ),
            Notice::BackupSkipped { live } => {
                write!(f, "no live egg at {} to back up", live.display())
            }
            Notice::WorkspaceRetained(path) => {
                write!(f, "workspace kept at {}", path.display())
            }
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct PatchReport {
    /// Egg the patch was built from
    pub source: PathBuf,
    /// Live path that was replaced
    pub deployed_to: PathBuf,
    /// Backup of the previous live egg, if there was one
    pub backup: Option<PathBuf>,
    /// Size of the deployed egg
    pub deployed_bytes: u64,
    /// Non-fatal conditions
    pub notices: Vec<Notice>,
}

/// Terminal result of a run
#[derive(Debug)]
pub enum PatchOutcome {
    /// Every stage succeeded
    Completed(PatchReport),
    /// A stage failed; later stages were skipped
    Aborted {
        /// Stage that failed
        stage: Stage,
        /// Why it failed
        error: PatchError,
        /// Non-fatal conditions seen before the failure
        notices: Vec<Notice>,
    },
}

impl PatchOutcome {
    /// Whether the run completed
    pub fn is_success(&self) -> bool {
        matches!(self, PatchOutcome::Completed(_))
    }

    /// Notices collected during the run
    pub fn notices(&self) -> &[Notice] {
        match self {
            PatchOutcome::Completed(report) => &report.notices,
            PatchOutcome::Aborted { notices, .. } => notices,
        }
    }

    /// The failure, if the run aborted
    pub fn error(&self) -> Option<&PatchError> {
        match self {
            PatchOutcome::Completed(_) => None,
            PatchOutcome::Aborted { error, .. } => Some(error),
        }
    }

    /// One-line human readable description
    pub fn reason(&self) -> String {
        match self {
            PatchOutcome::Completed(report) => {
                format!("Deployed patched egg to {}", report.deployed_to.display())
            }
            PatchOutcome::Aborted { stage, error, .. } => {
                format!("Aborted while {stage}: {error}")
            }
        }
    }
}

/// Mutable bookkeeping for one run
struct RunState {
    stage: Stage,
    notices: Vec<Notice>,
}

/// The patch pipeline
#[derive(Debug)]
pub struct Pipeline<C = PythonCompiler> {
    config: PatchConfig,
    compiler: C,
    patch: ReturnOverride,
    interrupt: Arc<AtomicBool>,
    clock: fn() -> DateTime<Utc>,
}

impl Pipeline<PythonCompiler> {
    /// Pipeline compiling with the configured Python interpreter
    pub fn new(config: PatchConfig) -> Self {
        let compiler = PythonCompiler::new(config.python.clone());
        Self::with_compiler(config, compiler)
    }
}

impl<C: ModuleCompiler> Pipeline<C> {
    /// Pipeline using a custom compiler
    pub fn with_compiler(config: PatchConfig, compiler: C) -> Self {
        Self {
            config,
            compiler,
            patch: ReturnOverride::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
            clock: Utc::now,
        }
    }

    /// Share an interrupt flag; once set the run aborts at the next stage boundary
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Clock used for the backup timestamp
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle to the interrupt flag
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Configuration in use
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Run every stage, returning a terminal outcome
    pub fn run(&self) -> PatchOutcome {
        log::info!("Starting patch workflow");

        let mut state = RunState {
            stage: Stage::LocateSource,
            notices: Vec::new(),
        };

        match self.execute(&mut state) {
            Ok(report) => {
                log::info!("Patch workflow completed");
                PatchOutcome::Completed(report)
            }
            Err(error) => {
                log::error!("Aborting while {}: {error}", state.stage);
                PatchOutcome::Aborted {
                    stage: state.stage,
                    error,
                    notices: state.notices,
                }
            }
        }
    }

    fn enter(&self, state: &mut RunState, stage: Stage) -> Result<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(PatchError::Interrupted(stage));
        }
        state.stage = stage;
        log::debug!("Stage: {stage}");
        Ok(())
    }

    fn execute(&self, state: &mut RunState) -> Result<PatchReport> {
        let config = &self.config;
        let patcher = ModulePatcher::new(config.module.clone(), self.patch.clone());

        self.enter(state, Stage::LocateSource)?;
        let located = find_source(&config.egg_dir, &config.egg_pattern)?;
        if located.is_ambiguous() {
            state.notices.push(Notice::AmbiguousSource {
                chosen: located.path.clone(),
                candidates: located.candidates.clone(),
            });
        }
        let source = located.path;
        if !source.is_file() {
            return Err(PatchError::SourceNotAFile(source));
        }
        let live = config.deploy_target.clone().unwrap_or_else(|| source.clone());
        log::info!("Using source egg {}", source.display());

        self.enter(state, Stage::AcquireWorkspace)?;
        let workspace = match &config.workspace_parent {
            Some(parent) => Workspace::acquire_in(parent, &config.workspace_prefix, config.debug)?,
            None => Workspace::acquire(&config.workspace_prefix, config.debug)?,
        };
        if workspace.is_retained() {
            state
                .notices
                .push(Notice::WorkspaceRetained(workspace.path().to_path_buf()));
        }

        self.enter(state, Stage::CopyToWorkspace)?;
        let file_name = source
            .file_name()
            .ok_or_else(|| PatchError::SourceNotAFile(source.clone()))?;
        let working_egg = workspace.join(file_name);
        fs::copy(&source, &working_egg).map_err(PatchError::io("copy", &source))?;
        log::debug!("Copied egg to {}", working_egg.display());

        self.enter(state, Stage::Extract)?;
        let extract_dir = workspace.join("extracted");
        fs::create_dir(&extract_dir).map_err(PatchError::io("create", &extract_dir))?;
        let extracted = egg_archive::extract(&working_egg, &extract_dir)
            .map_err(PatchError::archive("extract", &working_egg))?;
        log::debug!(
            "Extracted {} files to {}",
            extracted.files,
            extract_dir.display()
        );

        self.enter(state, Stage::RenameModule)?;
        if patcher.rename_original(&extract_dir)? == ModuleState::PreviouslyPatched {
            state.notices.push(Notice::AlreadyPatched {
                alias: patcher.layout().alias_compiled(&extract_dir),
            });
        }

        self.enter(state, Stage::WriteFacade)?;
        patcher.write_facade(&extract_dir)?;

        self.enter(state, Stage::Compile)?;
        patcher.compile(&extract_dir, &self.compiler)?;

        self.enter(state, Stage::VerifyArtifact)?;
        patcher.verify_artifact(&extract_dir)?;

        self.enter(state, Stage::CleanupIntermediate)?;
        patcher.cleanup_intermediate(&extract_dir, config.debug)?;

        self.enter(state, Stage::Repack)?;
        let packed = egg_archive::repack(&extract_dir, &working_egg)
            .map_err(PatchError::archive("repack", &working_egg))?;
        log::debug!(
            "Repacked egg to {} ({} entries)",
            working_egg.display(),
            packed.files + packed.directories
        );

        self.enter(state, Stage::Backup)?;
        let backup = deploy::backup(&live, &config.backup_dir, (self.clock)())?;
        if backup.is_none() {
            state.notices.push(Notice::BackupSkipped { live: live.clone() });
        }

        self.enter(state, Stage::Deploy)?;
        let deployed_bytes = deploy::deploy(&working_egg, &live)?;
        log::info!("Deployed patched egg to {}", live.display());

        workspace.release();

        Ok(PatchReport {
            source,
            deployed_to: live,
            backup,
            deployed_bytes,
            notices: std::mem::take(&mut state.notices),
        })
    }
}
