//! External byte-compiler invocation

use crate::error::{PatchError, Result};
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Captured output of a successful compiler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Turns one source module into a compiled artifact next to it
pub trait ModuleCompiler {
    /// Compile `source`, running with `workdir` as the current directory
    fn compile(&self, source: &Path, workdir: &Path) -> Result<CompileOutput>;
}

impl<F> ModuleCompiler for F
where
    F: Fn(&Path, &Path) -> Result<CompileOutput>,
{
    fn compile(&self, source: &Path, workdir: &Path) -> Result<CompileOutput> {
        self(source, workdir)
    }
}

/// Runs `<python> -m compileall -b <source>`
///
/// `-b` writes the legacy `module.pyc` next to the source instead of under
/// `__pycache__`, which is the layout the egg uses.
#[derive(Debug, Clone)]
pub struct PythonCompiler {
    program: String,
}

impl PythonCompiler {
    /// Use the given interpreter
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Interpreter that will be executed
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ModuleCompiler for PythonCompiler {
    fn compile(&self, source: &Path, workdir: &Path) -> Result<CompileOutput> {
        log::debug!(
            "Running {} -m compileall -b {} in {}",
            self.program,
            source.display(),
            workdir.display()
        );

        let output = Command::new(&self.program)
            .args(["-m", "compileall", "-b"])
            .arg(source)
            .current_dir(workdir)
            .output()
            .map_err(|source| PatchError::CompilerLaunch {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(PatchError::CompilerFailed {
                status: describe_status(output.status),
                stdout: or_placeholder(stdout, "(no stdout)"),
                stderr: or_placeholder(stderr, "(no stderr)"),
            });
        }

        log::trace!("Compiler stdout: {stdout}");
        Ok(CompileOutput { stdout, stderr })
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn or_placeholder(text: String, placeholder: &str) -> String {
    if text.trim().is_empty() {
        placeholder.to_string()
    } else {
        text
    }
}
