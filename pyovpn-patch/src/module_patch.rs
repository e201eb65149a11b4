//! Module substitution inside an extracted egg
//!
//! The patch moves the original compiled module to an alias name, writes a
//! facade source module under the original name, compiles it, and drops the
//! source again so only bytecode ships, as in the original egg.

use crate::compiler::ModuleCompiler;
use crate::error::{PatchError, Result};
use crate::facade::{FacadeModule, ReturnOverride};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the module pair lives inside the egg and what it is called
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    /// Package path components, e.g. `["pyovpn", "lic"]`
    pub package: Vec<String>,
    /// Import name of the module being replaced
    pub module: String,
    /// Name the original module is moved to
    pub alias: String,
    /// Extension of compiled modules
    pub compiled_ext: String,
    /// Extension of source modules
    pub source_ext: String,
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self {
            package: vec!["pyovpn".to_string(), "lic".to_string()],
            module: "uprop".to_string(),
            alias: "uprop2".to_string(),
            compiled_ext: "pyc".to_string(),
            source_ext: "py".to_string(),
        }
    }
}

impl ModuleLayout {
    /// Dotted package name, e.g. `pyovpn.lic`
    pub fn package_name(&self) -> String {
        self.package.join(".")
    }

    /// Package directory inside an extracted tree
    pub fn package_dir(&self, root: &Path) -> PathBuf {
        self.package.iter().fold(root.to_path_buf(), |dir, part| dir.join(part))
    }

    /// `uprop.pyc`
    pub fn original_compiled(&self, root: &Path) -> PathBuf {
        self.package_dir(root)
            .join(format!("{}.{}", self.module, self.compiled_ext))
    }

    /// `uprop2.pyc`
    pub fn alias_compiled(&self, root: &Path) -> PathBuf {
        self.package_dir(root)
            .join(format!("{}.{}", self.alias, self.compiled_ext))
    }

    /// `uprop.py`
    pub fn facade_source(&self, root: &Path) -> PathBuf {
        self.package_dir(root)
            .join(format!("{}.{}", self.module, self.source_ext))
    }
}

/// State of the module pair found before patching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Only the original module was present; it now lives under the alias
    Pristine,
    /// The alias already existed, so the tree came from an earlier run.
    /// The alias keeps the true original and the previous facade is discarded.
    PreviouslyPatched,
}

/// Performs the substitution steps on one extracted tree
#[derive(Debug, Clone)]
pub struct ModulePatcher {
    layout: ModuleLayout,
    patch: ReturnOverride,
}

impl ModulePatcher {
    /// Patcher for `layout` applying `patch`
    pub fn new(layout: ModuleLayout, patch: ReturnOverride) -> Self {
        Self { layout, patch }
    }

    /// Module layout in use
    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// Move the original compiled module aside under the alias name
    pub fn rename_original(&self, root: &Path) -> Result<ModuleState> {
        let original = self.layout.original_compiled(root);
        let alias = self.layout.alias_compiled(root);

        if !original.is_file() {
            log::error!("Expected {} not found, aborting.", original.display());
            return Err(PatchError::MissingModule(original));
        }

        if alias.is_file() {
            log::warn!(
                "{} already present, egg was patched before; keeping it as the wrapped module",
                alias.display()
            );
            fs::remove_file(&original).map_err(PatchError::io("remove previous facade", &original))?;
            return Ok(ModuleState::PreviouslyPatched);
        }

        fs::rename(&original, &alias).map_err(PatchError::io("rename", &original))?;
        log::debug!(
            "Renamed {} to {}",
            self.layout.original_compiled(Path::new("")).display(),
            self.layout.alias_compiled(Path::new("")).display()
        );
        Ok(ModuleState::Pristine)
    }

    /// Write the facade source module, returning its path
    pub fn write_facade(&self, root: &Path) -> Result<PathBuf> {
        let path = self.layout.facade_source(root);
        let package = self.layout.package_name();
        let source = FacadeModule::new(&package, &self.layout.alias, &self.patch).render();

        fs::write(&path, source).map_err(PatchError::io("write", &path))?;
        log::debug!("Wrote new {}", path.display());
        Ok(path)
    }

    /// Compile the facade source with `compiler`
    pub fn compile<C: ModuleCompiler + ?Sized>(&self, root: &Path, compiler: &C) -> Result<()> {
        let source = self.layout.facade_source(root);
        let workdir = self.layout.package_dir(root);
        let output = compiler.compile(&source, &workdir)?;
        if !output.stderr.trim().is_empty() {
            log::debug!("Compiler stderr: {}", output.stderr.trim());
        }
        log::debug!("Compiled {} to bytecode", source.display());
        Ok(())
    }

    /// Check the compiled facade exists under the original import name
    pub fn verify_artifact(&self, root: &Path) -> Result<PathBuf> {
        let compiled = self.layout.original_compiled(root);
        if compiled.is_file() {
            Ok(compiled)
        } else {
            log::error!("Compiled file {} not found, aborting.", compiled.display());
            Err(PatchError::CompiledArtifactMissing(compiled))
        }
    }

    /// Remove the facade source unless it should be kept for inspection
    pub fn cleanup_intermediate(&self, root: &Path, keep: bool) -> Result<()> {
        let source = self.layout.facade_source(root);
        if keep {
            log::debug!("Left {}", source.display());
            return Ok(());
        }

        match fs::remove_file(&source) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PatchError::io("remove", &source)(e)),
        }
        log::debug!("Removed {}", source.display());
        Ok(())
    }
}
