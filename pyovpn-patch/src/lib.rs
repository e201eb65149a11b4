//! # pyovpn_patch
//!
//! Patches the licensing module of an installed OpenVPN Access Server egg.
//! The compiled `pyovpn/lic/uprop.pyc` is moved aside and replaced by a
//! facade that re-exports it, with `UsageProperties.figure()` reporting a
//! fixed `concurrent_connections` value.
//!
//! ```no_run
//! use pyovpn_patch::{PatchConfig, Pipeline};
//!
//! let outcome = Pipeline::new(PatchConfig::default()).run();
//! if !outcome.is_success() {
//!     eprintln!("{}", outcome.reason());
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod compiler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod facade;
pub mod locator;
pub mod module_patch;
pub mod pipeline;
pub mod workspace;

pub use compiler::{CompileOutput, ModuleCompiler, PythonCompiler};
pub use config::PatchConfig;
pub use error::{ErrorKind, PatchError, Result};
pub use facade::{CONCURRENT_CONNECTIONS, FacadeModule, ReturnOverride};
pub use module_patch::{ModuleLayout, ModulePatcher, ModuleState};
pub use pipeline::{Notice, PatchOutcome, PatchReport, Pipeline, Stage};
pub use workspace::Workspace;
