//! Error types for the patch pipeline

use crate::pipeline::Stage;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Coarse classification of a fatal pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable source archive
    SourceNotFound,
    /// The compiled module to patch is absent from the archive
    MissingModule,
    /// The archive could not be parsed
    CorruptArchive,
    /// The external compiler failed or produced nothing
    CompilationError,
    /// Filesystem permissions blocked a step
    PermissionDenied,
    /// The run was interrupted between stages
    Interrupted,
    /// Anything else
    UnexpectedError,
}

/// Fatal pipeline failure
#[derive(Error, Debug)]
pub enum PatchError {
    /// Nothing in the egg directory matched the pattern
    #[error("No egg file matching {pattern} found in {}", .dir.display())]
    SourceNotFound {
        /// Directory that was scanned
        dir: PathBuf,
        /// Glob pattern matched against file names
        pattern: String,
    },

    /// The configured glob pattern is malformed
    #[error("Invalid egg pattern {pattern}: {source}")]
    InvalidPattern {
        /// Pattern as configured
        pattern: String,
        /// Parse error
        #[source]
        source: glob::PatternError,
    },

    /// The selected match is a directory or special file
    #[error("Source egg {} is not a regular file", .0.display())]
    SourceNotAFile(PathBuf),

    /// The compiled module to patch does not exist in the extracted tree
    #[error("Expected compiled module {} not found", .0.display())]
    MissingModule(PathBuf),

    /// The archive could not be parsed
    #[error("Invalid egg {}: {source}", .path.display())]
    CorruptArchive {
        /// Archive being read
        path: PathBuf,
        /// Underlying codec error
        #[source]
        source: egg_archive::Error,
    },

    /// Archive operation failed for a reason other than corruption
    #[error("Failed to {action} {}: {source}", .path.display())]
    Archive {
        /// What was being attempted
        action: &'static str,
        /// Archive or directory involved
        path: PathBuf,
        /// Underlying codec error
        #[source]
        source: egg_archive::Error,
    },

    /// The compiler could not be started
    #[error("Failed to run compiler {program}: {source}")]
    CompilerLaunch {
        /// Program that was executed
        program: String,
        /// Spawn error
        #[source]
        source: io::Error,
    },

    /// The compiler exited unsuccessfully
    #[error("Compilation failed ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    CompilerFailed {
        /// Exit status description
        status: String,
        /// Captured standard output, `(no stdout)` when empty
        stdout: String,
        /// Captured standard error, `(no stderr)` when empty
        stderr: String,
    },

    /// The compiler succeeded but the expected artifact is missing
    #[error("Compiled file {} not found after compilation", .0.display())]
    CompiledArtifactMissing(PathBuf),

    /// Filesystem permissions blocked a step
    #[error("Permission denied while trying to {action} {}: {source}", .path.display())]
    PermissionDenied {
        /// What was being attempted
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure
    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        /// What was being attempted
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An interrupt was observed at a stage boundary
    #[error("Interrupted before {0}")]
    Interrupted(Stage),
}

impl PatchError {
    /// Build a mapper for I/O errors raised while performing `action` on `path`
    pub fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                PatchError::PermissionDenied {
                    action,
                    path,
                    source,
                }
            } else {
                PatchError::Io {
                    action,
                    path,
                    source,
                }
            }
        }
    }

    /// Build a mapper for codec errors raised while performing `action` on `path`
    pub fn archive(
        action: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(egg_archive::Error) -> Self {
        let path = path.into();
        move |source| match source {
            egg_archive::Error::Io(e) if e.kind() != io::ErrorKind::UnexpectedEof => {
                Self::io(action, path)(e)
            }
            source if source.is_corruption() => PatchError::CorruptArchive { path, source },
            source @ egg_archive::Error::Unsupported(_) => {
                PatchError::CorruptArchive { path, source }
            }
            source => PatchError::Archive {
                action,
                path,
                source,
            },
        }
    }

    /// Classify this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::SourceNotFound { .. } | PatchError::SourceNotAFile(_) => {
                ErrorKind::SourceNotFound
            }
            PatchError::MissingModule(_) => ErrorKind::MissingModule,
            PatchError::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            PatchError::CompilerLaunch { .. }
            | PatchError::CompilerFailed { .. }
            | PatchError::CompiledArtifactMissing(_) => ErrorKind::CompilationError,
            PatchError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            PatchError::Interrupted(_) => ErrorKind::Interrupted,
            PatchError::InvalidPattern { .. } | PatchError::Archive { .. } | PatchError::Io { .. } => {
                ErrorKind::UnexpectedError
            }
        }
    }

    /// Operator hint shown under the error, where one applies
    pub fn hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::SourceNotFound | ErrorKind::PermissionDenied => {
                Some("Ensure the tool is run as root and the egg directory is correct.")
            }
            ErrorKind::CompilationError => {
                Some("Check that the configured Python interpreter matches the installed server.")
            }
            _ => None,
        }
    }
}
