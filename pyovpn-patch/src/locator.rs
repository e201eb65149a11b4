//! Source archive discovery

use crate::error::{PatchError, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// The selected archive
    pub path: PathBuf,
    /// Every match, in listing order; more than one means the pick was ambiguous
    pub candidates: Vec<PathBuf>,
}

impl Located {
    /// Whether more than one entry matched
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

/// Find the archive in `dir` whose file name matches `pattern`
///
/// The scan is not recursive and results are not sorted: with several
/// matches the first one the filesystem lists is taken and a warning names
/// all of them.
pub fn find_source(dir: &Path, pattern: &str) -> Result<Located> {
    let glob = Pattern::new(pattern).map_err(|source| PatchError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PatchError::SourceNotFound {
                dir: dir.to_path_buf(),
                pattern: pattern.to_string(),
            });
        }
        Err(e) => return Err(PatchError::io("list", dir)(e)),
    };

    let mut paths = Vec::new();
    for entry in listing {
        paths.push(entry.map_err(PatchError::io("list", dir))?.path());
    }

    select_candidate(paths, &glob).ok_or_else(|| PatchError::SourceNotFound {
        dir: dir.to_path_buf(),
        pattern: pattern.to_string(),
    })
}

/// Pick the first path, in the order given, whose file name matches
pub fn select_candidate<I>(paths: I, pattern: &Pattern) -> Option<Located>
where
    I: IntoIterator<Item = PathBuf>,
{
    let candidates: Vec<PathBuf> = paths
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name))
        })
        .collect();

    let path = candidates.first()?.clone();
    if candidates.len() > 1 {
        log::warn!(
            "Multiple egg files found: {:?}. Using the first one: {}",
            candidates,
            path.display()
        );
    }

    Some(Located { path, candidates })
}
