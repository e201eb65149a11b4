//! Backup of the live egg and deployment of the patched one

use crate::error::{PatchError, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// UTC timestamp appended to backup names, second precision
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<name>.bak-<timestamp>` for the live egg at `live`
pub fn backup_file_name(live: &Path, at: DateTime<Utc>) -> String {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}.bak-{}", at.format(BACKUP_TIMESTAMP_FORMAT))
}

/// Copy the live egg into `backup_dir` under a timestamped name
///
/// A missing live egg is not an error (first install): `Ok(None)` is
/// returned and a warning logged. An existing backup is never overwritten.
pub fn backup(live: &Path, backup_dir: &Path, at: DateTime<Utc>) -> Result<Option<PathBuf>> {
    let mut source = match File::open(live) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("No existing live egg found to back up (first install?)");
            return Ok(None);
        }
        Err(e) => return Err(PatchError::io("read", live)(e)),
    };

    let backup_path = backup_dir.join(backup_file_name(live, at));
    let mut target = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&backup_path)
        .map_err(PatchError::io("create backup", &backup_path))?;

    io::copy(&mut source, &mut target).map_err(PatchError::io("write backup", &backup_path))?;
    copy_metadata(&source, &target).map_err(PatchError::io("copy metadata to", &backup_path))?;

    log::debug!("Backed up original egg to {}", backup_path.display());
    Ok(Some(backup_path))
}

/// Replace `live` with `patched`
///
/// The patched egg is copied to a temporary file beside `live` and renamed
/// over it, so readers see either the old or the new egg. The permissions of
/// the existing live file are kept. The parent directory of `live` must
/// already exist.
pub fn deploy(patched: &Path, live: &Path) -> Result<u64> {
    let parent = match live.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(PatchError::Io {
            action: "deploy into",
            path: parent.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "target directory does not exist"),
        });
    }

    let mut source = File::open(patched).map_err(PatchError::io("read", patched))?;
    let mut staged =
        NamedTempFile::new_in(parent).map_err(PatchError::io("stage deployment in", parent))?;

    let bytes = io::copy(&mut source, staged.as_file_mut())
        .map_err(PatchError::io("stage deployment in", parent))?;
    copy_metadata(&source, staged.as_file()).map_err(PatchError::io("stage deployment in", parent))?;
    if let Ok(existing) = fs::metadata(live) {
        staged
            .as_file()
            .set_permissions(existing.permissions())
            .map_err(PatchError::io("stage deployment in", parent))?;
    }
    staged
        .as_file()
        .sync_all()
        .map_err(PatchError::io("stage deployment in", parent))?;

    staged
        .persist(live)
        .map_err(|e| PatchError::io("replace", live)(e.error))?;

    log::debug!("Deployed patched egg to {}", live.display());
    Ok(bytes)
}

/// Carry permissions and modification time over, like a metadata-preserving copy
fn copy_metadata(source: &File, target: &File) -> io::Result<()> {
    let metadata = source.metadata()?;
    target.set_permissions(metadata.permissions())?;
    if let Ok(modified) = metadata.modified() {
        target.set_modified(modified)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 7, 22).unwrap()
    }

    #[test]
    fn test_backup_file_name() {
        assert_eq!(
            backup_file_name(Path::new("/usr/local/openvpn_as/lib/python/pyovpn-1.2.3.egg"), run_time()),
            "pyovpn-1.2.3.egg.bak-20240305-100722"
        );
    }

    #[test]
    fn test_backup_copies_live_egg() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("pyovpn-1.2.3.egg");
        fs::write(&live, b"live egg").unwrap();
        let backups = temp.path().join("backups");
        fs::create_dir(&backups).unwrap();

        let path = backup(&live, &backups, run_time()).unwrap().unwrap();
        assert_eq!(path, backups.join("pyovpn-1.2.3.egg.bak-20240305-100722"));
        assert_eq!(fs::read(&path).unwrap(), b"live egg");
        assert_eq!(
            fs::metadata(&path).unwrap().modified().unwrap(),
            fs::metadata(&live).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_backup_skipped_when_live_missing() {
        let temp = TempDir::new().unwrap();
        let result = backup(&temp.path().join("absent.egg"), temp.path(), run_time()).unwrap();
        assert_eq!(result, None);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_backup_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("pyovpn-1.2.3.egg");
        fs::write(&live, b"second").unwrap();
        let existing = temp.path().join("pyovpn-1.2.3.egg.bak-20240305-100722");
        fs::write(&existing, b"first").unwrap();

        assert!(backup(&live, temp.path(), run_time()).is_err());
        assert_eq!(fs::read(&existing).unwrap(), b"first");
    }

    #[test]
    fn test_deploy_replaces_live_egg() {
        let temp = TempDir::new().unwrap();
        let patched = temp.path().join("patched.egg");
        let live = temp.path().join("live").join("pyovpn-1.2.3.egg");
        fs::create_dir(temp.path().join("live")).unwrap();
        fs::write(&patched, b"patched egg").unwrap();
        fs::write(&live, b"old egg, longer than the new one").unwrap();

        let bytes = deploy(&patched, &live).unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(fs::read(&live).unwrap(), b"patched egg");
        assert_eq!(fs::read_dir(temp.path().join("live")).unwrap().count(), 1);
    }

    #[test]
    fn test_deploy_requires_parent_directory() {
        let temp = TempDir::new().unwrap();
        let patched = temp.path().join("patched.egg");
        fs::write(&patched, b"patched egg").unwrap();

        let live = temp.path().join("missing").join("pyovpn.egg");
        assert!(deploy(&patched, &live).is_err());
        assert!(!temp.path().join("missing").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_keeps_live_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let patched = temp.path().join("patched.egg");
        let live = temp.path().join("live.egg");
        fs::write(&patched, b"patched").unwrap();
        fs::write(&live, b"live").unwrap();
        fs::set_permissions(&live, fs::Permissions::from_mode(0o644)).unwrap();
        fs::set_permissions(&patched, fs::Permissions::from_mode(0o600)).unwrap();

        deploy(&patched, &live).unwrap();
        let mode = fs::metadata(&live).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
