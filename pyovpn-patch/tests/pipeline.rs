//! End-to-end tests of the patch pipeline against eggs built on the fly

use chrono::{DateTime, TimeZone, Utc};
use egg_archive::{EggArchive, EggBuilder};
use pretty_assertions::assert_eq;
use pyovpn_patch::{
    CompileOutput, ErrorKind, Notice, PatchConfig, PatchError, PatchOutcome, Pipeline, Stage,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const ORIGINAL_MODULE: &[u8] = b"original uprop bytecode";

/// Directories used by one test run
struct Fixture {
    _temp: TempDir,
    eggs: PathBuf,
    backups: PathBuf,
    workspaces: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let eggs = temp.path().join("lib").join("python");
        let backups = temp.path().join("backups");
        let workspaces = temp.path().join("work");
        for dir in [&eggs, &backups, &workspaces] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            _temp: temp,
            eggs,
            backups,
            workspaces,
        }
    }

    fn config(&self) -> PatchConfig {
        PatchConfig::default()
            .with_egg_dir(&self.eggs)
            .with_backup_dir(&self.backups)
            .with_workspace_parent(&self.workspaces)
    }

    fn write_egg(&self, name: &str, with_module: bool) -> PathBuf {
        let path = self.eggs.join(name);
        let mut builder = EggBuilder::new()
            .add_directory("EGG-INFO/")
            .add_file_data(b"Name: pyovpn\nVersion: 2.0\n".to_vec(), "EGG-INFO/PKG-INFO")
            .add_directory("pyovpn/")
            .add_file_data(b"pkg".to_vec(), "pyovpn/__init__.pyc")
            .add_directory("pyovpn/lic/")
            .add_file_data(b"lic".to_vec(), "pyovpn/lic/__init__.pyc");
        if with_module {
            builder = builder.add_file_data(ORIGINAL_MODULE.to_vec(), "pyovpn/lic/uprop.pyc");
        }
        builder.build(&path).unwrap();
        path
    }

    fn backup_count(&self) -> usize {
        fs::read_dir(&self.backups).unwrap().count()
    }

    fn workspace_count(&self) -> usize {
        fs::read_dir(&self.workspaces).unwrap().count()
    }
}

fn first_run() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 10, 7, 22).unwrap()
}

fn second_run() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap()
}

/// Writes the facade source verbatim as the compiled artifact
fn copying_compiler(source: &Path, _workdir: &Path) -> pyovpn_patch::Result<CompileOutput> {
    fs::copy(source, source.with_extension("pyc")).unwrap();
    Ok(CompileOutput::default())
}

fn failing_compiler(_source: &Path, _workdir: &Path) -> pyovpn_patch::Result<CompileOutput> {
    Err(PatchError::CompilerFailed {
        status: "exit code 1".to_string(),
        stdout: "(no stdout)".to_string(),
        stderr: "SyntaxError: invalid syntax".to_string(),
    })
}

fn read_entry(egg: &Path, name: &str) -> Option<Vec<u8>> {
    let mut archive = EggArchive::open(egg).unwrap();
    archive.find(name)?;
    Some(archive.read_file(name).unwrap())
}

#[test]
fn test_patch_replaces_module_and_backs_up() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    let before = fs::read(&live).unwrap();

    let outcome = Pipeline::with_compiler(fixture.config(), copying_compiler)
        .with_clock(first_run)
        .run();

    let PatchOutcome::Completed(report) = outcome else {
        panic!("patch failed: {}", outcome.reason());
    };
    assert_eq!(report.source, live);
    assert_eq!(report.deployed_to, live);
    assert!(report.notices.is_empty());

    let backup = report.backup.unwrap();
    assert_eq!(
        backup,
        fixture.backups.join("pyovpn-2.0-py3.10.egg.bak-20240305-100722")
    );
    assert_eq!(fs::read(&backup).unwrap(), before);

    assert_eq!(
        read_entry(&live, "pyovpn/lic/uprop2.pyc").unwrap(),
        ORIGINAL_MODULE
    );
    let facade = String::from_utf8(read_entry(&live, "pyovpn/lic/uprop.pyc").unwrap()).unwrap();
    assert!(facade.starts_with("from pyovpn.lic import uprop2 as _inner\n"));
    assert!(facade.contains("ret['concurrent_connections'] = 200"));
    assert_eq!(read_entry(&live, "pyovpn/lic/uprop.py"), None);
    assert_eq!(read_entry(&live, "pyovpn/__init__.pyc").unwrap(), b"pkg");
    assert_eq!(
        read_entry(&live, "EGG-INFO/PKG-INFO").unwrap(),
        b"Name: pyovpn\nVersion: 2.0\n"
    );

    assert_eq!(fixture.workspace_count(), 0);
}

#[test]
fn test_missing_source_changes_nothing() {
    let fixture = Fixture::new();
    fs::write(fixture.eggs.join("README"), b"not an egg").unwrap();

    let pipeline = Pipeline::with_compiler(fixture.config(), copying_compiler);
    assert_eq!(pipeline.config().egg_dir, fixture.eggs);
    let outcome = pipeline.run();

    match outcome {
        PatchOutcome::Aborted { stage, error, .. } => {
            assert_eq!(stage, Stage::LocateSource);
            assert_eq!(error.kind(), ErrorKind::SourceNotFound);
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fixture.backup_count(), 0);
    assert_eq!(fixture.workspace_count(), 0);
}

#[test]
fn test_directory_matching_pattern_is_rejected() {
    let fixture = Fixture::new();
    fs::create_dir(fixture.eggs.join("pyovpn-2.0-py3.10.egg")).unwrap();

    let outcome = Pipeline::with_compiler(fixture.config(), copying_compiler).run();
    assert!(matches!(
        outcome.error(),
        Some(PatchError::SourceNotAFile(_))
    ));
}

#[test]
fn test_missing_module_leaves_live_egg_untouched() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", false);
    let before = fs::read(&live).unwrap();

    let outcome = Pipeline::with_compiler(fixture.config(), copying_compiler).run();

    match &outcome {
        PatchOutcome::Aborted { stage, error, .. } => {
            assert_eq!(*stage, Stage::RenameModule);
            assert_eq!(error.kind(), ErrorKind::MissingModule);
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fs::read(&live).unwrap(), before);
    assert_eq!(fixture.backup_count(), 0);
    assert_eq!(fixture.workspace_count(), 0);
}

#[test]
fn test_corrupt_egg_is_reported() {
    let fixture = Fixture::new();
    let live = fixture.eggs.join("pyovpn-2.0-py3.10.egg");
    fs::write(&live, b"this is not a zip archive at all").unwrap();

    let outcome = Pipeline::with_compiler(fixture.config(), copying_compiler).run();

    match &outcome {
        PatchOutcome::Aborted { stage, error, .. } => {
            assert_eq!(*stage, Stage::Extract);
            assert_eq!(error.kind(), ErrorKind::CorruptArchive);
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fs::read(&live).unwrap(), b"this is not a zip archive at all");
}

#[test]
fn test_compiler_failure_skips_backup_and_deploy() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    let before = fs::read(&live).unwrap();

    let outcome = Pipeline::with_compiler(fixture.config(), failing_compiler).run();

    match &outcome {
        PatchOutcome::Aborted { stage, error, .. } => {
            assert_eq!(*stage, Stage::Compile);
            assert_eq!(error.kind(), ErrorKind::CompilationError);
            assert!(error.to_string().contains("SyntaxError"));
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fs::read(&live).unwrap(), before);
    assert_eq!(fixture.backup_count(), 0);
    assert_eq!(fixture.workspace_count(), 0);
}

#[test]
fn test_silent_compiler_is_caught_by_verification() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    let before = fs::read(&live).unwrap();

    let silent = |_: &Path, _: &Path| -> pyovpn_patch::Result<CompileOutput> {
        Ok(CompileOutput::default())
    };
    let outcome = Pipeline::with_compiler(fixture.config(), silent).run();

    match &outcome {
        PatchOutcome::Aborted { stage, error, .. } => {
            assert_eq!(*stage, Stage::VerifyArtifact);
            assert!(matches!(error, PatchError::CompiledArtifactMissing(_)));
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fs::read(&live).unwrap(), before);
}

#[test]
fn test_second_run_wraps_the_true_original() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);

    let first = Pipeline::with_compiler(fixture.config(), copying_compiler)
        .with_clock(first_run)
        .run();
    assert!(first.is_success());
    let after_first = fs::read(&live).unwrap();

    let second = Pipeline::with_compiler(fixture.config(), copying_compiler)
        .with_clock(second_run)
        .run();
    let PatchOutcome::Completed(report) = second else {
        panic!("second patch failed: {}", second.reason());
    };

    assert!(
        report
            .notices
            .iter()
            .any(|n| matches!(n, Notice::AlreadyPatched { .. }))
    );
    assert_eq!(
        read_entry(&live, "pyovpn/lic/uprop2.pyc").unwrap(),
        ORIGINAL_MODULE
    );
    let facade = String::from_utf8(read_entry(&live, "pyovpn/lic/uprop.pyc").unwrap()).unwrap();
    assert!(facade.contains("import uprop2 as _inner"));
    assert_eq!(read_entry(&live, "pyovpn/lic/uprop3.pyc"), None);

    // The second backup holds the once-patched egg
    assert_eq!(fixture.backup_count(), 2);
    assert_eq!(fs::read(report.backup.unwrap()).unwrap(), after_first);
}

#[test]
fn test_debug_retains_workspace_and_source() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);

    let outcome = Pipeline::with_compiler(fixture.config().with_debug(true), copying_compiler)
        .with_clock(first_run)
        .run();
    let PatchOutcome::Completed(report) = outcome else {
        panic!("patch failed: {}", outcome.reason());
    };

    let retained = report
        .notices
        .iter()
        .find_map(|n| match n {
            Notice::WorkspaceRetained(path) => Some(path.clone()),
            _ => None,
        })
        .unwrap();
    assert!(retained.starts_with(&fixture.workspaces));
    assert!(
        retained
            .join("extracted")
            .join("pyovpn")
            .join("lic")
            .join("uprop.py")
            .is_file()
    );
    assert!(read_entry(&live, "pyovpn/lic/uprop.py").is_some());
}

#[test]
fn test_deploy_target_without_live_egg_skips_backup() {
    let fixture = Fixture::new();
    let source = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    let target_dir = fixture.workspaces.parent().unwrap().join("site");
    fs::create_dir(&target_dir).unwrap();
    let target = target_dir.join("pyovpn.egg");

    let outcome = Pipeline::with_compiler(
        fixture.config().with_deploy_target(&target),
        copying_compiler,
    )
    .run();
    let PatchOutcome::Completed(report) = outcome else {
        panic!("patch failed: {}", outcome.reason());
    };

    assert_eq!(report.deployed_to, target);
    assert_eq!(report.backup, None);
    assert_eq!(
        report.notices,
        vec![Notice::BackupSkipped {
            live: target.clone()
        }]
    );
    assert_eq!(report.deployed_bytes, fs::metadata(&target).unwrap().len());
    assert_eq!(
        read_entry(&target, "pyovpn/lic/uprop2.pyc").unwrap(),
        ORIGINAL_MODULE
    );
    // The located source is only read
    assert_eq!(
        read_entry(&source, "pyovpn/lic/uprop.pyc").unwrap(),
        ORIGINAL_MODULE
    );
}

#[test]
fn test_several_matches_use_one_and_warn() {
    let fixture = Fixture::new();
    fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    fixture.write_egg("pyovpn-2.1-py3.10.egg", true);

    let outcome = Pipeline::with_compiler(fixture.config(), copying_compiler)
        .with_clock(first_run)
        .run();
    let PatchOutcome::Completed(report) = outcome else {
        panic!("patch failed: {}", outcome.reason());
    };

    match report.notices.as_slice() {
        [Notice::AmbiguousSource { chosen, candidates }] => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(chosen, &report.source);
            assert_eq!(chosen, &candidates[0]);
        }
        other => panic!("unexpected notices: {other:?}"),
    }
    assert_eq!(fixture.backup_count(), 1);
}

#[test]
fn test_interrupt_stops_at_next_stage_boundary() {
    let fixture = Fixture::new();
    let live = fixture.write_egg("pyovpn-2.0-py3.10.egg", true);
    let before = fs::read(&live).unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    let interrupting = move |source: &Path, workdir: &Path| {
        raised.store(true, Ordering::SeqCst);
        copying_compiler(source, workdir)
    };

    let outcome = Pipeline::with_compiler(fixture.config(), interrupting)
        .with_interrupt(flag)
        .run();

    match &outcome {
        PatchOutcome::Aborted { error, .. } => {
            assert!(matches!(
                error,
                PatchError::Interrupted(Stage::VerifyArtifact)
            ));
            assert_eq!(error.kind(), ErrorKind::Interrupted);
        }
        PatchOutcome::Completed(_) => panic!("patch should not complete"),
    }
    assert_eq!(fs::read(&live).unwrap(), before);
    assert_eq!(fixture.backup_count(), 0);
    assert_eq!(fixture.workspace_count(), 0);
}

fn python3_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Egg holding `pyovpn.lic.uprop` compiled from `module_source`, bytecode only
fn write_compiled_egg(fixture: &Fixture, module_source: &str) -> PathBuf {
    let package = fixture.workspaces.parent().unwrap().join("package");
    let lic = package.join("pyovpn").join("lic");
    fs::create_dir_all(&lic).unwrap();
    fs::write(package.join("pyovpn").join("__init__.py"), "").unwrap();
    fs::write(lic.join("__init__.py"), "").unwrap();
    fs::write(lic.join("uprop.py"), module_source).unwrap();

    let status = Command::new("python3")
        .args(["-m", "compileall", "-b", "-q"])
        .arg(lic.join("uprop.py"))
        .status()
        .unwrap();
    assert!(status.success());
    fs::remove_file(lic.join("uprop.py")).unwrap();

    let live = fixture.eggs.join("pyovpn-2.0-py3.10.egg");
    egg_archive::repack(&package, &live).unwrap();
    live
}

/// Run `script` with the egg at the front of `sys.path`, returning stdout
fn run_against_egg(egg: &Path, script: &str) -> String {
    let script = format!("import sys\nsys.path.insert(0, sys.argv[1])\n{script}");
    let output = Command::new("python3")
        .args(["-B", "-c", &script])
        .arg(egg)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_facade_overrides_concurrent_connections() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let fixture = Fixture::new();
    let live = write_compiled_egg(
        &fixture,
        "LICENSE_TYPE = 'subscription'\n\n\
         class UsageProperties:\n    \
             def figure(self, props):\n        \
                 return {'type': LICENSE_TYPE}\n",
    );

    // Patch twice; the second run must still wrap the original implementation once
    for clock in [first_run, second_run] {
        let outcome = Pipeline::new(fixture.config()).with_clock(clock).run();
        assert!(outcome.is_success(), "{}", outcome.reason());
    }

    let stdout = run_against_egg(
        &live,
        "\
from pyovpn.lic import uprop
props = uprop.UsageProperties().figure({})
print(props['concurrent_connections'], props['type'], uprop.LICENSE_TYPE)
figure = uprop.UsageProperties.figure
print(hasattr(figure, '__wrapped__'), hasattr(figure.__wrapped__, '__wrapped__'))
",
    );
    assert_eq!(stdout, "200 subscription subscription\nTrue False\n");
}

#[test]
fn test_facade_passes_through_module_without_usage_properties() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let fixture = Fixture::new();
    let live = write_compiled_egg(&fixture, "LIMIT = 2\n");

    let outcome = Pipeline::new(fixture.config()).with_clock(first_run).run();
    assert!(outcome.is_success(), "{}", outcome.reason());

    let stdout = run_against_egg(
        &live,
        "\
from pyovpn.lic import uprop
print(uprop.LIMIT, hasattr(uprop, 'UsageProperties'))
",
    );
    assert_eq!(stdout, "2 False\n");
}
