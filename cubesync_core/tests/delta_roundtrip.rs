use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use cubesync_api::{ConflictReason, FileStatus};
use cubesync_core::diff::{DiffEngine, DiffOptions};
use cubesync_core::patch::{self, PatchApplier};
use cubesync_core::Result;
use tempfile::TempDir;

const HAL_C: &str = "#include \"hal.h\"\n\nvoid HAL_Init(void)\n{\n  init_clocks();\n  init_ticks();\n}\n\nvoid HAL_DeInit(void)\n{\n  reset_clocks();\n}\n";

#[test]
fn applying_a_delta_reproduces_the_target_tree() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let work = TempDir::new().expect("tempdir");

    write_file(base.path(), "drivers/src/hal.c", HAL_C);
    write_file(base.path(), "drivers/include/hal.h", "#pragma once\nvoid HAL_Init(void);\n");
    write_file(base.path(), "soc/old_name.h", "#define SOC 1\n");
    write_file(base.path(), "soc/obsolete.h", "#define OBSOLETE\n");
    write_file(base.path(), "soc/tail.h", "#define A 1\n#define B 2");
    write_file(base.path(), "notes.log", "ignored\n");

    write_file(
        head.path(),
        "drivers/src/hal.c",
        &HAL_C
            .replace("  init_ticks();\n", "  init_ticks();\n  zephyr_hook();\n")
            .replace("  reset_clocks();\n", "  reset_clocks(true);\n"),
    );
    write_file(head.path(), "drivers/include/hal.h", "#pragma once\nvoid HAL_Init(void);\n");
    write_file(head.path(), "soc/new_name.h", "#define SOC 1\n");
    write_file(head.path(), "soc/added.h", "#define ADDED 1\n");
    write_file(head.path(), "soc/tail.h", "#define A 1\n#define B 3\n");
    write_file(head.path(), "notes.log", "changed but ignored\n");

    let engine = DiffEngine::default();
    let delta = engine.compute_delta(base.path(), head.path())?;
    let statuses: Vec<_> = delta
        .files
        .iter()
        .map(|file| (file.path.as_str(), file.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("drivers/src/hal.c", FileStatus::Modified),
            ("soc/added.h", FileStatus::Added),
            ("soc/new_name.h", FileStatus::Renamed),
            ("soc/obsolete.h", FileStatus::Deleted),
            ("soc/tail.h", FileStatus::Modified),
        ]
    );

    let reparsed = patch::parse(&patch::render(&delta))?;
    copy_tree(base.path(), work.path());
    let report = PatchApplier::new(work.path()).apply(&reparsed)?;
    assert!(report.is_empty(), "unexpected conflicts: {report:?}");

    let mut expected = read_tree(head.path());
    expected.remove("notes.log");
    let mut actual = read_tree(work.path());
    assert_eq!(actual.remove("notes.log").as_deref(), Some("ignored\n"));
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn applying_twice_is_a_no_op() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    write_file(base.path(), "hal.c", HAL_C);
    write_file(head.path(), "hal.c", &HAL_C.replace("init_ticks", "init_systick"));
    write_file(head.path(), "extra.h", "#define EXTRA\n");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    let applier = PatchApplier::new(base.path());
    assert!(applier.apply(&delta)?.is_empty());
    assert!(applier.apply(&delta)?.is_empty());
    assert_eq!(read_tree(base.path()), read_tree(head.path()));
    Ok(())
}

#[test]
fn conflicts_are_isolated_per_file() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let target = TempDir::new().expect("tempdir");

    for name in ["x.c", "y.c", "z.c"] {
        write_file(base.path(), name, HAL_C);
        write_file(head.path(), name, &HAL_C.replace("  init_ticks();\n", "  init_ticks();\n  local_patch();\n"));
    }
    write_file(target.path(), "x.c", &HAL_C.replace("init_clocks();\n  init_ticks();", "clock_setup(CLOCK_HSI);"));
    write_file(target.path(), "y.c", &format!("/* new upstream banner */\n{HAL_C}"));
    write_file(target.path(), "z.c", HAL_C);

    let delta = DiffEngine::new(DiffOptions::default()).compute_delta(base.path(), head.path())?;
    let report = PatchApplier::new(target.path()).apply(&delta)?;

    assert_eq!(report.paths().collect::<Vec<_>>(), vec!["x.c"]);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.reason, ConflictReason::ContextMismatch);
    assert_eq!(conflict.rejected_hunks, 1);
    assert_eq!(conflict.reject_file.as_deref(), Some("x.c.rej"));

    let rejected = fs::read_to_string(target.path().join("x.c.rej")).expect("read rej");
    assert!(rejected.starts_with("diff a/x.c b/x.c\t(rejected hunks)\n@@ "));
    assert!(rejected.contains("+  local_patch();\n"));

    let y = fs::read_to_string(target.path().join("y.c")).expect("read y");
    assert!(y.starts_with("/* new upstream banner */\n"));
    assert!(y.contains("  init_ticks();\n  local_patch();\n"));
    let z = fs::read_to_string(target.path().join("z.c")).expect("read z");
    assert!(z.contains("  local_patch();\n"));
    assert!(!target.path().join("y.c.rej").exists());

    let log = target.path().join("module.log");
    patch::write_conflict_log(&report, &log)?;
    let log_text = fs::read_to_string(&log).expect("read log");
    assert!(log_text.starts_with("error: patch failed: x.c:"));
    assert!(log_text.ends_with("1 file(s) with conflicts\n"));
    Ok(())
}

#[test]
fn whole_file_changes_report_their_own_reasons() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let target = TempDir::new().expect("tempdir");

    write_file(base.path(), "gone.h", "#define GONE 1\n");
    write_file(base.path(), "edited.h", "#define EDITED 1\n");
    write_file(head.path(), "edited.h", "#define EDITED 2\n");
    write_file(head.path(), "fresh.h", "#define FRESH 1\n");

    write_file(target.path(), "gone.h", "#define GONE 2\n");
    write_file(target.path(), "fresh.h", "#define FRESH 0\n");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    let report = PatchApplier::new(target.path()).apply(&delta)?;
    let reasons: BTreeMap<_, _> = report
        .conflicts
        .iter()
        .map(|conflict| (conflict.path.as_str(), conflict.reason))
        .collect();
    assert_eq!(
        reasons,
        BTreeMap::from([
            ("edited.h", ConflictReason::MissingFile),
            ("fresh.h", ConflictReason::AlreadyExists),
            ("gone.h", ConflictReason::ContentMismatch),
        ])
    );
    Ok(())
}

#[test]
fn rename_onto_different_upstream_file_is_a_conflict() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let target = TempDir::new().expect("tempdir");

    write_file(base.path(), "soc/old.h", "#define SOC 1\n");
    write_file(head.path(), "soc/new.h", "#define SOC 1\n");
    write_file(target.path(), "soc/old.h", "#define SOC 1\n");
    write_file(target.path(), "soc/new.h", "#define SOC 2\n");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    assert_eq!(delta.files[0].status, FileStatus::Renamed);
    let report = PatchApplier::new(target.path()).apply(&delta)?;

    assert_eq!(report.paths().collect::<Vec<_>>(), vec!["soc/new.h"]);
    assert_eq!(report.conflicts[0].reason, ConflictReason::AlreadyExists);
    assert_eq!(
        fs::read_to_string(target.path().join("soc/new.h")).expect("read new"),
        "#define SOC 2\n"
    );
    assert!(target.path().join("soc/old.h").exists());
    Ok(())
}

#[test]
fn latin1_sources_keep_their_bytes() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let work = TempDir::new().expect("tempdir");

    let original: &[u8] = b"/* (C) Copyright \xa9 2016 STMicroelectronics */\nint a;\nint b;\nint c;\n";
    let patched: &[u8] =
        b"/* (C) Copyright \xa9 2016 STMicroelectronics */\nint a;\nint zephyr;\nint b;\nint c;\n";
    fs::write(base.path().join("hal.h"), original).expect("write base");
    fs::write(head.path().join("hal.h"), patched).expect("write head");
    fs::write(work.path().join("hal.h"), original).expect("write work");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    let reparsed = patch::parse(&patch::render(&delta))?;
    let report = PatchApplier::new(work.path()).apply(&reparsed)?;

    assert!(report.is_empty(), "unexpected conflicts: {report:?}");
    assert_eq!(fs::read(work.path().join("hal.h")).expect("read"), patched);
    Ok(())
}

#[test]
fn latin1_target_refuses_characters_it_cannot_store() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let work = TempDir::new().expect("tempdir");

    write_file(base.path(), "hal.h", "int a;\nint b;\n");
    write_file(head.path(), "hal.h", "int a;\n/* \u{2122} */\nint b;\n");
    let latin1: &[u8] = b"/* \xa9 */\nint a;\nint b;\n";
    fs::write(work.path().join("hal.h"), latin1).expect("write work");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    let report = PatchApplier::new(work.path()).apply(&delta)?;

    assert_eq!(report.conflicts[0].reason, ConflictReason::Unencodable);
    assert_eq!(fs::read(work.path().join("hal.h")).expect("read"), latin1);
    assert!(work.path().join("hal.h.rej").exists());
    Ok(())
}

#[test]
fn crlf_files_keep_their_line_endings() -> Result<()> {
    let base = TempDir::new().expect("tempdir");
    let head = TempDir::new().expect("tempdir");
    let work = TempDir::new().expect("tempdir");

    write_file(base.path(), "hal.c", "int a;\r\nint b;\r\nint c;\r\n");
    write_file(head.path(), "hal.c", "int a;\r\nint zephyr;\r\nint b;\r\nint c;\r\n");
    write_file(work.path(), "hal.c", "int a;\r\nint b;\r\nint c;\r\n");
    write_file(work.path(), "lf.c", "int a;\nint b;\n");
    write_file(base.path(), "lf.c", "int a;\nint b;\n");
    write_file(head.path(), "lf.c", "int a;\nint b;\nint zephyr;\n");

    let delta = DiffEngine::default().compute_delta(base.path(), head.path())?;
    let report = PatchApplier::new(work.path()).apply(&patch::parse(&patch::render(&delta))?)?;

    assert!(report.is_empty(), "unexpected conflicts: {report:?}");
    assert_eq!(
        fs::read_to_string(work.path().join("hal.c")).expect("read hal.c"),
        "int a;\r\nint zephyr;\r\nint b;\r\nint c;\r\n"
    );
    assert_eq!(
        fs::read_to_string(work.path().join("lf.c")).expect("read lf.c"),
        "int a;\nint b;\nint zephyr;\n"
    );
    Ok(())
}

#[test]
fn malformed_patch_text_is_rejected() {
    let err = patch::parse("diff --git a/x b/x\n@@ -1,2 +1,2 @@\n a\n");
    assert!(matches!(err, Err(cubesync_core::Error::MalformedPatch { .. })));
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, contents).expect("write file");
}

fn copy_tree(from: &Path, to: &Path) {
    for (relative, contents) in read_tree(from) {
        write_file(to, &relative, &contents);
    }
}

fn read_tree(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("relative")
                .to_string_lossy()
                .replace('\\', "/");
            (relative, fs::read_to_string(entry.path()).expect("read"))
        })
        .collect()
}
