use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use vclosure_pe::emit::{write_image, ImageSpec};
use vclosure_pe::RawAssemblyRef;

fn create_temp_dir(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let base = std::env::temp_dir();
    let pid = std::process::id();
    for _ in 0..10_000 {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{prefix}_{pid}_{n}"));
        if std::fs::create_dir(&path).is_ok() {
            return path;
        }
    }
    panic!("failed to create temp dir under {}", base.display());
}

fn rm_rf(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

fn write_assembly(
    dir: &Path,
    file: &str,
    name: &str,
    version: [u16; 4],
    references: &[(&str, [u16; 4])],
    native_imports: &[&str],
) {
    let spec = ImageSpec {
        name: name.to_string(),
        version,
        references: references
            .iter()
            .map(|(name, version)| RawAssemblyRef {
                name: name.to_string(),
                version: *version,
            })
            .collect(),
        native_imports: native_imports.iter().map(|m| m.to_string()).collect(),
    };
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture dir");
    }
    std::fs::write(path, write_image(&spec)).expect("write fixture");
}

fn run(args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_vclosure");
    Command::new(exe)
        .args(args)
        .output()
        .expect("run vclosure")
}

fn run_with_gac_root(args: &[&str], gac_root: &Path) -> Output {
    let exe = env!("CARGO_BIN_EXE_vclosure");
    Command::new(exe)
        .args(args)
        .env("VCLOSURE_GAC_ROOT", gac_root)
        .output()
        .expect("run vclosure")
}

fn stdout_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

#[test]
fn closed_directory_scan_is_clean() {
    let dir = create_temp_dir("vclosure_cli_closed");
    write_assembly(
        &dir,
        "X.dll",
        "X",
        [1, 0, 0, 0],
        &[("Y", [1, 0, 0, 0])],
        &["native.dll", "native"],
    );
    write_assembly(&dir, "Y.dll", "Y", [1, 0, 0, 0], &[], &[]);
    std::fs::write(dir.join("native.so"), b"not a managed image").unwrap();
    std::fs::write(dir.join("native.dll"), b"not a managed image").unwrap();

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr_of(&out));
    assert_eq!(stdout_of(&out), "");

    rm_rf(&dir);
}

#[test]
fn missing_reference_is_reported_tab_prefixed() {
    let dir = create_temp_dir("vclosure_cli_missing");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [1, 0, 0, 0])], &[]);

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_of(&out), "\tA is missing C, 1.0.0.0\n");

    rm_rf(&dir);
}

#[test]
fn under_versioned_reference_is_reported_once() {
    let dir = create_temp_dir("vclosure_cli_insufficient");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("B", [2, 0, 0, 0])], &[]);
    write_assembly(&dir, "B.dll", "B", [1, 5, 0, 0], &[], &[]);

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_of(&out), "\tInsufficient version: B, 1.5.0.0 < 2.0.0.0\n");

    rm_rf(&dir);
}

#[test]
fn highest_version_in_the_scan_wins() {
    let dir = create_temp_dir("vclosure_cli_highest");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("B", [2, 0, 0, 0])], &[]);
    write_assembly(&dir, "old/B.dll", "B", [1, 0, 0, 0], &[], &[]);
    write_assembly(&dir, "new/B.dll", "B", [2, 0, 0, 0], &[], &[]);

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    rm_rf(&dir);
}

#[test]
fn ignore_list_exempts_references() {
    let dir = create_temp_dir("vclosure_cli_ignore");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [1, 0, 0, 0])], &[]);

    let out = run(&[dir.to_str().unwrap(), "--ignore", "C"]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    let out = run(&[dir.to_str().unwrap(), "--ignore", "C,1.0.0.0"]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    // A ceiling below the requirement leaves the reference checked.
    let out = run(&[dir.to_str().unwrap(), "--ignore", "C,0.5.0.0"]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_of(&out), "\tA is missing C, 1.0.0.0\n");

    rm_rf(&dir);
}

#[test]
fn malformed_ignore_entries_are_fatal() {
    let dir = create_temp_dir("vclosure_cli_bad_ignore");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[], &[]);

    let out = run(&[dir.to_str().unwrap(), "--ignore", "C,potato"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(
        stderr_of(&out).contains("--ignore entry"),
        "stderr:\n{}",
        stderr_of(&out)
    );

    rm_rf(&dir);
}

#[test]
fn baseline_suppresses_accepted_errors() {
    let dir = create_temp_dir("vclosure_cli_baseline");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [1, 0, 0, 0])], &[]);
    let baseline = dir.join("accepted.txt");
    std::fs::write(&baseline, "  a is missing c, 1.0.0.0  \n").unwrap();

    let out = run(&[
        dir.to_str().unwrap(),
        "--baseline-file",
        baseline.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));
    assert_eq!(stdout_of(&out), "");

    // A baseline for a different version suppresses nothing.
    std::fs::write(&baseline, "a is missing c, 1.1.0.0\n").unwrap();
    let out = run(&[
        dir.to_str().unwrap(),
        "--baseline-file",
        baseline.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(1));

    rm_rf(&dir);
}

#[test]
fn missing_baseline_file_suppresses_nothing() {
    let dir = create_temp_dir("vclosure_cli_no_baseline");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [1, 0, 0, 0])], &[]);

    let out = run(&[
        dir.to_str().unwrap(),
        "--baseline-file",
        dir.join("absent.txt").to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(1));

    rm_rf(&dir);
}

#[test]
fn unresolved_native_import_is_reported() {
    let dir = create_temp_dir("vclosure_cli_pinvoke");
    write_assembly(&dir, "X.dll", "X", [1, 0, 0, 0], &[], &["sqlite3.dll"]);

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_of(&out), "\tX is missing native assembly sqlite3\n");

    let out = run(&[dir.to_str().unwrap(), "--no-check-pinvokes"]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    rm_rf(&dir);
}

#[test]
fn extensionless_and_extensioned_imports_resolve_alike() {
    let dir = create_temp_dir("vclosure_cli_pinvoke_ext");
    write_assembly(&dir, "X.dll", "X", [1, 0, 0, 0], &[], &["foo.dll", "foo"]);
    std::fs::write(dir.join("foo.dll"), b"not a managed image").unwrap();

    let out = run(&[dir.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    rm_rf(&dir);
}

#[test]
fn explicit_file_inputs_resolve_against_each_other() {
    let dir = create_temp_dir("vclosure_cli_explicit");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("B", [1, 0, 0, 0])], &[]);
    write_assembly(&dir, "B.dll", "B", [1, 0, 0, 0], &[], &[]);

    let out = run(&[
        dir.join("A.dll").to_str().unwrap(),
        dir.join("B.dll").to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    rm_rf(&dir);
}

#[test]
fn duplicate_explicit_inputs_are_fatal() {
    let dir = create_temp_dir("vclosure_cli_dup");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[], &[]);

    let a = dir.join("A.dll");
    let out = run(&[a.to_str().unwrap(), a.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(
        stderr_of(&out).contains("duplicate assembly"),
        "stderr:\n{}",
        stderr_of(&out)
    );

    rm_rf(&dir);
}

#[test]
fn a_second_directory_is_fatal() {
    let first = create_temp_dir("vclosure_cli_dir1");
    let second = create_temp_dir("vclosure_cli_dir2");

    let out = run(&[first.to_str().unwrap(), second.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(
        stderr_of(&out).contains("only one directory"),
        "stderr:\n{}",
        stderr_of(&out)
    );

    rm_rf(&first);
    rm_rf(&second);
}

#[test]
fn nonexistent_inputs_are_fatal() {
    let out = run(&["/nonexistent/vclosure/input"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(
        stderr_of(&out).contains("does not exist"),
        "stderr:\n{}",
        stderr_of(&out)
    );
}

#[test]
fn json_report_carries_schema_and_errors() {
    let dir = create_temp_dir("vclosure_cli_json");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [1, 0, 0, 0])], &[]);
    std::fs::write(dir.join("helper.so"), b"not a managed image").unwrap();

    let out = run(&[dir.to_str().unwrap(), "--json"]);
    assert_eq!(out.status.code(), Some(1));
    let v: Value = serde_json::from_slice(&out.stdout).expect("parse stdout JSON");
    assert_eq!(v["schema_version"], "vclosure.report@0.1.0");
    assert_eq!(v["ok"], false);
    assert_eq!(v["assemblies"], 1);
    assert_eq!(v["native_modules"], 1);
    assert_eq!(v["suppressed"], 0);
    let errors = v["errors"].as_array().expect("errors[]");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], "A is missing C, 1.0.0.0");

    write_assembly(&dir, "C.dll", "C", [1, 0, 0, 0], &[], &[]);
    let out = run(&[dir.to_str().unwrap(), "--json"]);
    assert_eq!(out.status.code(), Some(0));
    let v: Value = serde_json::from_slice(&out.stdout).expect("parse stdout JSON");
    assert_eq!(v["ok"], true);
    assert_eq!(v["errors"].as_array().map(Vec::len), Some(0));

    rm_rf(&dir);
}

#[test]
fn gac_fallback_resolves_when_enabled() {
    let dir = create_temp_dir("vclosure_cli_gac");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [2, 0, 0, 0])], &[]);
    let gac = create_temp_dir("vclosure_cli_gac_root");
    write_assembly(&gac, "C/2.0.0.0/C.dll", "C", [2, 0, 0, 0], &[], &[]);

    // Off by default: the cache is not consulted.
    let out = run_with_gac_root(&[dir.to_str().unwrap()], &gac);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_of(&out), "\tA is missing C, 2.0.0.0\n");

    let out = run_with_gac_root(&[dir.to_str().unwrap(), "--check-gac"], &gac);
    assert_eq!(out.status.code(), Some(0), "stdout:\n{}", stdout_of(&out));

    rm_rf(&dir);
    rm_rf(&gac);
}

#[test]
fn under_versioned_gac_entries_report_insufficient_version() {
    let dir = create_temp_dir("vclosure_cli_gac_low");
    write_assembly(&dir, "A.dll", "A", [1, 0, 0, 0], &[("C", [2, 0, 0, 0])], &[]);
    let gac = create_temp_dir("vclosure_cli_gac_low_root");
    write_assembly(&gac, "C/1.0.0.0/C.dll", "C", [1, 0, 0, 0], &[], &[]);

    let out = run_with_gac_root(&[dir.to_str().unwrap(), "--check-gac"], &gac);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(
        stdout_of(&out),
        "\tInsufficient version: C, 1.0.0.0 < 2.0.0.0\n"
    );

    rm_rf(&dir);
    rm_rf(&gac);
}
