//! End-to-end runs of the voxelperm binary.

use std::path::Path;

use assert_cmd::Command;
use ndarray::Array3;
use serde_json::Value;
use tempfile::TempDir;

use voxelperm::volume::nifti_io;

fn write_inputs(root: &Path) {
    let control = root.join("control");
    let treated = root.join("treated");
    std::fs::create_dir_all(&control).unwrap();
    std::fs::create_dir_all(&treated).unwrap();

    let base = Array3::from_shape_fn((6, 6, 2), |(x, y, z)| 1.0 + (x + 2 * y + z) as f32 * 0.1);
    let mut shifted = base.clone();
    for x in 0..3 {
        for y in 0..3 {
            shifted[[x, y, 0]] += 3.0;
        }
    }
    nifti_io::write_volume(&control.join("c1.nii"), &base, None).unwrap();
    nifti_io::write_volume(&control.join("c2.nii"), &base, None).unwrap();
    nifti_io::write_volume(&treated.join("t1.nii"), &shifted, None).unwrap();
    nifti_io::write_volume(&treated.join("t2.nii"), &shifted, None).unwrap();
    nifti_io::write_volume(&root.join("mask.nii"), &Array3::<f32>::ones((6, 6, 2)), None).unwrap();
}

fn run_cmd(root: &Path, out: &Path) -> Command {
    let mut cmd = Command::cargo_bin("voxelperm").unwrap();
    cmd.arg("run")
        .arg("--control")
        .arg(root.join("control"))
        .arg("--treated")
        .arg(root.join("treated"))
        .arg("--mask")
        .arg(root.join("mask.nii"))
        .arg("--out")
        .arg(out)
        .arg("--n-perm")
        .arg("50")
        .arg("--min-slice-voxels")
        .arg("1")
        .arg("--seed")
        .arg("5");
    cmd
}

#[test]
fn run_subcommand_produces_outputs() {
    let tmp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let output = run_cmd(tmp.path(), out.path()).output().unwrap();
    assert!(output.status.success(), "run failed: {:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run complete"), "stdout: {}", stdout);

    assert!(out.path().join("p_values.nii.gz").exists());
    assert!(out.path().join("summary.json").exists());

    let summary: Value =
        serde_json::from_slice(&std::fs::read(out.path().join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["tool"]["name"], "voxelperm");
    assert_eq!(summary["input"]["n_control"], 2);
    assert_eq!(summary["input"]["n_treated"], 2);
    assert_eq!(summary["config"]["n_permutations"], 50);
    assert!(summary["elapsed_seconds"].is_number());
    let stages = summary["stages"].as_array().expect("stage timings missing");
    assert!(stages.iter().any(|s| s["stage"] == "stage5_cluster"));
}

#[test]
fn no_bundle_flag_skips_the_bundle_only() {
    let tmp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let output = run_cmd(tmp.path(), out.path()).arg("--no-bundle").output().unwrap();
    assert!(output.status.success(), "run failed: {:?}", output);
    assert!(!out.path().join("bundle.bin").exists());
    assert!(out.path().join("p_values.nii.gz").exists());
    assert!(out.path().join("summary.json").exists());
}

#[test]
fn validate_subcommand_reports_cohorts() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let mut cmd = Command::cargo_bin("voxelperm").unwrap();
    cmd.arg("validate")
        .arg("--control")
        .arg(tmp.path().join("control"))
        .arg("--treated")
        .arg(tmp.path().join("treated"))
        .arg("--mask")
        .arg(tmp.path().join("mask.nii"));
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "validate failed: {:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("validate ok"), "stdout: {}", stdout);
    assert!(stdout.contains("volume shape: 6x6x2"), "stdout: {}", stdout);
}

#[test]
fn shape_mismatch_fails_with_message() {
    let tmp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_inputs(tmp.path());
    // corrupt one treated subject with the wrong grid
    nifti_io::write_volume(
        &tmp.path().join("treated").join("t2.nii"),
        &Array3::<f32>::ones((6, 6, 3)),
        None,
    )
    .unwrap();

    let output = run_cmd(tmp.path(), out.path()).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("t2.nii"), "stderr should name the file: {}", stderr);
}

#[test]
fn cli_help_smoke() {
    let mut cmd = Command::cargo_bin("voxelperm").unwrap();
    cmd.arg("--help");
    cmd.assert().success();
}
