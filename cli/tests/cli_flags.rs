//! Integration test: run the `imgpkg` binary and check flag handling.
//!
//! Every case here fails or finishes before any registry is contacted, so
//! no network access is needed.
//!
//! ```bash
//! cargo test -p imgpkg-cli --test cli_flags
//! ```

use std::process::{Command, Output};

fn imgpkg(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_imgpkg"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run imgpkg")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_version() {
    let output = imgpkg(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("imgpkg version "));
}

#[test]
fn test_push_with_image_and_bundle_fails() {
    let output = imgpkg(&[
        "push",
        "-i",
        "registry.local/app:v1",
        "-b",
        "registry.local/bundle:v1",
        "-f",
        ".",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Expected only one of image or bundle"));
}

#[test]
fn test_push_without_target_fails() {
    let output = imgpkg(&["push", "-f", "."]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Expected either image or bundle"));
}

#[test]
fn test_push_image_with_lock_output_fails() {
    let output = imgpkg(&[
        "push",
        "-i",
        "registry.local/app:v1",
        "-f",
        ".",
        "--lock-output",
        "lock.yml",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output)
        .contains("Lock output is not compatible with image, use bundle for lock output"));
}

#[test]
fn test_push_image_with_bundle_directory_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join(".imgpkg")).unwrap();
    std::fs::write(dir.path().join(".imgpkg/images.yml"), "images: []\n").unwrap();

    let output = imgpkg(&[
        "push",
        "-i",
        "registry.local/app:v1",
        "-f",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains(".imgpkg"));
}

#[test]
fn test_copy_needs_a_source() {
    let output = imgpkg(&["copy", "--to-repo", "mirror.local/apps"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Expected either image, bundle, or lock"));
}
