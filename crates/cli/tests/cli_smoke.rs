//! CLI smoke tests for manifest-tool.
//!
//! These tests run each subcommand against throwaway manifests and check the
//! exit codes and the output CI scripts rely on.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the manifest-tool binary.
fn tool_cmd() -> Command {
  cargo_bin_cmd!("manifest-tool")
}

/// Create a temp directory holding `manifest.yml`.
fn temp_manifest(content: &str) -> (TempDir, PathBuf) {
  let temp = TempDir::new().unwrap();
  let path = temp.path().join("manifest.yml");
  fs::write(&path, content).unwrap();
  (temp, path)
}

fn load(path: &Path) -> serde_yaml::Value {
  serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

const APP_MANIFEST: &str = r#"
app-id: com.matthiasn.lotti
modules:
  - name: flutter-sdk
    buildsystem: simple
    build-commands:
      - mv flutter /app/flutter
    sources:
      - type: git
        url: https://github.com/flutter/flutter.git
        tag: 3.35.4
        dest: flutter
  - name: lotti
    buildsystem: simple
    build-options:
      build-args:
        - --share=network
    build-commands:
      - flutter config --no-analytics
      - flutter pub get
      - flutter build linux --release
    sources:
      - type: git
        url: https://github.com/matthiasn/lotti
        branch: main
"#;

const CLEAN_MANIFEST: &str = r#"
app-id: com.matthiasn.lotti
finish-args:
  - --share=network
modules:
  - name: lotti
    build-commands:
      - flutter pub get --offline
      - flutter build linux --release --no-pub
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  tool_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  tool_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("manifest-tool"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &[
    "pin-commit",
    "update-manifest",
    "add-offline-sources",
    "bundle-archive-sources",
    "check-flathub-compliance",
    "pr-aware-pin",
    "find-flutter-sdk",
    "prepare-flathub",
  ] {
    tool_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Manifest operators
// =============================================================================

#[test]
fn pin_commit_rewrites_app_source() {
  let (_temp, path) = temp_manifest(APP_MANIFEST);

  tool_cmd()
    .args(["pin-commit", "--commit", "abc123", "--manifest"])
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Pinned lotti module to abc123"));

  let doc = load(&path);
  let source = &doc["modules"][1]["sources"][0];
  assert_eq!(source["commit"].as_str(), Some("abc123"));
  assert!(source.get("branch").is_none());
}

#[test]
fn missing_manifest_fails() {
  let temp = TempDir::new().unwrap();

  tool_cmd()
    .args(["pin-commit", "--commit", "abc123", "--manifest"])
    .arg(temp.path().join("absent.yml"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load manifest"));
}

#[test]
fn unchanged_manifest_is_not_rewritten() {
  let (_temp, path) = temp_manifest(CLEAN_MANIFEST);

  tool_cmd()
    .arg("remove-network-from-build-args")
    .arg("--manifest")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::is_empty());

  assert_eq!(fs::read_to_string(&path).unwrap(), CLEAN_MANIFEST);
}

#[test]
fn compliance_fixes_make_manifest_pass() {
  let (_temp, path) = temp_manifest(APP_MANIFEST);

  tool_cmd()
    .arg("check-flathub-compliance")
    .arg("--manifest")
    .arg(&path)
    .assert()
    .failure()
    .stdout(predicate::str::contains("violation(s)"));

  for cmd in [
    "remove-network-from-build-args",
    "remove-flutter-config",
    "ensure-flutter-pub-get-offline",
    "ensure-dart-pub-offline-in-build",
  ] {
    tool_cmd().arg(cmd).arg("--manifest").arg(&path).assert().success();
  }

  tool_cmd()
    .arg("check-flathub-compliance")
    .arg("--manifest")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Flathub compliance check passed"));
}

#[test]
fn should_remove_flutter_sdk_prints_flag() {
  let (temp, path) = temp_manifest(APP_MANIFEST);

  tool_cmd()
    .arg("should-remove-flutter-sdk")
    .arg("--manifest")
    .arg(&path)
    .arg("--output-dir")
    .arg(temp.path())
    .assert()
    .success()
    .stdout("0\n");
}

#[test]
fn replace_url_with_path_requires_manifest() {
  let temp = TempDir::new().unwrap();

  tool_cmd()
    .arg("replace-url-with-path")
    .arg("--manifest")
    .arg(temp.path().join("absent.yml"))
    .args(["--identifier", "flutter-shared.sh.patch", "--path", "flutter-shared.sh.patch"])
    .assert()
    .failure();
}

#[test]
fn add_offline_sources_appends_includes() {
  let (_temp, path) = temp_manifest(APP_MANIFEST);

  tool_cmd()
    .arg("add-offline-sources")
    .arg("--manifest")
    .arg(&path)
    .args(["--pubspec", "pubspec-sources.json", "--cargo", "cargo-sources.json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("pubspec-sources.json"));

  let doc = load(&path);
  let sources = doc["modules"][1]["sources"].as_sequence().unwrap();
  assert!(sources.iter().any(|s| s.as_str() == Some("pubspec-sources.json")));
  assert!(sources.iter().any(|s| s.as_str() == Some("cargo-sources.json")));
}

// =============================================================================
// CI and SDK discovery
// =============================================================================

#[test]
fn pr_aware_pin_emits_assignments() {
  let temp = TempDir::new().unwrap();
  let event = temp.path().join("event.json");
  fs::write(
    &event,
    r#"{"pull_request":{"head":{"sha":"deadbeef","ref":"feature/x","repo":{"clone_url":"https://github.com/fork/lotti.git"}}}}"#,
  )
  .unwrap();

  tool_cmd()
    .args(["pr-aware-pin", "--event-name", "pull_request", "--event-path"])
    .arg(&event)
    .assert()
    .success()
    .stdout(predicate::str::contains("PR_MODE=true"))
    .stdout(predicate::str::contains("PR_HEAD_SHA=deadbeef"));
}

#[test]
fn pr_aware_pin_is_silent_outside_pull_requests() {
  tool_cmd()
    .args(["pr-aware-pin", "--event-name", "push"])
    .assert()
    .success()
    .stdout(predicate::str::is_empty());
}

#[test]
fn find_flutter_sdk_fails_when_absent() {
  let temp = TempDir::new().unwrap();

  tool_cmd()
    .arg("find-flutter-sdk")
    .arg("--search-root")
    .arg(temp.path())
    .assert()
    .failure()
    .stdout(predicate::str::is_empty());
}

// =============================================================================
// prepare-flathub
// =============================================================================

#[test]
fn prepare_flathub_fails_outside_a_checkout() {
  let temp = TempDir::new().unwrap();

  tool_cmd()
    .arg("prepare-flathub")
    .arg("--repo-root")
    .arg(temp.path())
    .env("NO_FLATPAK_FLUTTER", "1")
    .assert()
    .failure()
    .stderr(predicate::str::contains("prepare-flathub failed"));
}
