//! Stages 9 to 12, 14 and 15: running `flatpak-flutter` and collecting what
//! it produced, plus local fallbacks for the pieces it may have skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use super::checks::assert_commit_pinned;
use super::context::PrepareContext;
use super::error::PrepareError;
use super::files_matching;
use crate::consts::{
  APP_MODULE, CARGO_SOURCES_JSON, DEFAULT_REPO_URLS, PUBSPEC_SOURCES_JSON, SETUP_HELPER_NAME, SQLITE_PATCH,
  TIMEOUT_EXIT_STATUS,
};
use crate::manifest::Document;
use crate::ops::manifest::pin_commit;
use crate::process::{CommandSpec, ProcessError};
use crate::util::fs::{copy_file, find_files_with_suffix};

static SQLITE_AUTOCONF_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"sqlite-autoconf-350[0-9]{4}").expect("valid sqlite autoconf regex"));
static SHA256_LINE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"SHA256=[0-9a-f]{64}").expect("valid sha256 regex"));

const FLUTTER_TOOLS_LOCK: &str = "flutter/packages/flutter_tools/pubspec.lock";

/// Stage 9: run the generator and record its exit status.
pub fn run_flatpak_flutter(ctx: &mut PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Running flatpak-flutter to generate offline sources...");
  if ctx.options.no_flatpak_flutter {
    ctx
      .printer
      .info("Skipping flatpak-flutter run (NO_FLATPAK_FLUTTER=true); using fallback generation paths");
    ctx.generator_status = Some(TIMEOUT_EXIT_STATUS);
    return Ok(());
  }

  let script = ctx.flatpak_flutter_repo.join("flatpak-flutter.py");
  if !script.is_file() {
    return Err(PrepareError::Missing {
      what: "flatpak-flutter.py",
      path: script,
    });
  }

  let timeout = ctx.options.flatpak_flutter_timeout;
  let spec = CommandSpec::new(ctx.python())
    .arg(&script)
    .args(["--app-module", APP_MODULE, "--keep-build-dirs"])
    .arg(ctx.manifest_name())
    .current_dir(ctx.work_dir())
    .envs(&ctx.env)
    .env("GIT_TERMINAL_PROMPT", "0")
    .timeout(timeout);

  let log = match ctx.runner.output(&spec) {
    Ok(output) => {
      ctx.generator_status = Some(output.code.unwrap_or(-1));
      format!("{}{}", output.stdout, output.stderr)
    }
    Err(ProcessError::Timeout { timeout, .. }) => {
      ctx.generator_status = Some(TIMEOUT_EXIT_STATUS);
      ctx.printer.warn(format!(
        "flatpak-flutter timed out after {}s; proceeding with fallback generation",
        timeout.as_secs()
      ));
      String::new()
    }
    Err(error) => return Err(error.into()),
  };
  fs::write(&ctx.flatpak_flutter_log, log)?;

  if ctx.generator_succeeded() {
    ctx.printer.status("Generated offline manifest and dependencies");
  } else {
    let status = ctx.generator_status.unwrap_or(-1);
    ctx
      .printer
      .warn(format!("flatpak-flutter exited with {status}; proceeding with fallback generation"));
    ctx
      .printer
      .info(format!("Check {} for details", ctx.flatpak_flutter_log.display()));
  }
  Ok(())
}

/// Point the sqlite3 CMake patch at the autoconf release being bundled.
pub(crate) fn normalize_sqlite_text(text: &str, version: &str, sha256: &str) -> String {
  let text = SQLITE_AUTOCONF_RE.replace_all(text, version);
  SHA256_LINE_RE
    .replace_all(&text, format!("SHA256={sha256}").as_str())
    .into_owned()
}

/// Stage 10.
pub fn normalize_sqlite_patch(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let path = ctx.work_dir().join(SQLITE_PATCH);
  if !path.is_file() {
    return Ok(());
  }
  let version = &ctx.options.sqlite_autoconf_version;
  let content = fs::read_to_string(&path)?;
  let normalized = normalize_sqlite_text(&content, version, &ctx.options.sqlite_autoconf_sha256);
  if normalized != content {
    fs::write(&path, normalized)?;
    ctx
      .printer
      .info(format!("Normalized sqlite3 patch to target version {version}"));
  }
  Ok(())
}

/// Stage 11: pin the working manifest to the commit being built.
pub fn pin_working_manifest(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let commit = ctx.pinned_commit();
  ctx
    .printer
    .status(format!("Pinning working manifest to commit: {commit}"));

  let mut urls: Vec<&str> = DEFAULT_REPO_URLS.to_vec();
  if let Some(url) = ctx.pr_head_url.as_deref() {
    urls.push(url);
  }
  let mut doc = Document::load(&ctx.manifest_work)?;
  if pin_commit(&mut doc, commit, Some(urls.as_slice()))?.changed {
    doc.save()?;
  }
  assert_commit_pinned(&ctx.manifest_work, "Working")
}

/// Stage 12: copy the manifest and the JSON dependency lists into the output.
pub fn stage_generated_outputs(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Creating flathub manifest...");
  let work = ctx.work_dir();
  let output = ctx.output_dir();

  assert_commit_pinned(&ctx.manifest_work, "Generated")?;
  copy_file(&ctx.manifest_work, &ctx.manifest_output)?;

  let lists = [
    (files_matching(work, "flutter-sdk-", ".json"), "No flutter-sdk JSON found"),
    (existing(work.join(PUBSPEC_SOURCES_JSON)), "No pubspec-sources.json found"),
    (existing(work.join(CARGO_SOURCES_JSON)), "No cargo-sources.json found"),
    (
      files_matching(work, "rustup-", ".json"),
      "No rustup JSON found (will rely on SDK extension if not present)",
    ),
    (existing(work.join("package_config.json")), "No package_config.json found"),
  ];
  for (paths, warning) in lists {
    if paths.is_empty() {
      ctx.printer.warn(warning);
    }
    for path in paths {
      if let Some(name) = path.file_name() {
        copy_file(&path, &output.join(name))?;
      }
    }
  }

  let helper = work.join(SETUP_HELPER_NAME);
  if helper.is_file() {
    copy_file(&helper, &output.join(SETUP_HELPER_NAME))?;
  }

  for path in builder_outputs(ctx) {
    let Some(name) = path.file_name() else { continue };
    match copy_file(&path, &output.join(name)) {
      Ok(()) => ctx.printer.info(format!("Bundled {}", name.to_string_lossy())),
      Err(error) => debug!(path = ?path, error = %error, "skipping vanished builder output"),
    }
  }
  Ok(())
}

fn existing(path: PathBuf) -> Vec<PathBuf> {
  if path.is_file() { vec![path] } else { Vec::new() }
}

/// JSON dependency lists left inside `.flatpak-builder` directories below the
/// work dir and its parent.
fn builder_outputs(ctx: &PrepareContext) -> Vec<PathBuf> {
  let work = ctx.work_dir().to_path_buf();
  let mut roots = vec![work.clone()];
  if let Some(parent) = work.parent().and_then(|p| dunce::canonicalize(p).ok()) {
    if dunce::canonicalize(&work).ok().as_ref() != Some(&parent) {
      roots.push(parent);
    }
  }

  let mut found = Vec::new();
  for root in roots.iter().filter(|r| r.exists()) {
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
      if !entry.file_type().is_file() || !is_builder_output(root, entry.path()) {
        continue;
      }
      if !found.contains(&entry.path().to_path_buf()) {
        found.push(entry.into_path());
      }
    }
  }
  found.sort();
  found
}

fn is_builder_output(root: &Path, path: &Path) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  let wanted = name == PUBSPEC_SOURCES_JSON
    || name == CARGO_SOURCES_JSON
    || (name.starts_with("flutter-sdk-") && name.ends_with(".json"));
  let rel = path.strip_prefix(root).unwrap_or(path);
  wanted
    && rel
      .parent()
      .is_some_and(|dir| dir.components().any(|c| c.as_os_str() == ".flatpak-builder"))
}

/// The `flutter_tools` lockfile of the primed SDK, else the cached copy.
pub(crate) fn find_flutter_tools_lock(ctx: &PrepareContext) -> Option<PathBuf> {
  if let Some(lock) = find_files_with_suffix(&ctx.builder_build_dir(), FLUTTER_TOOLS_LOCK).into_iter().next() {
    return Some(lock);
  }
  let cached = ctx.flatpak_dir().join("cache/flutter_tools/pubspec.lock");
  cached.is_file().then_some(cached)
}

/// Stage 14: the `flutter_tools` package config, needed for an offline
/// tool build.
pub fn stage_package_config(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let target = ctx.output_dir().join("package_config.json");

  let beside_lock = find_flutter_tools_lock(ctx)
    .and_then(|lock| lock.parent().map(|dir| dir.join(".dart_tool/package_config.json")))
    .filter(|p| p.is_file());
  let found = beside_lock.or_else(|| {
    find_files_with_suffix(
      &ctx.builder_build_dir(),
      "flutter/packages/flutter_tools/.dart_tool/package_config.json",
    )
    .into_iter()
    .next()
  });

  match found {
    Some(config) => copy_file(&config, &target)?,
    None => ctx
      .printer
      .warn("Could not locate flutter_tools package_config.json for offline cache"),
  }
  Ok(())
}

/// Stage 15: generate the Flutter SDK source list from the primed SDK when the
/// generator left none.
pub fn ensure_flutter_sdk_json(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let output = ctx.output_dir();
  if !files_matching(output, "flutter-sdk-", ".json").is_empty() {
    return Ok(());
  }
  ctx
    .printer
    .warn("No flutter-sdk JSON produced by flatpak-flutter; generating locally...");

  let generator = ctx
    .flatpak_flutter_repo
    .join("flutter_sdk_generator/flutter_sdk_generator.py");
  if !generator.is_file() {
    ctx.printer.warn("flutter_sdk_generator not found; skipping generation");
    return Ok(());
  }
  let sdk = ctx.primed_sdk_dir();
  if !sdk.join("bin/flutter").is_file() {
    ctx.printer.warn(format!(
      "Primed Flutter SDK not found at {}; cannot generate flutter-sdk JSON",
      sdk.display()
    ));
    return Ok(());
  }

  let target = output.join(format!("flutter-sdk-{}.json", ctx.flutter_tag_or_stable()));
  let spec = CommandSpec::new(ctx.python())
    .arg(&generator)
    .arg(&sdk)
    .arg("-o")
    .arg(&target);
  let output = ctx.runner.output(&spec)?;
  if output.success() {
    ctx.printer.status(format!("Generated {}", target.display()));
  } else {
    ctx.printer.warn(format!(
      "Failed to generate flutter-sdk JSON: {}{}",
      output.stdout, output.stderr
    ));
    if target.exists() {
      fs::remove_file(&target)?;
    }
  }
  Ok(())
}
