//! Stages 2 to 8: a clean work directory holding everything `flatpak-flutter`
//! needs, including a primed Flutter SDK.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use super::context::PrepareContext;
use super::error::PrepareError;
use crate::consts::{
  APP_MODULE, COMMIT_PLACEHOLDER, FLATPAK_FLUTTER_GIT_URL, FLUTTER_GIT_URL, FLUTTER_SDK_MODULE, LOCAL_TOOL_PATH,
  SETUP_HELPER_NAME,
};
use crate::manifest::{Document, ManifestError, MappingExt, OperationResult, module_sources_mut};
use crate::ops::manifest::ensure_flutter_setup_helper;
use crate::ops::{from_messages, mapping};
use crate::process::CommandSpec;
use crate::sdk::{DEFAULT_MAX_DEPTH, find_flutter_sdk, fvm_config_path, is_executable_file, read_fvm_flutter_version};
use crate::util::fs::{copy_file, copy_tree, make_executable, remove_path};

/// Stage 2: empty the work directory and create the output directory.
pub fn prepare_directories(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Creating clean work directory...");
  let work_dir = ctx.work_dir();
  fs::create_dir_all(work_dir)?;
  for entry in fs::read_dir(work_dir)? {
    remove_path(&entry?.path())?;
  }
  fs::create_dir_all(ctx.output_dir())?;
  Ok(())
}

/// Stage 3: copy the template into the work dir and shape the app module for
/// the generator.
pub fn prepare_manifest_for_generator(ctx: &mut PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Preparing source manifest...");
  if !ctx.manifest_template.is_file() {
    return Err(PrepareError::Missing {
      what: "Manifest template",
      path: ctx.manifest_template.clone(),
    });
  }
  fs::copy(&ctx.manifest_template, &ctx.manifest_work)?;

  let mut doc = Document::load(&ctx.manifest_work)?;
  doc.ensure_modules()?;
  resolve_flutter_tag(ctx, &doc);
  let tag = ctx.flutter_tag_or_stable().to_string();

  let result = prepare_app_sources(&mut doc, &ctx.repo.branch, &tag, ctx.pr_head_url.as_deref())?;
  let tool_result = if stage_local_tool(ctx) {
    ensure_local_tool_source(&mut doc)?
  } else {
    OperationResult::unchanged()
  };
  if doc.is_changed() {
    doc.save()?;
  }

  ctx.printer.info(format!("Using Flutter tag: {tag}"));
  ctx.printer.report(&result);
  ctx.printer.report(&tool_result);
  Ok(())
}

/// The Flutter tag: FVM config first, then the template's `flutter-sdk` tag,
/// then `stable`.
fn resolve_flutter_tag(ctx: &mut PrepareContext, doc: &Document) {
  if ctx.flutter_tag.is_some() {
    return;
  }
  let fvm = read_fvm_flutter_version(&fvm_config_path(ctx.repo_root()));
  let detected = template_flutter_tag(doc);

  let tag = match (fvm, detected) {
    (Some(fvm), Some(detected)) => {
      if detected != fvm {
        ctx
          .printer
          .warn(format!("Manifest flutter-sdk tag {detected} differs from FVM ({fvm}); using FVM"));
      }
      fvm
    }
    (Some(fvm), None) => {
      ctx.printer.info(format!("Using Flutter tag from FVM configuration: {fvm}"));
      fvm
    }
    (None, Some(detected)) => detected,
    (None, None) => {
      ctx.printer.warn("Could not detect Flutter tag; defaulting to stable");
      "stable".to_string()
    }
  };
  ctx.flutter_tag = Some(tag);
}

/// First `tag` of a `flutter-sdk` source.
pub(crate) fn template_flutter_tag(doc: &Document) -> Option<String> {
  doc
    .module(FLUTTER_SDK_MODULE)?
    .seq("sources")?
    .iter()
    .filter_map(Value::as_mapping)
    .find_map(|s| s.get_str("tag").map(str::trim).filter(|t| !t.is_empty()))
    .map(str::to_string)
}

/// Point the app sources at the current branch, add the Flutter checkout the
/// generator expects, and use the PR fork when one is given.
pub(crate) fn prepare_app_sources(
  doc: &mut Document,
  branch: &str,
  flutter_tag: &str,
  pr_url: Option<&str>,
) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let sources = module_sources_mut(module)?;
    let mut messages = Vec::new();

    let mut branch_applied = false;
    for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
      if source.get_str("type") != Some("git") {
        continue;
      }
      let placeholder = source.get_str("commit") == Some(COMMIT_PLACEHOLDER);
      if placeholder || source.contains_key("branch") {
        source.remove_key("commit");
        branch_applied |= source.set_str("branch", branch) || placeholder;
      }
    }
    if branch_applied {
      messages.push(format!("Replaced app source with branch {branch}"));
    }

    let has_flutter = sources.iter().filter_map(Value::as_mapping).any(|s| {
      s.get_str("type") == Some("git") && s.get_str("dest") == Some("flutter")
    });
    if !has_flutter {
      sources.insert(
        0,
        mapping([
          ("type", Value::from("git")),
          ("url", Value::from(FLUTTER_GIT_URL)),
          ("tag", Value::from(flutter_tag)),
          ("dest", Value::from("flutter")),
        ]),
      );
      messages.push("Injected Flutter SDK git source into lotti module".to_string());
    }

    if let Some(url) = pr_url {
      let mut overridden = false;
      for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
        if source.get_str("type") == Some("git") && source.get_str("dest") != Some("flutter") {
          overridden |= source.set_str("url", url);
        }
      }
      if overridden {
        messages.push(format!("Using PR fork URL: {url}"));
      }
    }

    Ok(from_messages(messages))
  })
}

/// Copy the local tool package into the work dir. Returns whether it is there.
fn stage_local_tool(ctx: &PrepareContext) -> bool {
  let staged = ctx.work_dir().join(LOCAL_TOOL_PATH);
  if !staged.exists() {
    let source = ctx.repo_root().join(LOCAL_TOOL_PATH);
    if source.exists() {
      match copy_tree(&source, &staged) {
        Ok(()) => ctx.printer.info(format!("Staged local tool path: {LOCAL_TOOL_PATH}")),
        Err(error) => ctx.printer.warn(format!("Failed to stage local tool path: {error}")),
      }
    }
  }
  staged.exists()
}

/// Reference the local tool package as a `dir` source of the app.
pub(crate) fn ensure_local_tool_source(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let present = module
      .seq("sources")
      .into_iter()
      .flatten()
      .filter_map(Value::as_mapping)
      .any(|s| s.get_str("type") == Some("dir") && s.get_str("path") == Some(LOCAL_TOOL_PATH));
    if present {
      return Ok(OperationResult::unchanged());
    }
    module_sources_mut(module)?.insert(
      0,
      mapping([
        ("type", Value::from("dir")),
        ("path", Value::from(LOCAL_TOOL_PATH)),
        ("dest", Value::from(LOCAL_TOOL_PATH)),
      ]),
    );
    Ok(OperationResult::changed(format!(
      "Injected local tool dir source: {LOCAL_TOOL_PATH}"
    )))
  })
}

/// Stage 4: reference the setup helper from the SDK module.
pub fn ensure_setup_helper_reference(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let mut doc = Document::load(&ctx.manifest_work)?;
  super::apply(ctx.printer, &mut doc, |d| ensure_flutter_setup_helper(d, SETUP_HELPER_NAME))?;
  Ok(())
}

/// Stage 5: clone `flatpak-flutter` unless a checkout exists.
pub fn ensure_generator_repo(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let repo_dir = &ctx.flatpak_flutter_repo;
  if repo_dir.is_dir() {
    return Ok(());
  }
  ctx.printer.status("Cloning flatpak-flutter...");
  if let Some(parent) = repo_dir.parent() {
    fs::create_dir_all(parent)?;
  }
  let clone = CommandSpec::new("git")
    .arg("clone")
    .arg("--depth")
    .arg("1")
    .arg(FLATPAK_FLUTTER_GIT_URL)
    .arg(repo_dir);
  ctx.runner.run(&clone)?;
  Ok(())
}

fn require(path: PathBuf, what: &'static str, is_dir: bool) -> Result<PathBuf, PrepareError> {
  let ok = if is_dir { path.is_dir() } else { path.is_file() };
  if ok { Ok(path) } else { Err(PrepareError::Missing { what, path }) }
}

/// Stage 6: app sources, lockfiles, the setup helper and stub build dirs.
pub fn stage_workspace_files(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Preparing workspace inputs...");
  let repo = ctx.repo_root();
  let work = ctx.work_dir();

  let lib = require(repo.join("lib"), "lib directory", true)?;
  let linux = require(repo.join("linux"), "linux directory", true)?;
  let pubspec_yaml = require(repo.join("pubspec.yaml"), "pubspec.yaml", false)?;
  let pubspec_lock = require(repo.join("pubspec.lock"), "pubspec.lock", false)?;

  copy_tree(&lib, &work.join("lib"))?;
  copy_tree(&linux, &work.join("linux"))?;

  let tool = repo.join("tool");
  if tool.is_dir() {
    copy_tree(&tool, &work.join("tool"))?;
    if let Err(error) = write_foreign_json(work) {
      ctx.printer.warn(format!("Failed to write foreign.json: {error}"));
    }
  }
  copy_file(&pubspec_yaml, &work.join("pubspec.yaml"))?;
  copy_file(&pubspec_lock, &work.join("pubspec.lock"))?;

  let helper = require(ctx.setup_helper_source.clone(), "Setup helper script", false)?;
  let helper_target = work.join(SETUP_HELPER_NAME);
  copy_file(&helper, &helper_target)?;
  make_executable(&helper_target)?;

  for name in ["lotti", "lotti-1"] {
    let build_dir = ctx.builder_build_dir().join(name);
    fs::create_dir_all(&build_dir)?;
    copy_file(&pubspec_yaml, &build_dir.join("pubspec.yaml"))?;
    copy_file(&pubspec_lock, &build_dir.join("pubspec.lock"))?;
    let foreign = build_dir.join("foreign_deps.json");
    if !foreign.exists() {
      fs::write(&foreign, "{}\n")?;
    }
  }
  Ok(())
}

/// Tell the generator to embed the local tool package in the app sources.
fn write_foreign_json(work: &Path) -> std::io::Result<()> {
  let foreign = serde_json::json!({
    "app_local_paths": {
      "manifest": {
        "sources": [{
          "type": "dir",
          "path": LOCAL_TOOL_PATH,
          "dest": format!("$APP/{LOCAL_TOOL_PATH}"),
        }]
      }
    }
  });
  let text = serde_json::to_string_pretty(&foreign).map_err(std::io::Error::other)?;
  fs::write(work.join("foreign.json"), text + "\n")
}

/// Stage 7: the generator runs `pub get` in its clone of the app, which needs
/// the local tool package to be there already.
pub fn prestage_tool_path(ctx: &PrepareContext) {
  let source = ctx.repo_root().join(LOCAL_TOOL_PATH);
  if !source.is_dir() {
    return;
  }
  let target = ctx.builder_build_dir().join("lotti").join(LOCAL_TOOL_PATH);
  if target.exists() {
    return;
  }
  match copy_tree(&source, &target) {
    Ok(()) => ctx
      .printer
      .info(format!("Pre-staged {LOCAL_TOOL_PATH} for flatpak-flutter pub get")),
    Err(error) => debug!(error = %error, "failed to pre-stage local tool path"),
  }
}

/// Stage 8: put a Flutter SDK where the generator looks for it, from a local
/// SDK or a shallow clone of the tag.
pub fn prime_flutter_sdk(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let target = ctx.primed_sdk_dir();
  let flutter_bin = target.join("bin").join("flutter");
  if is_executable_file(&flutter_bin) {
    return Ok(());
  }

  let tag = ctx.flutter_tag_or_stable();
  ctx
    .printer
    .status(format!("Priming Flutter SDK at {} (tag {tag})...", target.display()));
  fs::create_dir_all(&target)?;

  if let Some(cached) = cached_sdk(ctx, &target) {
    ctx.printer.info(format!("Using cached Flutter SDK from {}", cached.display()));
    copy_tree(&cached, &target)?;
  }

  if !flutter_bin.is_file() {
    ctx
      .printer
      .warn("Cached Flutter SDK not available; attempting shallow clone from remote.");
    remove_path(&target)?;
    let clone = CommandSpec::new("git")
      .args(["clone", "--depth", "1", "--branch", tag, FLUTTER_GIT_URL])
      .arg(&target);
    let cloned = ctx.runner.output(&clone).is_ok_and(|o| o.success());
    if !cloned {
      ctx
        .printer
        .warn("Failed to provision Flutter SDK; flatpak-flutter will attempt its own clone.");
      return Ok(());
    }
  }

  let version = CommandSpec::new(flutter_bin.to_string_lossy()).arg("--version").current_dir(&target);
  if let Err(error) = ctx.runner.output(&version) {
    debug!(error = %error, "flutter --version failed");
  }
  Ok(())
}

fn cached_sdk(ctx: &PrepareContext, target: &Path) -> Option<PathBuf> {
  let canonical = |p: &Path| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
  if let Some(cached) = &ctx.cached_flutter_dir {
    if canonical(cached) != canonical(target) {
      return Some(cached.clone());
    }
  }
  find_flutter_sdk(
    &[ctx.repo_root().to_path_buf()],
    &[ctx.work_dir().to_path_buf(), target.to_path_buf()],
    DEFAULT_MAX_DEPTH,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::testutil::{doc, sample};
  use crate::prepare::context::testutil::context;
  use serial_test::serial;
  use tempfile::tempdir;

  mod manifest_prep_tests {
    use super::*;

    #[test]
    fn app_sources_follow_branch_and_gain_flutter_checkout() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    sources:
      - type: git
        url: https://github.com/matthiasn/lotti
        commit: COMMIT_PLACEHOLDER
      - type: file
        path: x
"#,
      );
      let result = prepare_app_sources(&mut d, "feature/a", "3.35.4", None).unwrap();
      assert_eq!(
        result.messages,
        [
          "Replaced app source with branch feature/a",
          "Injected Flutter SDK git source into lotti module",
        ]
      );
      let sources = d.module(APP_MODULE).unwrap().seq("sources").unwrap();
      let flutter = sources[0].as_mapping().unwrap();
      assert_eq!(flutter.get_str("tag"), Some("3.35.4"));
      let app = sources[1].as_mapping().unwrap();
      assert_eq!(app.get_str("branch"), Some("feature/a"));
      assert!(!app.contains_key("commit"));

      assert_eq!(
        prepare_app_sources(&mut d, "feature/a", "3.35.4", None).unwrap(),
        OperationResult::unchanged()
      );
    }

    #[test]
    fn pr_url_overrides_app_git_sources_only() {
      let mut d = sample();
      let result = prepare_app_sources(&mut d, "main", "stable", Some("https://github.com/fork/lotti.git")).unwrap();
      assert!(result.messages.iter().any(|m| m == "Using PR fork URL: https://github.com/fork/lotti.git"));
      let sources = d.module(APP_MODULE).unwrap().seq("sources").unwrap();
      let urls: Vec<_> = sources
        .iter()
        .filter_map(Value::as_mapping)
        .filter(|s| s.get_str("type") == Some("git"))
        .map(|s| (s.get_str("url").unwrap(), s.get_str("dest")))
        .collect();
      assert!(urls.contains(&("https://github.com/fork/lotti.git", None)));
      assert!(urls.contains(&("https://example.com/alt.git", Some("flutter"))));
    }

    #[test]
    fn template_tag_read_from_sdk_module() {
      assert_eq!(template_flutter_tag(&sample()), None);
      let d = doc(
        "modules:\n  - name: flutter-sdk\n    sources:\n      - type: git\n        url: https://github.com/flutter/flutter.git\n        tag: 3.35.4\n",
      );
      assert_eq!(template_flutter_tag(&d).as_deref(), Some("3.35.4"));
    }

    #[test]
    fn tool_source_added_once() {
      let mut d = sample();
      assert!(ensure_local_tool_source(&mut d).unwrap().changed);
      assert!(!ensure_local_tool_source(&mut d).unwrap().changed);
      let first = d.module(APP_MODULE).unwrap().seq("sources").unwrap()[0].clone();
      assert_eq!(first.as_mapping().unwrap().get_str("type"), Some("dir"));
    }
  }

  mod staging_tests {
    use super::*;

    fn seed_repo(root: &Path) {
      for dir in ["lib", "linux", "tool/lotti_custom_lint", "flatpak/helpers"] {
        fs::create_dir_all(root.join(dir)).unwrap();
      }
      fs::write(root.join("lib/main.dart"), "void main() {}").unwrap();
      fs::write(root.join("pubspec.yaml"), "name: lotti\nversion: 1.0.0+1\n").unwrap();
      fs::write(root.join("pubspec.lock"), "packages: {}\n").unwrap();
      fs::write(root.join("flatpak/helpers/setup-flutter.sh"), "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn directories_are_emptied() {
      let temp = tempdir().unwrap();
      let ctx = context(temp.path());
      fs::create_dir_all(ctx.work_dir().join("stale")).unwrap();
      fs::write(ctx.work_dir().join("old.txt"), "x").unwrap();

      prepare_directories(&ctx).unwrap();
      assert_eq!(fs::read_dir(ctx.work_dir()).unwrap().count(), 1);
      assert!(ctx.output_dir().is_dir());
    }

    #[test]
    fn workspace_files_and_stub_build_dirs() {
      let temp = tempdir().unwrap();
      seed_repo(temp.path());
      let ctx = context(temp.path());
      fs::create_dir_all(ctx.work_dir()).unwrap();

      stage_workspace_files(&ctx).unwrap();

      let work = ctx.work_dir();
      assert!(work.join("lib/main.dart").is_file());
      assert!(work.join("foreign.json").is_file());
      assert!(is_executable_file(&work.join(SETUP_HELPER_NAME)));
      for name in ["lotti", "lotti-1"] {
        let dir = ctx.builder_build_dir().join(name);
        assert!(dir.join("pubspec.lock").is_file());
        assert_eq!(fs::read_to_string(dir.join("foreign_deps.json")).unwrap(), "{}\n");
      }

      prestage_tool_path(&ctx);
      assert!(ctx.builder_build_dir().join("lotti").join(LOCAL_TOOL_PATH).is_dir());
    }

    #[test]
    fn missing_linux_dir_is_reported() {
      let temp = tempdir().unwrap();
      seed_repo(temp.path());
      fs::remove_dir_all(temp.path().join("linux")).unwrap();
      let ctx = context(temp.path());
      let err = stage_workspace_files(&ctx).unwrap_err();
      assert!(err.to_string().starts_with("linux directory not found"));
    }

    #[test]
    #[serial]
    fn manifest_prep_copies_template_and_resolves_tag() {
      let temp = tempdir().unwrap();
      seed_repo(temp.path());
      let mut ctx = context(temp.path());
      fs::create_dir_all(ctx.work_dir()).unwrap();
      fs::write(&ctx.manifest_template, crate::manifest::testutil::SAMPLE_MANIFEST).unwrap();

      temp_env::with_var(crate::sdk::FVM_CONFIG_ENV, Some(temp.path().join("missing.json")), || {
        prepare_manifest_for_generator(&mut ctx).unwrap();
      });

      assert_eq!(ctx.flutter_tag.as_deref(), Some("stable"));
      let text = fs::read_to_string(&ctx.manifest_work).unwrap();
      assert!(text.contains("branch: main"));
      assert!(text.contains(LOCAL_TOOL_PATH));
    }
  }
}
