//! Stages 16 and 19: the operator passes over the output manifest.

use tracing::debug;

use super::context::PrepareContext;
use super::error::PrepareError;
use super::{apply, files_matching, pubdev};
use crate::consts::{
  APP_FLUTTER_BIN, APP_MODULE, CARGO_SOURCES_JSON, NESTED_FLUTTER_BIN, PINNED_PUB_PACKAGE, PINNED_PUB_VERSION,
  PUBSPEC_SOURCES_JSON, SCREENSHOT_INSTALL_PATH, SCREENSHOT_SOURCE, SETUP_HELPER_NAME,
};
use crate::manifest::Document;
use crate::ops::flutter::{
  add_media_kit_mimalloc_source, add_sqlite3_source, apply_all_offline_fixes, ensure_dart_pub_offline_in_build,
  ensure_flutter_pub_get_offline, ensure_nested_sdk, ensure_rust_sdk_env, ensure_setup_helper_command,
  ensure_setup_helper_source, normalize_flutter_sdk_module, normalize_lotti_env, normalize_sdk_copy,
  remove_flutter_config_command, remove_flutter_sdk_module, remove_network_from_build_args, remove_rustup_install,
  reorder_patches_after_dependencies, should_remove_flutter_sdk,
};
use crate::ops::manifest::{ensure_module_include, ensure_screenshot_asset, pin_commit};
use crate::ops::sources::{OfflineSources, add_offline_sources, remove_local_dir_sources, remove_rustup_sources};

/// Where the Flutter SDK lives at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SdkLayout {
  /// Shipped as a nested module under `/var/lib/flutter`.
  Nested,
  /// Built by the top-level `flutter-sdk` module into `/app/flutter`.
  Top,
}

impl SdkLayout {
  fn flutter_bin(self) -> &'static str {
    match self {
      SdkLayout::Nested => NESTED_FLUTTER_BIN,
      SdkLayout::Top => APP_FLUTTER_BIN,
    }
  }

  fn working_dir(self) -> &'static str {
    match self {
      SdkLayout::Nested => "/var/lib",
      SdkLayout::Top => "/app",
    }
  }
}

fn load_output(ctx: &PrepareContext) -> Result<Document, PrepareError> {
  if !ctx.manifest_output.is_file() {
    return Err(PrepareError::Missing {
      what: "Output manifest",
      path: ctx.manifest_output.clone(),
    });
  }
  Ok(Document::load(&ctx.manifest_output)?)
}

/// Flathub hygiene shared by stages 16 and 19.
pub(crate) fn apply_core_fixes(ctx: &PrepareContext, doc: &mut Document) -> Result<(), PrepareError> {
  let printer = ctx.printer;
  apply(printer, doc, remove_network_from_build_args)?;
  apply(printer, doc, remove_flutter_config_command)?;
  apply(printer, doc, ensure_flutter_pub_get_offline)?;
  apply(printer, doc, ensure_dart_pub_offline_in_build)?;
  apply(printer, doc, remove_rustup_install)?;
  apply(printer, doc, ensure_rust_sdk_env)?;
  apply(printer, doc, apply_all_offline_fixes)?;
  apply(printer, doc, |d| {
    ensure_screenshot_asset(d, SCREENSHOT_SOURCE, SCREENSHOT_INSTALL_PATH)
  })?;
  Ok(())
}

/// Stage 16.
pub fn apply_compliance_fixes(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Applying Flathub compliance fixes...");
  let mut doc = load_output(ctx)?;
  apply_core_fixes(ctx, &mut doc)
}

/// Stage 19: wire the generated dependency lists, the SDK layout and the
/// plugin sources into the output manifest.
pub fn post_process_output(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Post-processing output manifest...");
  let printer = ctx.printer;
  let output = ctx.output_dir();
  let mut doc = load_output(ctx)?;
  apply_core_fixes(ctx, &mut doc)?;

  let rustup: Vec<String> = files_matching(output, "rustup-", ".json")
    .iter()
    .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
    .collect();
  for include in &rustup {
    apply(printer, &mut doc, |d| ensure_module_include(d, include, Some(APP_MODULE)))?;
  }

  if ctx.options.pin_commit {
    let commit = ctx.repo.commit.as_str();
    apply(printer, &mut doc, |d| pin_commit(d, commit, None))?;
  }
  if ctx.options.use_nested_flutter {
    apply(printer, &mut doc, |d| ensure_nested_sdk(d, output))?;
  }

  let flutter_json = files_matching(output, "flutter-sdk-", ".json")
    .first()
    .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string));
  let layout = if should_remove_flutter_sdk(&doc, output) {
    let removed = remove_flutter_sdk_module(&mut doc)?;
    if removed.changed {
      doc.save()?;
    }
    printer.info("Offline Flutter JSON found and referenced; removing top-level flutter-sdk module.");
    SdkLayout::Nested
  } else {
    printer.info("Keeping top-level flutter-sdk module (offline JSON missing or not referenced).");
    SdkLayout::Top
  };
  debug!(layout = ?layout, "resolved Flutter SDK layout");

  apply(printer, &mut doc, normalize_flutter_sdk_module)?;

  let offline = OfflineSources {
    pubspec: output.join(PUBSPEC_SOURCES_JSON).is_file().then_some(PUBSPEC_SOURCES_JSON),
    cargo: output.join(CARGO_SOURCES_JSON).is_file().then_some(CARGO_SOURCES_JSON),
    rustup: rustup.iter().map(String::as_str).collect(),
    flutter_file: flutter_json.as_deref().filter(|_| ctx.options.use_nested_flutter),
  };
  apply(printer, &mut doc, |d| add_offline_sources(d, &offline))?;

  apply(printer, &mut doc, add_sqlite3_source)?;
  apply(printer, &mut doc, add_media_kit_mimalloc_source)?;
  apply(printer, &mut doc, reorder_patches_after_dependencies)?;

  apply(printer, &mut doc, |d| normalize_lotti_env(d, layout.flutter_bin(), true))?;
  apply(printer, &mut doc, |d| ensure_setup_helper_source(d, SETUP_HELPER_NAME))?;
  apply(printer, &mut doc, |d| {
    ensure_setup_helper_command(d, Some(layout.working_dir()), false, &[])
  })?;

  apply(printer, &mut doc, normalize_sdk_copy)?;
  apply(printer, &mut doc, remove_rustup_sources)?;
  apply(printer, &mut doc, remove_local_dir_sources)?;

  pubdev::ensure_pub_package(ctx, PINNED_PUB_PACKAGE, PINNED_PUB_VERSION)?;
  doc.save()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::MappingExt;
  use crate::prepare::context::testutil::context;
  use std::fs;
  use tempfile::tempdir;

  const OUTPUT_MANIFEST: &str = r#"
app-id: com.matthiasn.lotti
modules:
  - name: flutter-sdk
    buildsystem: simple
    build-commands:
      - mv flutter /app/flutter
      - export PATH=/app/flutter/bin:$PATH
    sources:
      - type: git
        url: https://github.com/flutter/flutter.git
        tag: 3.35.4
        dest: flutter
  - name: lotti
    buildsystem: simple
    build-args:
      - --share=network
    build-options:
      env:
        PATH: /usr/bin
    build-commands:
      - echo "Setting up Flutter SDK..."
      - flutter config --no-analytics
      - flutter pub get
      - flutter build linux --release
    sources:
      - type: dir
        path: tool/lotti_custom_lint
        dest: tool/lotti_custom_lint
      - type: git
        url: https://github.com/matthiasn/lotti
        commit: abc123
"#;

  fn prepared(root: &std::path::Path) -> PrepareContext {
    let ctx = context(root);
    fs::create_dir_all(ctx.output_dir()).unwrap();
    fs::write(&ctx.manifest_output, OUTPUT_MANIFEST).unwrap();
    ctx
  }

  #[test]
  fn compliance_pass_is_idempotent() {
    let temp = tempdir().unwrap();
    let ctx = prepared(temp.path());

    apply_compliance_fixes(&ctx).unwrap();
    let first = fs::read_to_string(&ctx.manifest_output).unwrap();
    assert!(!first.contains("--share=network"));
    assert!(!first.contains("flutter config"));
    assert!(first.contains("flutter pub get --offline"));
    assert!(first.contains(SCREENSHOT_INSTALL_PATH));

    apply_compliance_fixes(&ctx).unwrap();
    assert_eq!(fs::read_to_string(&ctx.manifest_output).unwrap(), first);
  }

  #[test]
  fn missing_output_manifest_is_an_error() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    let err = apply_compliance_fixes(&ctx).unwrap_err();
    assert!(err.to_string().starts_with("Output manifest not found"));
  }

  #[test]
  fn post_process_keeps_top_level_sdk_without_json() {
    let temp = tempdir().unwrap();
    let ctx = prepared(temp.path());
    fs::write(ctx.output_dir().join(PUBSPEC_SOURCES_JSON), "[{\"dest\": \".pub-cache/hosted/pub.dev/yaml-3.1.2\"}]").unwrap();
    fs::write(ctx.output_dir().join("rustup-1.83.0.json"), "{}").unwrap();

    post_process_output(&ctx).unwrap();

    let doc = Document::load(&ctx.manifest_output).unwrap();
    assert!(doc.module("flutter-sdk").is_some());
    let app = doc.module(APP_MODULE).unwrap();
    let sources = app.seq("sources").unwrap();
    assert!(sources.iter().any(|s| s.as_str() == Some(PUBSPEC_SOURCES_JSON)));
    assert!(
      !sources
        .iter()
        .filter_map(|s| s.as_mapping())
        .any(|s| s.get_str("type") == Some("dir"))
    );
    let modules = doc.modules().unwrap();
    let rustup_at = modules.iter().position(|m| m.as_str() == Some("rustup-1.83.0.json"));
    let app_at = modules
      .iter()
      .position(|m| m.as_mapping().and_then(|m| m.get_str("name")) == Some(APP_MODULE));
    assert!(rustup_at.is_some() && rustup_at < app_at);

    let text = doc.to_yaml_string().unwrap();
    assert!(text.contains(APP_FLUTTER_BIN));
    assert!(text.contains(SETUP_HELPER_NAME));
  }
}
