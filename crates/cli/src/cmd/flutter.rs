//! Flutter SDK layout subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use manifest_tool_lib::consts::{APP_FLUTTER_BIN, NESTED_FLUTTER_BIN};
use manifest_tool_lib::manifest::{Document, merge_results};
use manifest_tool_lib::ops::flutter::{
  bundle_app_archive, convert_flutter_git_to_archive, ensure_nested_sdk, ensure_setup_helper_command,
  ensure_setup_helper_source, normalize_lotti_env, should_remove_flutter_sdk,
};

use super::cmd_edit;

/// Where the Flutter SDK is installed inside the build sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Layout {
  /// Top-level `flutter-sdk` module installing to `/app/flutter`.
  #[default]
  Top,
  /// SDK modules nested under `lotti`, installing to `/var/lib/flutter`.
  Nested,
}

impl Layout {
  pub fn flutter_bin(self) -> &'static str {
    match self {
      Layout::Top => APP_FLUTTER_BIN,
      Layout::Nested => NESTED_FLUTTER_BIN,
    }
  }

  pub fn working_dir(self) -> &'static str {
    match self {
      Layout::Top => "/app",
      Layout::Nested => "/var/lib",
    }
  }
}

pub fn cmd_ensure_nested_sdk(manifest: &Path, output_dir: &Path) -> Result<()> {
  cmd_edit(manifest, |doc| ensure_nested_sdk(doc, output_dir))
}

pub fn cmd_normalize_lotti_env(manifest: &Path, layout: Layout, append_path: bool) -> Result<()> {
  cmd_edit(manifest, |doc| normalize_lotti_env(doc, layout.flutter_bin(), append_path))
}

pub fn cmd_ensure_lotti_setup_helper(manifest: &Path, layout: Layout, helper: &str) -> Result<()> {
  cmd_edit(manifest, |doc| {
    let source = ensure_setup_helper_source(doc, helper)?;
    let command = ensure_setup_helper_command(doc, Some(layout.working_dir()), false, &[])?;
    Ok(merge_results([source, command]))
  })
}

/// Print `1` when the top-level `flutter-sdk` module can go, `0` otherwise.
pub fn cmd_should_remove_flutter_sdk(manifest: &Path, output_dir: &Path) -> Result<()> {
  let doc = Document::load(manifest).with_context(|| format!("Failed to load manifest: {}", manifest.display()))?;
  let remove = should_remove_flutter_sdk(&doc, output_dir);
  println!("{}", if remove { 1 } else { 0 });
  Ok(())
}

pub fn cmd_convert_flutter_git_to_archive(manifest: &Path, archive: &str, sha256: &str) -> Result<()> {
  cmd_edit(manifest, |doc| convert_flutter_git_to_archive(doc, archive, sha256))
}

/// The archive path is recorded relative to `output_dir`.
pub fn cmd_bundle_app_archive(manifest: &Path, archive: &str, sha256: &str, output_dir: &Path) -> Result<()> {
  let archive_path = output_dir.join(archive);
  let archive_path = archive_path.to_string_lossy();
  cmd_edit(manifest, |doc| bundle_app_archive(doc, &archive_path, sha256))
}
