mod check;
mod ci;
mod flutter;
mod manifest;
mod prepare;
mod sdk;
mod sources;

use std::path::Path;

use anyhow::{Context, Result};
use manifest_tool_lib::manifest::{Document, ManifestError, OperationResult};
use tracing::debug;

pub use check::cmd_check_flathub_compliance;
pub use ci::cmd_pr_aware_pin;
pub use flutter::{
  Layout, cmd_bundle_app_archive, cmd_convert_flutter_git_to_archive, cmd_ensure_lotti_setup_helper,
  cmd_ensure_nested_sdk, cmd_normalize_lotti_env, cmd_should_remove_flutter_sdk,
};
pub use manifest::{
  cmd_ensure_module_include, cmd_ensure_setup_helper, cmd_pin_commit, cmd_replace_url_with_path, cmd_update_manifest,
};
pub use prepare::{PrepareArgs, cmd_prepare_flathub};
pub use sdk::cmd_find_flutter_sdk;
pub use sources::{OfflineSourceArgs, cmd_add_offline_sources, cmd_bundle_archive_sources};

/// Load `manifest`, run `op`, save when it changed and print its messages.
pub fn cmd_edit<F>(manifest: &Path, op: F) -> Result<()>
where
  F: FnOnce(&mut Document) -> Result<OperationResult, ManifestError>,
{
  let mut doc = Document::load(manifest).with_context(|| format!("Failed to load manifest: {}", manifest.display()))?;
  let result = op(&mut doc).context("Operation failed")?;
  if result.changed {
    doc
      .save()
      .with_context(|| format!("Failed to save manifest: {}", manifest.display()))?;
  } else {
    debug!(path = %manifest.display(), "manifest unchanged");
  }
  for message in &result.messages {
    println!("{message}");
  }
  Ok(())
}
