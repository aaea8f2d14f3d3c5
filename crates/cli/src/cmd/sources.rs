use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use manifest_tool_lib::cache::ArtifactCache;
use manifest_tool_lib::ops::sources::{OfflineSources, add_offline_sources, bundle_archive_sources};

use super::cmd_edit;

#[derive(Debug, Args)]
pub struct OfflineSourceArgs {
  /// pubspec JSON filename to include
  #[arg(long)]
  pub pubspec: Option<String>,

  /// cargo JSON filename to include
  #[arg(long)]
  pub cargo: Option<String>,

  /// Additional rustup JSON filenames (repeatable)
  #[arg(long)]
  pub rustup: Vec<String>,

  /// Flutter SDK JSON filename
  #[arg(long = "flutter-json")]
  pub flutter_json: Option<String>,
}

pub fn cmd_add_offline_sources(manifest: &Path, args: &OfflineSourceArgs) -> Result<()> {
  let offline = OfflineSources {
    pubspec: args.pubspec.as_deref(),
    cargo: args.cargo.as_deref(),
    rustup: args.rustup.iter().map(String::as_str).collect(),
    flutter_file: args.flutter_json.as_deref(),
  };
  cmd_edit(manifest, |doc| add_offline_sources(doc, &offline))
}

pub fn cmd_bundle_archive_sources(
  manifest: &Path,
  output_dir: &Path,
  download_missing: bool,
  search_roots: Vec<PathBuf>,
) -> Result<()> {
  let cache = ArtifactCache::new(output_dir, download_missing, search_roots)
    .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
  cmd_edit(manifest, |doc| bundle_archive_sources(doc, &cache))
}
