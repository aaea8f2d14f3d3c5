//! Implementation of the `manifest-tool prepare-flathub` command.
//!
//! Directory layout comes from the flags; every behavior toggle comes from the
//! environment (`PIN_COMMIT`, `TEST_BUILD`, `ALLOW_FALLBACK`, ...).

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use manifest_tool_lib::prepare::{PrepareOptions, prepare_flathub};

#[derive(Debug, Args)]
pub struct PrepareArgs {
  /// Repository root containing the flatpak directory (default: current directory)
  #[arg(long)]
  pub repo_root: Option<PathBuf>,

  /// Override path to the flatpak directory (default: <repo-root>/flatpak)
  #[arg(long)]
  pub flatpak_dir: Option<PathBuf>,

  /// Override work directory (default: <flatpak-dir>/flathub-build)
  #[arg(long)]
  pub work_dir: Option<PathBuf>,

  /// Override output directory (default: <work-dir>/output)
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Path to a local flathub checkout (default: <repo-root>/../flathub)
  #[arg(long)]
  pub flathub_dir: Option<PathBuf>,
}

pub fn cmd_prepare_flathub(args: PrepareArgs) -> Result<()> {
  let options = build_options(args)?.with_env();
  prepare_flathub(options).context("prepare-flathub failed")
}

fn build_options(args: PrepareArgs) -> Result<PrepareOptions> {
  let repo_root = match args.repo_root {
    Some(root) => root,
    None => env::current_dir().context("Failed to read current directory")?,
  };
  let mut options = PrepareOptions::new(resolve(&repo_root)?);
  if let Some(dir) = args.flatpak_dir {
    options.flatpak_dir = resolve(&dir)?;
    options.work_dir = options.flatpak_dir.join("flathub-build");
    options.output_dir = options.work_dir.join("output");
  }
  if let Some(dir) = args.work_dir {
    options.work_dir = resolve(&dir)?;
    options.output_dir = options.work_dir.join("output");
  }
  if let Some(dir) = args.output_dir {
    options.output_dir = resolve(&dir)?;
  }
  options.flathub_dir = args.flathub_dir.as_deref().map(resolve).transpose()?;
  Ok(options)
}

/// Canonical form of `path`, or its absolute form when it does not exist yet.
fn resolve(path: &Path) -> Result<PathBuf> {
  dunce::canonicalize(path)
    .or_else(|_| std::path::absolute(path))
    .with_context(|| format!("Failed to resolve path: {}", path.display()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(repo_root: &Path) -> PrepareArgs {
    PrepareArgs {
      repo_root: Some(repo_root.to_path_buf()),
      flatpak_dir: None,
      work_dir: None,
      output_dir: None,
      flathub_dir: None,
    }
  }

  #[test]
  fn default_layout_below_repo_root() {
    let temp = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let options = build_options(args(&root)).unwrap();
    assert_eq!(options.flatpak_dir, root.join("flatpak"));
    assert_eq!(options.work_dir, root.join("flatpak/flathub-build"));
    assert_eq!(options.output_dir, root.join("flatpak/flathub-build/output"));
    assert_eq!(options.flathub_dir, None);
  }

  #[test]
  fn work_dir_override_moves_output() {
    let temp = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let mut args = args(&root);
    args.work_dir = Some(root.join("build"));
    let options = build_options(args).unwrap();
    assert_eq!(options.flatpak_dir, root.join("flatpak"));
    assert_eq!(options.output_dir, root.join("build/output"));
  }
}
