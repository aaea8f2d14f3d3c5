//! Filesystem helpers for staging trees and files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Copy `src` to `dst`, creating parent directories and keeping permissions.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::copy(src, dst)?;
  Ok(())
}

/// Replace `dst` with a recursive copy of `src`.
///
/// An existing directory at `dst` is removed first; symlinks inside `src` are
/// recreated as symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
  remove_path(dst)?;
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).follow_links(false) {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      create_symlink(&link, &target)?;
    } else {
      copy_file(entry.path(), &target)?;
    }
  }

  debug!(src = ?src, dst = ?dst, "copied tree");
  Ok(())
}

/// Remove a file, symlink or directory tree; absent paths are fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Find the first file named `filename` below `root`, in walk order.
pub fn find_file(root: &Path, filename: &str) -> Option<PathBuf> {
  if !root.exists() {
    return None;
  }
  WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(filename))
    .map(|e| e.into_path())
}

/// All files below `root` whose path relative to `root` ends with `suffix`
/// (a `/`-separated path such as `build_tool/pubspec.lock`), sorted.
pub fn find_files_with_suffix(root: &Path, suffix: &str) -> Vec<PathBuf> {
  if !root.exists() {
    return Vec::new();
  }
  let mut found: Vec<PathBuf> = WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .filter(|e| {
      let rel = e.path().strip_prefix(root).unwrap_or(e.path());
      let rel = rel.to_string_lossy().replace('\\', "/");
      rel == suffix || rel.ends_with(&format!("/{suffix}"))
    })
    .map(|e| e.into_path())
    .collect();
  found.sort();
  found
}

/// Mark a file executable for user, group and others.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mut perms = fs::metadata(path)?.permissions();
  perms.set_mode(perms.mode() | 0o111);
  fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> io::Result<()> {
  Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
  if resolved.is_dir() {
    copy_tree(&resolved, link)
  } else {
    fs::copy(&resolved, link).map(|_| ())
  }
}
