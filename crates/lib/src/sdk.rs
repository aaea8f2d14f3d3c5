//! Locating a cached Flutter SDK and the version pinned by FVM.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Default search depth below each root.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Environment variable overriding the FVM config location.
pub const FVM_CONFIG_ENV: &str = "FVM_CONFIG_PATH";

/// Walk `search_roots` in order for a directory that looks like a Flutter SDK:
/// an executable `bin/flutter`, a `bin/dart` and a `packages/` directory.
///
/// Directories inside any `exclude` path are not entered, and the walk stops
/// `max_depth` levels below each root.
pub fn find_flutter_sdk(search_roots: &[PathBuf], exclude: &[PathBuf], max_depth: usize) -> Option<PathBuf> {
  let excluded: Vec<PathBuf> = exclude
    .iter()
    .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.clone()))
    .collect();

  search_roots.iter().find_map(|root| search_root(root, &excluded, max_depth))
}

fn search_root(root: &Path, excluded: &[PathBuf], max_depth: usize) -> Option<PathBuf> {
  if !root.exists() {
    return None;
  }

  let walker = WalkDir::new(root)
    .max_depth(max_depth)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_type().is_dir() && !is_excluded(e.path(), excluded));

  for entry in walker.filter_map(Result::ok) {
    if is_flutter_sdk(entry.path()) {
      debug!(path = ?entry.path(), "found Flutter SDK");
      return Some(entry.into_path());
    }
  }
  None
}

fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
  if excluded.is_empty() {
    return false;
  }
  let resolved = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
  excluded.iter().any(|ex| resolved.starts_with(ex))
}

/// Whether `dir` contains a usable Flutter SDK.
pub fn is_flutter_sdk(dir: &Path) -> bool {
  let flutter_bin = dir.join("bin").join("flutter");
  is_executable_file(&flutter_bin) && dir.join("bin").join("dart").exists() && dir.join("packages").is_dir()
}

#[cfg(unix)]
pub fn is_executable_file(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
pub fn is_executable_file(path: &Path) -> bool {
  path.is_file()
}

/// Read the Flutter version from an FVM config file.
///
/// Looks at `flutterSdkVersion`, then `flutterSdk`. Missing or malformed files
/// yield `None`.
pub fn read_fvm_flutter_version(config_path: &Path) -> Option<String> {
  let text = fs::read_to_string(config_path).ok()?;
  let data: serde_json::Value = serde_json::from_str(&text).ok()?;
  ["flutterSdkVersion", "flutterSdk"]
    .iter()
    .filter_map(|key| data.get(*key).and_then(serde_json::Value::as_str))
    .map(str::trim)
    .find(|v| !v.is_empty())
    .map(str::to_string)
}

/// FVM config path for `repo_root`, honouring `FVM_CONFIG_PATH`.
pub fn fvm_config_path(repo_root: &Path) -> PathBuf {
  match env::var_os(FVM_CONFIG_ENV) {
    Some(path) if !path.is_empty() => PathBuf::from(path),
    _ => repo_root.join(".fvm").join("fvm_config.json"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::tempdir;

  fn fake_sdk(dir: &Path) {
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::create_dir_all(dir.join("packages")).unwrap();
    fs::write(dir.join("bin/flutter"), "#!/bin/sh\n").unwrap();
    fs::write(dir.join("bin/dart"), "#!/bin/sh\n").unwrap();
    crate::util::fs::make_executable(&dir.join("bin/flutter")).unwrap();
  }

  mod discovery_tests {
    use super::*;

    #[test]
    fn finds_sdk_below_root() {
      let temp = tempdir().unwrap();
      let sdk = temp.path().join("a/b/flutter");
      fake_sdk(&sdk);

      let found = find_flutter_sdk(&[temp.path().to_path_buf()], &[], DEFAULT_MAX_DEPTH).unwrap();
      assert_eq!(found, sdk);
    }

    #[test]
    fn respects_max_depth() {
      let temp = tempdir().unwrap();
      fake_sdk(&temp.path().join("a/b/c/flutter"));
      assert!(find_flutter_sdk(&[temp.path().to_path_buf()], &[], 2).is_none());
    }

    #[test]
    fn skips_excluded_paths() {
      let temp = tempdir().unwrap();
      fake_sdk(&temp.path().join("work/flutter"));
      let keep = temp.path().join("cache/flutter");
      fake_sdk(&keep);

      let found = find_flutter_sdk(&[temp.path().to_path_buf()], &[temp.path().join("work")], DEFAULT_MAX_DEPTH);
      assert_eq!(found, Some(keep));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_flutter_is_rejected() {
      let temp = tempdir().unwrap();
      let sdk = temp.path().join("flutter");
      fake_sdk(&sdk);
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(sdk.join("bin/flutter"), fs::Permissions::from_mode(0o644)).unwrap();
      assert!(!is_flutter_sdk(&sdk));
    }

    #[test]
    fn missing_roots_are_ignored() {
      let temp = tempdir().unwrap();
      assert!(find_flutter_sdk(&[temp.path().join("absent")], &[], DEFAULT_MAX_DEPTH).is_none());
    }
  }

  mod fvm_tests {
    use super::*;

    #[test]
    fn reads_sdk_version_keys() {
      let temp = tempdir().unwrap();
      let path = temp.path().join("fvm_config.json");

      fs::write(&path, r#"{"flutterSdkVersion": " 3.35.4 "}"#).unwrap();
      assert_eq!(read_fvm_flutter_version(&path).as_deref(), Some("3.35.4"));

      fs::write(&path, r#"{"flutterSdk": "3.32.0"}"#).unwrap();
      assert_eq!(read_fvm_flutter_version(&path).as_deref(), Some("3.32.0"));

      fs::write(&path, r#"{"flutterSdkVersion": ""}"#).unwrap();
      assert_eq!(read_fvm_flutter_version(&path), None);

      fs::write(&path, "{broken").unwrap();
      assert_eq!(read_fvm_flutter_version(&path), None);
    }

    #[test]
    #[serial]
    fn config_path_honours_override() {
      temp_env::with_vars([(FVM_CONFIG_ENV, Some("/tmp/custom.json"))], || {
        assert_eq!(fvm_config_path(Path::new("/repo")), PathBuf::from("/tmp/custom.json"));
      });
      temp_env::with_vars([(FVM_CONFIG_ENV, None::<&str>)], || {
        assert_eq!(
          fvm_config_path(Path::new("/repo")),
          PathBuf::from("/repo/.fvm/fvm_config.json")
        );
      });
    }
  }
}
