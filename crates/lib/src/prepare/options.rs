//! Runtime options for a preparation run.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::consts::{SQLITE_AUTOCONF_VERSION, SQLITE_SHA256};

/// Environment variables forwarded into the pipeline environment.
pub const FORWARDED_ENV: &[&str] = &[
  "PUB_CACHE",
  "PYTHON",
  "LOTTI_VERSION",
  "LOTTI_RELEASE_DATE",
  "GITHUB_HEAD_REF",
  "GITHUB_REF_NAME",
];

/// Everything the pipeline needs to know before it starts.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
  pub repo_root: PathBuf,
  pub flatpak_dir: PathBuf,
  pub work_dir: PathBuf,
  pub output_dir: PathBuf,
  /// Local checkout of the flathub repository, for the summary instructions.
  pub flathub_dir: Option<PathBuf>,
  pub clean_after_gen: bool,
  pub pin_commit: bool,
  pub use_nested_flutter: bool,
  pub download_missing_sources: bool,
  pub no_flatpak_flutter: bool,
  pub flatpak_flutter_timeout: Option<Duration>,
  pub test_build: bool,
  /// Continue with fallback generation when `flatpak-flutter` fails.
  pub allow_fallback: bool,
  pub sqlite_autoconf_version: String,
  pub sqlite_autoconf_sha256: String,
  pub extra_env: BTreeMap<String, String>,
}

impl PrepareOptions {
  /// Options with default directories below `repo_root` and default flags.
  pub fn new(repo_root: impl Into<PathBuf>) -> Self {
    let repo_root = repo_root.into();
    let flatpak_dir = repo_root.join("flatpak");
    let work_dir = flatpak_dir.join("flathub-build");
    let output_dir = work_dir.join("output");
    Self {
      repo_root,
      flatpak_dir,
      work_dir,
      output_dir,
      flathub_dir: None,
      clean_after_gen: true,
      pin_commit: true,
      use_nested_flutter: false,
      download_missing_sources: true,
      no_flatpak_flutter: false,
      flatpak_flutter_timeout: None,
      test_build: false,
      allow_fallback: false,
      sqlite_autoconf_version: SQLITE_AUTOCONF_VERSION.to_string(),
      sqlite_autoconf_sha256: SQLITE_SHA256.to_string(),
      extra_env: BTreeMap::new(),
    }
  }

  /// Override flags from the process environment.
  pub fn with_env(self) -> Self {
    self.with_vars(|key| env::var(key).ok())
  }

  /// Override flags from `lookup`, which maps a variable name to its value.
  pub fn with_vars<F>(mut self, lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let flag = |key: &str, default: bool| lookup(key).and_then(|v| parse_bool(&v)).unwrap_or(default);

    self.clean_after_gen = flag("CLEAN_AFTER_GEN", self.clean_after_gen);
    self.pin_commit = flag("PIN_COMMIT", self.pin_commit);
    self.use_nested_flutter = flag("USE_NESTED_FLUTTER", self.use_nested_flutter);
    self.download_missing_sources = flag("DOWNLOAD_MISSING_SOURCES", self.download_missing_sources);
    self.no_flatpak_flutter = flag("NO_FLATPAK_FLUTTER", self.no_flatpak_flutter);
    self.test_build = flag("TEST_BUILD", self.test_build);
    self.allow_fallback = flag("ALLOW_FALLBACK", self.allow_fallback);

    if let Some(raw) = lookup("FLATPAK_FLUTTER_TIMEOUT") {
      match raw.trim().parse::<u64>() {
        Ok(secs) => self.flatpak_flutter_timeout = Some(Duration::from_secs(secs)),
        Err(_) => warn!(value = %raw, "ignoring invalid FLATPAK_FLUTTER_TIMEOUT"),
      }
    }
    if let Some(version) = lookup("SQLITE_AUTOCONF_VERSION").filter(|v| !v.is_empty()) {
      self.sqlite_autoconf_version = version;
    }
    if let Some(sha) = lookup("SQLITE_AUTOCONF_SHA256").filter(|v| !v.is_empty()) {
      self.sqlite_autoconf_sha256 = sha;
    }

    for key in FORWARDED_ENV {
      if let Some(value) = lookup(key) {
        self.extra_env.insert((*key).to_string(), value);
      }
    }
    self
  }

  /// Flathub checkout used in the summary, defaulting to a sibling of the repo.
  pub fn flathub_root(&self) -> PathBuf {
    self
      .flathub_dir
      .clone()
      .unwrap_or_else(|| parent_or_self(&self.repo_root).join("flathub"))
  }
}

fn parent_or_self(path: &Path) -> &Path {
  path.parent().unwrap_or(path)
}

/// Parse `1/true/yes/on` and `0/false/no/off`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: BTreeMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn defaults_follow_repo_layout() {
    let options = PrepareOptions::new("/src/lotti");
    assert_eq!(options.flatpak_dir, PathBuf::from("/src/lotti/flatpak"));
    assert_eq!(options.work_dir, PathBuf::from("/src/lotti/flatpak/flathub-build"));
    assert_eq!(options.output_dir, PathBuf::from("/src/lotti/flatpak/flathub-build/output"));
    assert_eq!(options.flathub_root(), PathBuf::from("/src/flathub"));
    assert!(options.clean_after_gen && options.pin_commit && options.download_missing_sources);
    assert!(!options.use_nested_flutter && !options.allow_fallback);
  }

  #[test]
  fn bool_parsing_accepts_common_spellings() {
    for value in ["1", "true", "YES", " On "] {
      assert_eq!(parse_bool(value), Some(true), "{value}");
    }
    for value in ["0", "False", "no", "off"] {
      assert_eq!(parse_bool(value), Some(false), "{value}");
    }
    assert_eq!(parse_bool("maybe"), None);
  }

  #[test]
  fn environment_overrides_flags() {
    let options = PrepareOptions::new("/r").with_vars(vars(&[
      ("CLEAN_AFTER_GEN", "false"),
      ("USE_NESTED_FLUTTER", "yes"),
      ("ALLOW_FALLBACK", "on"),
      ("PIN_COMMIT", "garbage"),
      ("FLATPAK_FLUTTER_TIMEOUT", "90"),
      ("PUB_CACHE", "/tmp/pub"),
      ("UNRELATED", "x"),
    ]));
    assert!(!options.clean_after_gen);
    assert!(options.use_nested_flutter);
    assert!(options.allow_fallback);
    assert!(options.pin_commit);
    assert_eq!(options.flatpak_flutter_timeout, Some(Duration::from_secs(90)));
    assert_eq!(options.extra_env.get("PUB_CACHE").map(String::as_str), Some("/tmp/pub"));
    assert!(!options.extra_env.contains_key("UNRELATED"));
  }

  #[test]
  fn invalid_timeout_is_ignored() {
    let options = PrepareOptions::new("/r").with_vars(vars(&[("FLATPAK_FLUTTER_TIMEOUT", "soon")]));
    assert_eq!(options.flatpak_flutter_timeout, None);
  }

  #[test]
  fn sqlite_overrides_apply() {
    let options = PrepareOptions::new("/r").with_vars(vars(&[("SQLITE_AUTOCONF_VERSION", "sqlite-autoconf-3510000")]));
    assert_eq!(options.sqlite_autoconf_version, "sqlite-autoconf-3510000");
    assert_eq!(options.sqlite_autoconf_sha256, SQLITE_SHA256);
  }
}
