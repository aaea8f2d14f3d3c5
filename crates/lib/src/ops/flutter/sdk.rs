//! Where the Flutter SDK comes from and where the app build finds it.

use std::fs;
use std::path::Path;

use serde_yaml::{Sequence, Value};

use super::is_flutter_repo_url;
use crate::consts::{APP_MODULE, FLUTTER_GIT_URL, FLUTTER_SDK_MODULE};
use crate::manifest::{
  Document, ManifestError, MappingExt, OperationResult, Source, append_path, build_options_mut, env_mut, env_var,
  module_name, prepend_path_entry, split_path_list,
};
use crate::ops::{mapping, remove_matching, string_list};

/// Build command that copies whichever Flutter SDK layout is present into the
/// app build directory.
pub const SDK_COPY_FALLBACK: &str = "if [ -d /var/lib/flutter ]; then cp -r /var/lib/flutter /run/build/lotti/flutter_sdk; \
elif [ -d /app/flutter ]; then cp -r /app/flutter /run/build/lotti/flutter_sdk; \
else echo \"No Flutter SDK found at /var/lib/flutter or /app/flutter\"; exit 1; fi";

/// Sorted names of the `flutter-sdk-*.json` modules in `dir`.
pub fn flutter_sdk_jsons(dir: &Path) -> Vec<String> {
  let Ok(entries) = fs::read_dir(dir) else {
    return Vec::new();
  };
  let mut names: Vec<String> = entries
    .filter_map(Result::ok)
    .filter(|e| e.path().is_file())
    .filter_map(|e| e.file_name().into_string().ok())
    .filter(|name| name.starts_with("flutter-sdk-") && name.ends_with(".json"))
    .collect();
  names.sort();
  names
}

/// Reference every generated `flutter-sdk-*.json` from `lotti.modules`.
///
/// A non-list `modules` value is replaced. When references were added and are
/// in place, the top-level `flutter-sdk` module is dropped.
pub fn ensure_nested_sdk(doc: &mut Document, output_dir: &Path) -> Result<OperationResult, ManifestError> {
  let jsons = flutter_sdk_jsons(output_dir);
  if jsons.is_empty() {
    return Ok(OperationResult::unchanged());
  }

  let result = doc.update_module(APP_MODULE, |module| {
    let missing: Vec<&str> = jsons
      .iter()
      .map(String::as_str)
      .filter(|json| !string_list(module, "modules").any(|m| m == *json))
      .collect();
    if missing.is_empty() {
      return Ok(OperationResult::unchanged());
    }
    module.ensure_seq("modules")?.extend(missing.iter().map(|m| Value::from(*m)));
    Ok(OperationResult::changed(format!(
      "Ensured nested Flutter SDK references: {}",
      missing.join(", ")
    )))
  })?;

  if result.changed && should_remove_flutter_sdk(doc, output_dir) {
    return Ok(result.merge(remove_flutter_sdk_module(doc)?));
  }
  Ok(result)
}

/// Whether a generated `flutter-sdk-*.json` exists in `output_dir` and is
/// referenced from `lotti.modules`.
pub fn should_remove_flutter_sdk(doc: &Document, output_dir: &Path) -> bool {
  let jsons = flutter_sdk_jsons(output_dir);
  if jsons.is_empty() {
    return false;
  }
  doc.module(APP_MODULE).is_some_and(|module| {
    string_list(module, "modules").any(|entry| {
      let name = Path::new(entry).file_name().and_then(|n| n.to_str()).unwrap_or(entry);
      jsons.iter().any(|json| json == name)
    })
  })
}

/// Drop the top-level `flutter-sdk` module.
pub fn remove_flutter_sdk_module(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  let Some(modules) = doc.modules_mut()? else {
    return Ok(OperationResult::unchanged());
  };
  if remove_matching(modules, |m| module_name(m) == Some(FLUTTER_SDK_MODULE)) == 0 {
    return Ok(OperationResult::unchanged());
  }
  doc.mark_changed();
  Ok(OperationResult::changed("Removed top-level flutter-sdk module"))
}

/// Reduce `flutter-sdk` build commands to moving the SDK into place and
/// exporting its `bin`; `mv flutter /app/flutter` leads when no move exists.
pub fn normalize_flutter_sdk_module(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(FLUTTER_SDK_MODULE, |module| {
    let mut wanted: Vec<String> = string_list(module, "build-commands")
      .filter(|c| c.starts_with("mv flutter ") || c.starts_with("export PATH=/app/flutter/bin"))
      .map(str::to_string)
      .collect();
    if !wanted.iter().any(|c| c.starts_with("mv flutter ")) {
      wanted.insert(0, "mv flutter /app/flutter".to_string());
    }

    let unchanged = module.seq("build-commands").is_some_and(|current| {
      current.len() == wanted.len() && current.iter().zip(&wanted).all(|(a, b)| a.as_str() == Some(b.as_str()))
    });
    if unchanged {
      return Ok(OperationResult::unchanged());
    }

    let commands: Sequence = wanted.into_iter().map(Value::from).collect();
    module.insert(Value::from("build-commands"), Value::Sequence(commands));
    Ok(OperationResult::changed("Normalized flutter-sdk build commands"))
  })
}

/// Make sure `flutter_bin` is on the app module's search path.
///
/// Targets `build-options.append-path` when `ensure_append_path` is set,
/// `build-options.env.PATH` otherwise. The entry is prepended only when absent.
pub fn normalize_lotti_env(
  doc: &mut Document,
  flutter_bin: &str,
  ensure_append_path: bool,
) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let current = if ensure_append_path {
      append_path(module)
    } else {
      env_var(module, "PATH")
    };
    if current.is_some_and(|value| split_path_list(value).iter().any(|e| e == flutter_bin)) {
      return Ok(OperationResult::unchanged());
    }
    let Some(updated) = prepend_path_entry(current, flutter_bin) else {
      return Ok(OperationResult::unchanged());
    };

    if ensure_append_path {
      build_options_mut(module)?.set_str("append-path", &updated);
    } else {
      env_mut(module)?.set_str("PATH", &updated);
    }
    Ok(OperationResult::changed(format!("Ensured lotti PATH includes {flutter_bin}")))
  })
}

/// Replace the plain SDK copy in the app build with [`SDK_COPY_FALLBACK`].
pub fn normalize_sdk_copy(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(commands) = module.seq_mut("build-commands") else {
      return Ok(OperationResult::unchanged());
    };

    let mut changed = false;
    for command in commands.iter_mut() {
      let is_copy = command
        .as_str()
        .is_some_and(|c| c != SDK_COPY_FALLBACK && c.contains("cp -r /app/flutter") && c.contains("flutter_sdk"));
      if is_copy {
        *command = Value::from(SDK_COPY_FALLBACK);
        changed = true;
      }
    }

    Ok(if changed {
      OperationResult::changed("Replaced flutter-sdk copy with fallback snippet")
    } else {
      OperationResult::unchanged()
    })
  })
}

fn is_flutter_git(value: &Value) -> bool {
  matches!(Source::from_value(value), Source::Git(m) if m.get_str("url").is_some_and(is_flutter_repo_url))
}

/// Swap the Flutter git checkout in `flutter-sdk` for a bundled archive.
///
/// Every upstream Flutter git source is removed and a single local archive
/// source takes the place of the first one.
pub fn convert_flutter_git_to_archive(
  doc: &mut Document,
  archive_name: &str,
  sha256: &str,
) -> Result<OperationResult, ManifestError> {
  doc.update_module(FLUTTER_SDK_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };
    let Some(first) = sources.iter().position(is_flutter_git) else {
      return Ok(OperationResult::unchanged());
    };

    remove_matching(sources, is_flutter_git);
    let already_bundled = sources.iter().any(|s| {
      matches!(Source::from_value(s), Source::Archive(m) if m.get_str("path") == Some(archive_name))
    });
    if !already_bundled {
      let archive = mapping([
        ("type", Value::from("archive")),
        ("path", Value::from(archive_name)),
        ("sha256", Value::from(sha256)),
        ("dest", Value::from("flutter")),
        ("strip-components", Value::from(1)),
      ]);
      sources.insert(first.min(sources.len()), archive);
    }

    Ok(OperationResult::changed(format!(
      "Converted Flutter SDK git source to archive {archive_name}"
    )))
  })
}

/// Reset every Flutter git source, in any module, to the canonical upstream
/// URL.
pub fn rewrite_flutter_git_url(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_all_modules(|module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };

    let mut changed = false;
    for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
      if source.get_str("type") != Some("git") {
        continue;
      }
      if source.get_str("url").is_some_and(is_flutter_repo_url) {
        changed |= source.set_str("url", FLUTTER_GIT_URL);
      }
    }

    Ok(if changed {
      OperationResult::changed(format!("Rewrote Flutter git URL to {FLUTTER_GIT_URL}"))
    } else {
      OperationResult::unchanged()
    })
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::testutil::{doc, sample};
  use tempfile::tempdir;

  fn commands(d: &Document, module: &str) -> Vec<String> {
    string_list(d.module(module).unwrap(), "build-commands")
      .map(str::to_string)
      .collect()
  }

  mod nested_sdk_tests {
    use super::*;

    #[test]
    fn references_sorted_jsons_and_drops_top_level_module() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("flutter-sdk-3.35.4.json"), "{}").unwrap();
      fs::write(temp.path().join("flutter-sdk-3.32.0.json"), "{}").unwrap();
      fs::write(temp.path().join("pubspec-sources.json"), "[]").unwrap();

      let mut d = sample();
      let result = ensure_nested_sdk(&mut d, temp.path()).unwrap();
      assert_eq!(
        result.messages,
        [
          "Ensured nested Flutter SDK references: flutter-sdk-3.32.0.json, flutter-sdk-3.35.4.json",
          "Removed top-level flutter-sdk module",
        ]
      );
      assert!(d.module(FLUTTER_SDK_MODULE).is_none());
      let nested: Vec<_> = string_list(d.module(APP_MODULE).unwrap(), "modules").collect();
      assert_eq!(nested, ["flutter-sdk-3.32.0.json", "flutter-sdk-3.35.4.json"]);

      assert_eq!(ensure_nested_sdk(&mut d, temp.path()).unwrap(), OperationResult::unchanged());
    }

    #[test]
    fn no_jsons_is_noop() {
      let temp = tempdir().unwrap();
      let mut d = sample();
      assert_eq!(ensure_nested_sdk(&mut d, temp.path()).unwrap(), OperationResult::unchanged());
      assert!(d.module(FLUTTER_SDK_MODULE).is_some());
      assert!(!d.is_changed());
    }

    #[test]
    fn removal_requires_reference() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("flutter-sdk-3.35.4.json"), "{}").unwrap();
      let d = sample();
      assert!(!should_remove_flutter_sdk(&d, temp.path()));

      let d = doc("modules:\n  - name: lotti\n    modules:\n      - flutter-sdk-3.35.4.json\n");
      assert!(should_remove_flutter_sdk(&d, temp.path()));
    }

    #[test]
    fn remove_module_is_idempotent() {
      let mut d = sample();
      assert!(remove_flutter_sdk_module(&mut d).unwrap().changed);
      assert!(d.is_changed());
      assert_eq!(remove_flutter_sdk_module(&mut d).unwrap(), OperationResult::unchanged());
    }
  }

  mod normalize_tests {
    use super::*;

    #[test]
    fn sdk_module_keeps_move_and_export() {
      let mut d = sample();
      let result = normalize_flutter_sdk_module(&mut d).unwrap();
      assert_eq!(result.messages, ["Normalized flutter-sdk build commands"]);
      assert_eq!(
        commands(&d, FLUTTER_SDK_MODULE),
        ["mv flutter /app/flutter", "export PATH=/app/flutter/bin:$PATH"]
      );
      assert_eq!(normalize_flutter_sdk_module(&mut d).unwrap(), OperationResult::unchanged());
    }

    #[test]
    fn sdk_module_gains_move_when_missing() {
      let mut d = doc("modules:\n  - name: flutter-sdk\n    build-commands:\n      - flutter doctor\n");
      normalize_flutter_sdk_module(&mut d).unwrap();
      assert_eq!(commands(&d, FLUTTER_SDK_MODULE), ["mv flutter /app/flutter"]);
    }

    #[test]
    fn lotti_env_prepends_once() {
      let mut d = sample();
      let result = normalize_lotti_env(&mut d, "/var/lib/flutter/bin", true).unwrap();
      assert_eq!(result.messages, ["Ensured lotti PATH includes /var/lib/flutter/bin"]);
      assert_eq!(append_path(d.module(APP_MODULE).unwrap()), Some("/var/lib/flutter/bin:/usr/bin"));
      // env.PATH untouched in append-path mode
      assert_eq!(env_var(d.module(APP_MODULE).unwrap(), "PATH"), Some("/usr/bin"));
      assert!(!normalize_lotti_env(&mut d, "/var/lib/flutter/bin", true).unwrap().changed);
    }

    #[test]
    fn lotti_env_targets_path_without_append_flag() {
      let mut d = sample();
      normalize_lotti_env(&mut d, "/app/flutter/bin", false).unwrap();
      assert_eq!(env_var(d.module(APP_MODULE).unwrap(), "PATH"), Some("/app/flutter/bin:/usr/bin"));
    }

    #[test]
    fn sdk_copy_becomes_fallback() {
      let mut d = sample();
      let result = normalize_sdk_copy(&mut d).unwrap();
      assert_eq!(result.messages, ["Replaced flutter-sdk copy with fallback snippet"]);
      assert_eq!(commands(&d, APP_MODULE), [SDK_COPY_FALLBACK, "echo build"]);
      assert_eq!(normalize_sdk_copy(&mut d).unwrap(), OperationResult::unchanged());
    }
  }

  mod git_tests {
    use super::*;

    #[test]
    fn converts_git_checkout_to_local_archive() {
      let mut d = sample();
      let result = convert_flutter_git_to_archive(&mut d, "flutter_linux_3.35.4-stable.tar.xz", "abc").unwrap();
      assert_eq!(
        result.messages,
        ["Converted Flutter SDK git source to archive flutter_linux_3.35.4-stable.tar.xz"]
      );

      let sources = d.module(FLUTTER_SDK_MODULE).unwrap().seq("sources").unwrap().clone();
      assert_eq!(sources.len(), 1);
      let archive = sources[0].as_mapping().unwrap();
      assert_eq!(archive.get_str("type"), Some("archive"));
      assert_eq!(archive.get_str("path"), Some("flutter_linux_3.35.4-stable.tar.xz"));
      assert_eq!(archive.get_str("dest"), Some("flutter"));
      assert_eq!(archive.get("strip-components"), Some(&Value::from(1)));
      assert!(!archive.contains_key("url"));

      assert_eq!(
        convert_flutter_git_to_archive(&mut d, "flutter_linux_3.35.4-stable.tar.xz", "abc").unwrap(),
        OperationResult::unchanged()
      );
    }

    #[test]
    fn rewrites_fork_urls_everywhere() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    sources:
      - type: git
        url: https://github.com/someone/flutter/flutter.git
      - type: git
        url: https://github.com/matthiasn/lotti
    modules:
      - name: inner
        sources:
          - type: git
            url: git@github.com:flutter/flutter
"#,
      );
      let result = rewrite_flutter_git_url(&mut d).unwrap();
      assert_eq!(result.messages.len(), 2);
      let text = d.to_yaml_string().unwrap();
      assert_eq!(text.matches(FLUTTER_GIT_URL).count(), 2);
      assert!(text.contains("https://github.com/matthiasn/lotti"));
      assert_eq!(rewrite_flutter_git_url(&mut d).unwrap(), OperationResult::unchanged());
    }
  }
}
