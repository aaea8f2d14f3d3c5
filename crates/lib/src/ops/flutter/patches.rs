//! Patch sources for vendored pub.dev packages.
//!
//! flatpak-builder applies sources in order, so a patch targeting a package
//! directory only works once the generated `pubspec-sources.json` (or
//! `cargo-sources.json`) include has unpacked that package.

use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Sequence, Value};
use tracing::{debug, warn};

use crate::consts::{
  APP_MODULE, CARGO_SOURCES_JSON, CARGOKIT_FALLBACK_PACKAGES, CARGOKIT_PACKAGES, CARGOKIT_PATCH,
  PUB_DEV_DEST_PREFIX, PUBSPEC_SOURCES_JSON,
};
use crate::manifest::{Document, ManifestError, MappingExt, OperationResult, module_sources_mut};
use crate::ops::{from_messages, mapping};

/// A generated dependency list, either as a string include or a mapping with
/// a `path`.
fn is_dependency_entry(value: &Value) -> bool {
  let deps = [PUBSPEC_SOURCES_JSON, CARGO_SOURCES_JSON];
  match value {
    Value::String(include) => deps.iter().any(|dep| include.contains(*dep)),
    Value::Mapping(m) => m.get_str("path").is_some_and(|p| deps.iter().any(|dep| p.ends_with(*dep))),
    _ => false,
  }
}

fn is_cargokit_patch(source: &Mapping) -> bool {
  source.get_str("type") == Some("patch")
    && source
      .get_str("dest")
      .is_some_and(|d| d.starts_with(PUB_DEV_DEST_PREFIX) && d.contains("/cargokit"))
    && source.get_str("path").is_some_and(|p| p.ends_with("run_build_tool.sh.patch"))
}

fn is_sqlite_patch(source: &Mapping) -> bool {
  source.get_str("type") == Some("patch")
    && source
      .get_str("path")
      .is_some_and(|p| p.starts_with("sqlite3_flutter_libs/") && p.ends_with("-CMakeLists.txt.patch"))
}

fn is_package_patch(value: &Value) -> bool {
  value.as_mapping().is_some_and(|m| is_cargokit_patch(m) || is_sqlite_patch(m))
}

fn last_dependency_index(sources: &Sequence) -> Option<usize> {
  sources.iter().rposition(is_dependency_entry)
}

/// Move cargokit and sqlite patches that precede the last generated
/// dependency include to just after it, keeping their relative order.
pub fn reorder_patches_after_dependencies(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };
    let Some(last_dependency) = last_dependency_index(sources) else {
      return Ok(OperationResult::unchanged());
    };
    if !sources[..last_dependency].iter().any(is_package_patch) {
      return Ok(OperationResult::unchanged());
    }

    let tail = sources.split_off(last_dependency + 1);
    let (patches, head): (Sequence, Sequence) = std::mem::take(sources).into_iter().partition(is_package_patch);
    sources.extend(head);
    sources.extend(patches);
    sources.extend(tail);

    Ok(OperationResult::changed("Reordered cargokit patches after dependency sources"))
  })
}

/// Whether every module keeps its cargokit and sqlite patches after its last
/// generated dependency include.
pub fn patches_follow_dependencies(doc: &Document) -> bool {
  fn in_order(modules: &Sequence) -> bool {
    modules.iter().filter_map(Value::as_mapping).all(|module| {
      let sources_ok = module.seq("sources").is_none_or(|sources| {
        last_dependency_index(sources).is_none_or(|last| !sources[..last].iter().any(is_package_patch))
      });
      sources_ok && module.seq("modules").is_none_or(in_order)
    })
  }
  doc.modules().is_none_or(in_order)
}

/// `<pkg>-<version>` directories of cargokit plugins listed in a generated
/// `pubspec-sources.json`, in file order.
pub fn cargokit_packages_from_pubspec(path: &Path) -> Vec<String> {
  let entries: Vec<serde_json::Value> = match fs::read_to_string(path)
    .map_err(|e| e.to_string())
    .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
  {
    Ok(entries) => entries,
    Err(error) => {
      warn!(path = ?path, error = %error, "could not read pubspec sources");
      return Vec::new();
    }
  };

  let mut packages: Vec<String> = Vec::new();
  for dest in entries.iter().filter_map(|e| e.get("dest")).filter_map(serde_json::Value::as_str) {
    let Some(dir) = dest.strip_prefix(PUB_DEV_DEST_PREFIX) else {
      continue;
    };
    let dir = dir.split('/').next().unwrap_or(dir);
    let is_cargokit = dir
      .split_once('-')
      .is_some_and(|(name, _)| CARGOKIT_PACKAGES.contains(&name));
    if is_cargokit && !packages.iter().any(|p| p == dir) {
      packages.push(dir.to_string());
    }
  }
  packages
}

/// Patch `run_build_tool.sh` of every cargokit plugin for offline builds.
///
/// Plugins are read from `pubspec_json` when that file exists, otherwise a
/// fixed list of known plugin versions is used. Each patch goes after the
/// last generated dependency include so the package is unpacked first.
pub fn add_cargokit_offline_patches(
  doc: &mut Document,
  pubspec_json: Option<&Path>,
) -> Result<OperationResult, ManifestError> {
  let packages: Vec<String> = match pubspec_json {
    Some(path) if path.is_file() => cargokit_packages_from_pubspec(path),
    _ => CARGOKIT_FALLBACK_PACKAGES.iter().map(|p| p.to_string()).collect(),
  };
  debug!(packages = ?packages, "cargokit packages");
  if packages.is_empty() {
    return Ok(OperationResult::unchanged());
  }

  doc.update_module(APP_MODULE, |module| {
    let existing: Vec<&str> = module
      .seq("sources")
      .into_iter()
      .flatten()
      .filter_map(Value::as_mapping)
      .filter_map(|m| m.get_str("dest"))
      .collect();
    let missing: Vec<(String, String)> = packages
      .iter()
      .map(|pkg| (pkg.clone(), format!("{PUB_DEV_DEST_PREFIX}{pkg}/cargokit")))
      .filter(|(_, dest)| !existing.contains(&dest.as_str()))
      .collect();
    if missing.is_empty() {
      return Ok(OperationResult::unchanged());
    }

    let sources = module_sources_mut(module)?;
    let mut index = last_dependency_index(sources).map_or(sources.len(), |i| i + 1);
    let mut messages = Vec::new();
    for (package, dest) in missing {
      sources.insert(
        index,
        mapping([
          ("type", Value::from("patch")),
          ("path", Value::from(CARGOKIT_PATCH)),
          ("dest", Value::from(dest)),
        ]),
      );
      index += 1;
      messages.push(format!("Added cargokit patch for {package}"));
    }
    Ok(from_messages(messages))
  })
}
