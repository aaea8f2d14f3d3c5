//! Source-level operators: local paths, offline includes and bundling.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Sequence, Value};
use tracing::debug;

use crate::cache::{ArtifactCache, url_filename};
use crate::consts::APP_MODULE;
use crate::manifest::{Document, ManifestError, MappingExt, OperationResult, Source, module_sources_mut};
use crate::ops::{mapping, remove_matching};

static RUSTUP_JSON_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^rustup-.*\.json$").expect("valid rustup json regex"));

/// Rewrite sources whose `url` contains `identifier` to point at the local
/// `path_value` instead.
///
/// Looks at a root-level `sources` list and at every top-level module's
/// `sources`. The file is written only when something changed. Returns
/// `Ok(None)` when `manifest_path` does not exist.
pub fn replace_url_with_path(
  manifest_path: &Path,
  identifier: &str,
  path_value: &str,
) -> Result<Option<bool>, ManifestError> {
  if !manifest_path.is_file() {
    return Ok(None);
  }

  let mut doc = Document::load(manifest_path)?;
  let mut changed = false;

  if let Some(sources) = doc.data_mut().seq_mut("sources") {
    changed |= replace_in_sources(sources, identifier, path_value);
  }
  if let Some(modules) = doc.modules_mut()? {
    for module in modules.iter_mut().filter_map(Value::as_mapping_mut) {
      if let Some(sources) = module.seq_mut("sources") {
        changed |= replace_in_sources(sources, identifier, path_value);
      }
    }
  }

  if changed {
    doc.save()?;
    debug!(identifier = %identifier, path = %path_value, "replaced url with path");
  }
  Ok(Some(changed))
}

fn replace_in_sources(sources: &mut Sequence, identifier: &str, path_value: &str) -> bool {
  let mut changed = false;
  for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
    if source.get_str("url").is_some_and(|url| url.contains(identifier)) {
      source.remove_key("url");
      source.set_str("path", path_value);
      changed = true;
    }
  }
  changed
}

/// Line-based variant of [`replace_url_with_path`] working on raw text.
///
/// Every line containing `url:` and `identifier` becomes
/// `<indent>path: <path_value>`.
#[deprecated(note = "text rewriting is fragile; use replace_url_with_path")]
pub fn replace_url_with_path_text(text: &str, identifier: &str, path_value: &str) -> (String, bool) {
  let mut changed = false;
  let lines: Vec<String> = text
    .lines()
    .map(|line| match line.split_once("url:") {
      Some((prefix, _)) if line.contains(identifier) => {
        changed = true;
        format!("{prefix}path: {path_value}")
      }
      _ => line.to_string(),
    })
    .collect();

  if !changed {
    return (text.to_string(), false);
  }
  (lines.join("\n") + "\n", true)
}

/// Resolve every remote `archive`/`file` source to a local copy.
///
/// Each such source with a `url` is handed to `cache`; when the artifact is
/// available locally the `url` is replaced by `path` (the filename inside the
/// output directory) and `sha256` is kept as declared. Cache messages are
/// always returned, even when nothing could be rewritten.
pub fn bundle_archive_sources(doc: &mut Document, cache: &ArtifactCache) -> Result<OperationResult, ManifestError> {
  let mut messages = Vec::new();
  let result = doc.update_all_modules(|module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };

    let mut changed = false;
    for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
      if !matches!(source.get_str("type"), Some("archive" | "file")) {
        continue;
      }
      let Some(url) = source.get_str("url").filter(|u| !u.is_empty()).map(str::to_string) else {
        continue;
      };

      let filename = url_filename(&url);
      let (local, fetch_messages) = cache.ensure_local(&filename, &url);
      messages.extend(fetch_messages);
      let Some(local) = local else {
        continue;
      };

      let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(filename);
      source.set_str("path", &name);
      source.remove_key("url");
      changed = true;
    }
    Ok(OperationResult::new(changed, Vec::new()))
  })?;

  Ok(OperationResult::new(result.changed, messages))
}

fn is_rustup_source(value: &Value) -> bool {
  match Source::from_value(value) {
    Source::Include(name) => RUSTUP_JSON_RE.is_match(name),
    Source::File(m) => m.get_str("path").is_some_and(|p| RUSTUP_JSON_RE.is_match(p)),
    _ => false,
  }
}

/// Drop `rustup-*.json` references, as string includes or file paths, from
/// every module's sources.
pub fn remove_rustup_sources(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_all_modules(|module| {
    let name = module.get_str("name").unwrap_or("<unnamed>").to_string();
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };
    let removed = remove_matching(sources, is_rustup_source);
    if removed == 0 {
      return Ok(OperationResult::unchanged());
    }
    Ok(OperationResult::changed(format!(
      "Removed {removed} rustup JSON reference(s) from module {name}"
    )))
  })
}

/// Generated dependency lists to reference from the app module.
#[derive(Debug, Default, Clone)]
pub struct OfflineSources<'a> {
  pub pubspec: Option<&'a str>,
  pub cargo: Option<&'a str>,
  pub rustup: Vec<&'a str>,
  /// Extra file that must ship next to the manifest, added as a file source.
  pub flutter_file: Option<&'a str>,
}

/// Append missing string includes for the generated dependency lists to the
/// app module, in the order pubspec, cargo, rustup.
pub fn add_offline_sources(doc: &mut Document, offline: &OfflineSources<'_>) -> Result<OperationResult, ManifestError> {
  let includes: Vec<&str> = offline
    .pubspec
    .into_iter()
    .chain(offline.cargo)
    .chain(offline.rustup.iter().copied())
    .filter(|s| !s.is_empty())
    .collect();

  doc.update_module(APP_MODULE, |module| {
    let existing = module.seq("sources");
    let has_include = |name: &str| existing.is_some_and(|s| s.iter().any(|v| v.as_str() == Some(name)));
    let mut missing: Vec<&str> = Vec::new();
    for &include in &includes {
      if !has_include(include) && !missing.contains(&include) {
        missing.push(include);
      }
    }

    let file_missing = offline.flutter_file.filter(|f| {
      !existing.is_some_and(|s| {
        s.iter()
          .any(|v| matches!(Source::from_value(v), Source::File(m) if m.get_str("path") == Some(*f)))
      })
    });

    if missing.is_empty() && file_missing.is_none() {
      return Ok(OperationResult::unchanged());
    }

    let sources = module_sources_mut(module)?;
    let mut messages = Vec::new();
    if !missing.is_empty() {
      sources.extend(missing.iter().map(|s| Value::from(*s)));
      messages.push(format!("Added offline source references: {}", missing.join(", ")));
    }
    if let Some(file) = file_missing {
      sources.push(mapping([("type", Value::from("file")), ("path", Value::from(file))]));
      messages.push(format!("Ensured helper file {file} available in sources"));
    }
    Ok(OperationResult::changed_with(messages))
  })
}

/// Drop local `dir` sources from the app module; they only exist for the
/// generator run and must not reach the submitted manifest.
pub fn remove_local_dir_sources(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };
    let removed = remove_matching(sources, |v| matches!(Source::from_value(v), Source::Dir(_)));
    if removed == 0 {
      return Ok(OperationResult::unchanged());
    }
    Ok(OperationResult::changed(format!(
      "Removed {removed} local dir source(s) from final manifest"
    )))
  })
}
