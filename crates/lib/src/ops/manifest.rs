//! Manifest-level operators: commit pinning, module includes and helper
//! wiring.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::consts::{APP_FLUTTER_BIN, APP_MODULE, DEFAULT_REPO_URLS, FLUTTER_SDK_MODULE, SETUP_HELPER_NAME};
use crate::manifest::{
  Document, ManifestError, MappingExt, OperationResult, Source, build_commands_mut, env_mut, env_var,
  module_sources_mut, split_path_list,
};
use crate::ops::{from_messages, mapping, string_list};

/// Pin the app's own git sources to `commit`.
///
/// Only `lotti` git sources whose `url` is one of `repo_urls` (by default the
/// canonical repository URLs) are touched; `branch` is dropped from them.
pub fn pin_commit(doc: &mut Document, commit: &str, repo_urls: Option<&[&str]>) -> Result<OperationResult, ManifestError> {
  let urls = repo_urls.unwrap_or(DEFAULT_REPO_URLS);

  doc.update_module(APP_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };

    let mut changed = false;
    for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
      if source.get_str("type") != Some("git") {
        continue;
      }
      if !source.get_str("url").is_some_and(|url| urls.contains(&url)) {
        continue;
      }
      if source.get_str("commit") == Some(commit) && !source.contains_key("branch") {
        continue;
      }
      source.set_str("commit", commit);
      source.remove_key("branch");
      changed = true;
    }

    if changed {
      debug!(commit = %commit, "pinned app sources");
      Ok(OperationResult::changed(format!("Pinned lotti module to {commit}")))
    } else {
      Ok(OperationResult::unchanged())
    }
  })
}

/// Point the app's git sources at the commit (and, for pull requests, the
/// fork) being built.
///
/// PR mode applies when both `pr_url` and `pr_commit` are given; otherwise
/// `commit` is pinned. Flutter checkouts inside the app module are left alone.
pub fn update_manifest_for_build(
  doc: &mut Document,
  commit: Option<&str>,
  pr_url: Option<&str>,
  pr_commit: Option<&str>,
) -> Result<OperationResult, ManifestError> {
  let pr = pr_url.zip(pr_commit);

  doc.update_module(APP_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };

    let mut url_updated = None;
    let mut commit_updated = None;
    let mut branch_dropped = false;
    for source in sources.iter_mut().filter_map(Value::as_mapping_mut) {
      if source.get_str("type") != Some("git") || is_flutter_checkout(source) {
        continue;
      }
      match (pr, commit) {
        (Some((url, sha)), _) => {
          if source.set_str("url", url) {
            url_updated = Some(url);
          }
          if source.set_str("commit", sha) {
            commit_updated = Some(sha);
          }
        }
        (None, Some(sha)) => {
          if source.set_str("commit", sha) {
            commit_updated = Some(sha);
          }
        }
        (None, None) => {}
      }
      if (pr.is_some() || commit.is_some()) && source.remove_key("branch").is_some() {
        branch_dropped = true;
      }
    }

    let mut messages = Vec::new();
    if let Some(url) = url_updated {
      messages.push(format!("Updated URL to {url}"));
    }
    match (commit_updated, pr.is_some()) {
      (Some(sha), true) => messages.push(format!("Pinned to PR commit {sha}")),
      (Some(sha), false) => messages.push(format!("Updated commit to {sha}")),
      (None, _) => {}
    }
    if branch_dropped && messages.is_empty() {
      messages.push("Removed branch from app sources".to_string());
    }
    Ok(from_messages(messages))
  })
}

fn is_flutter_checkout(source: &Mapping) -> bool {
  source.get_str("dest") == Some("flutter") || source.get_str("url").is_some_and(|u| u.contains("flutter/flutter"))
}

/// Ensure the top-level `modules` list contains the string include
/// `module_name`.
///
/// The include goes before the inline module named `before_name` when one
/// exists, otherwise at the end.
pub fn ensure_module_include(
  doc: &mut Document,
  module_name: &str,
  before_name: Option<&str>,
) -> Result<OperationResult, ManifestError> {
  let present = doc
    .modules()
    .is_some_and(|modules| modules.iter().any(|m| m.as_str() == Some(module_name)));
  if present {
    return Ok(OperationResult::unchanged());
  }

  let modules = doc.ensure_modules()?;
  let position = before_name.and_then(|before| {
    modules
      .iter()
      .position(|m| crate::manifest::module_name(m) == Some(before))
  });
  let entry = Value::from(module_name);
  match position {
    Some(index) => modules.insert(index, entry),
    None => modules.push(entry),
  }
  doc.mark_changed();

  Ok(OperationResult::changed(format!("Added module include {module_name}")))
}

/// Wire the setup helper into the manifest.
///
/// The `flutter-sdk` module gets a file source installing `helper_name` as
/// `flutter/bin/setup-flutter.sh`, and the app module's `PATH` gets
/// `/app/flutter/bin` in front.
pub fn ensure_flutter_setup_helper(doc: &mut Document, helper_name: &str) -> Result<OperationResult, ManifestError> {
  let helper = doc.update_module(FLUTTER_SDK_MODULE, |module| {
    let has_helper = module
      .seq("sources")
      .into_iter()
      .flatten()
      .filter_map(Value::as_mapping)
      .any(|s| s.get_str("dest-filename") == Some(SETUP_HELPER_NAME));
    if has_helper {
      return Ok(OperationResult::unchanged());
    }
    module_sources_mut(module)?.push(mapping([
      ("type", Value::from("file")),
      ("path", Value::from(helper_name)),
      ("dest", Value::from("flutter/bin")),
      ("dest-filename", Value::from(SETUP_HELPER_NAME)),
    ]));
    Ok(OperationResult::changed(format!(
      "Added setup helper {helper_name} to flutter-sdk sources"
    )))
  })?;

  let path = doc.update_module(APP_MODULE, |module| {
    let current = env_var(module, "PATH");
    if current.is_some_and(|p| split_path_list(p).iter().any(|e| e == APP_FLUTTER_BIN)) {
      return Ok(OperationResult::unchanged());
    }
    let updated = match current {
      Some(p) if !p.is_empty() => format!("{APP_FLUTTER_BIN}:{p}"),
      _ => APP_FLUTTER_BIN.to_string(),
    };
    env_mut(module)?.set_str("PATH", &updated);
    Ok(OperationResult::changed(format!("Prepended {APP_FLUTTER_BIN} to lotti PATH")))
  })?;

  Ok(helper.merge(path))
}

/// Install the store screenshot from the build directory.
///
/// Targets the app module, or the last inline module when the manifest has
/// no app module. Adds `install -D <source> <install_path>` and a file source
/// for `screenshot_source`.
pub fn ensure_screenshot_asset(
  doc: &mut Document,
  screenshot_source: &str,
  install_path: &str,
) -> Result<OperationResult, ManifestError> {
  let target = match doc.module(APP_MODULE) {
    Some(_) => Some(APP_MODULE.to_string()),
    None => doc
      .modules()
      .and_then(|modules| modules.iter().rev().find_map(crate::manifest::module_name))
      .map(str::to_string),
  };
  let Some(target) = target else {
    return Ok(OperationResult::unchanged());
  };

  let command = format!("install -D {screenshot_source} {install_path}");
  doc.update_module(&target, |module| {
    let mut messages = Vec::new();

    if !string_list(module, "build-commands").any(|c| c == command) {
      build_commands_mut(module)?.push(Value::from(command.as_str()));
      messages.push(format!("Added screenshot install command for {screenshot_source}"));
    }

    let has_source = module
      .seq("sources")
      .into_iter()
      .flatten()
      .any(|s| matches!(Source::from_value(s), Source::File(m) if m.get_str("path") == Some(screenshot_source)));
    if !has_source {
      module_sources_mut(module)?.push(mapping([
        ("type", Value::from("file")),
        ("path", Value::from(screenshot_source)),
      ]));
      messages.push(format!("Added screenshot source {screenshot_source}"));
    }

    Ok(from_messages(messages))
  })
}
