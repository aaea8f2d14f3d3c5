//! Manifest-level subcommands: commit pinning, module includes and the
//! `flutter-sdk` setup helper.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use manifest_tool_lib::ci::pr_aware_environment;
use manifest_tool_lib::ops::manifest::{
  ensure_flutter_setup_helper, ensure_module_include, pin_commit, update_manifest_for_build,
};
use manifest_tool_lib::ops::sources::replace_url_with_path;
use manifest_tool_lib::process::{CommandRunner, CommandSpec};

use super::cmd_edit;
use crate::output::{print_info, print_success, print_warning};

/// Exit 1 when the manifest does not exist.
pub fn cmd_replace_url_with_path(manifest: &Path, identifier: &str, path: &str) -> Result<ExitCode> {
  let replaced = replace_url_with_path(manifest, identifier, path)
    .with_context(|| format!("Failed to update manifest: {}", manifest.display()))?;
  match replaced {
    None => {
      print_warning(&format!("Manifest not found: {}", manifest.display()));
      Ok(ExitCode::FAILURE)
    }
    Some(true) => {
      print_success(&format!("Replaced url with path for {identifier}"));
      Ok(ExitCode::SUCCESS)
    }
    Some(false) => Ok(ExitCode::SUCCESS),
  }
}

pub fn cmd_ensure_setup_helper(manifest: &Path, helper: &str) -> Result<()> {
  cmd_edit(manifest, |doc| ensure_flutter_setup_helper(doc, helper))
}

pub fn cmd_pin_commit(manifest: &Path, commit: &str, repo_urls: &[String]) -> Result<()> {
  let urls: Vec<&str> = repo_urls.iter().map(String::as_str).collect();
  let urls = (!urls.is_empty()).then_some(urls.as_slice());
  cmd_edit(manifest, |doc| pin_commit(doc, commit, urls))
}

/// Pin the app sources for a CI build: the PR fork and head commit for
/// `pull_request` events, otherwise `commit` or the current `HEAD`.
pub fn cmd_update_manifest(
  manifest: &Path,
  commit: Option<String>,
  event_name: Option<&str>,
  event_path: Option<&Path>,
) -> Result<()> {
  let pr = pr_aware_environment(event_name, event_path);
  let pr_head = pr
    .get("PR_HEAD_URL")
    .zip(pr.get("PR_HEAD_SHA"))
    .filter(|_| pr.get("PR_MODE").map(String::as_str) == Some("true"));

  if let Some((url, sha)) = pr_head {
    print_info(&format!("PR mode: updating manifest for {url} @ {sha}"));
    return cmd_edit(manifest, |doc| update_manifest_for_build(doc, None, Some(url.as_str()), Some(sha.as_str())));
  }

  let commit = match commit {
    Some(commit) => commit,
    None => {
      let runner = CommandRunner::new().context("Unable to determine current HEAD commit")?;
      let head = runner
        .run(&CommandSpec::new("git").args(["rev-parse", "HEAD"]))
        .context("Unable to determine current HEAD commit")?;
      print_info(&format!("No commit specified, using current HEAD: {head}"));
      head
    }
  };
  cmd_edit(manifest, |doc| update_manifest_for_build(doc, Some(&commit), None, None))
}

pub fn cmd_ensure_module_include(manifest: &Path, name: &str, before: Option<&str>) -> Result<()> {
  cmd_edit(manifest, |doc| ensure_module_include(doc, name, before))
}
