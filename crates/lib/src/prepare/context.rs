//! Stage 1: everything known about the run before any file is touched.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use super::error::PrepareError;
use super::options::PrepareOptions;
use super::status::StatusPrinter;
use crate::ci::pr_aware_environment;
use crate::consts::{APP_ID, SETUP_HELPER_NAME};
use crate::process::{CommandRunner, CommandSpec};
use crate::sdk::{DEFAULT_MAX_DEPTH, find_flutter_sdk};

/// Facts about the application checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
  pub version: String,
  pub release_date: String,
  pub branch: String,
  pub commit: String,
}

/// State shared by every stage of a run.
pub struct PrepareContext {
  pub options: PrepareOptions,
  pub runner: CommandRunner,
  pub printer: StatusPrinter,
  pub manifest_template: PathBuf,
  pub manifest_work: PathBuf,
  pub manifest_output: PathBuf,
  pub flatpak_flutter_repo: PathBuf,
  pub flatpak_flutter_log: PathBuf,
  pub setup_helper_source: PathBuf,
  pub screenshot_source: PathBuf,
  /// Forwarded variables plus the PR metadata from the CI adapter.
  pub env: BTreeMap<String, String>,
  pub repo: RepoInfo,
  pub flutter_tag: Option<String>,
  pub cached_flutter_dir: Option<PathBuf>,
  /// Exit status of `flatpak-flutter`; `None` until it ran.
  pub generator_status: Option<i32>,
  pub pr_head_commit: Option<String>,
  pub pr_head_url: Option<String>,
}

impl PrepareContext {
  pub fn new(options: PrepareOptions, runner: CommandRunner, env: BTreeMap<String, String>, repo: RepoInfo) -> Self {
    let manifest_name = format!("{APP_ID}.yml");
    let flatpak_dir = options.flatpak_dir.clone();
    let pr_head_commit = env.get("PR_HEAD_SHA").filter(|v| !v.is_empty()).cloned();
    let pr_head_url = env.get("PR_HEAD_URL").filter(|v| !v.is_empty()).cloned();

    Self {
      manifest_template: flatpak_dir.join(format!("{APP_ID}.source.yml")),
      manifest_work: options.work_dir.join(&manifest_name),
      manifest_output: options.output_dir.join(&manifest_name),
      flatpak_flutter_repo: flatpak_dir.join("flatpak-flutter"),
      flatpak_flutter_log: options.work_dir.join("flatpak-flutter.log"),
      setup_helper_source: flatpak_dir.join("helpers").join(SETUP_HELPER_NAME),
      screenshot_source: flatpak_dir.join("screenshot.png"),
      options,
      runner,
      printer: StatusPrinter,
      env,
      repo,
      flutter_tag: None,
      cached_flutter_dir: None,
      generator_status: None,
      pr_head_commit,
      pr_head_url,
    }
  }

  pub fn repo_root(&self) -> &Path {
    &self.options.repo_root
  }

  pub fn flatpak_dir(&self) -> &Path {
    &self.options.flatpak_dir
  }

  pub fn work_dir(&self) -> &Path {
    &self.options.work_dir
  }

  pub fn output_dir(&self) -> &Path {
    &self.options.output_dir
  }

  /// Build directories `flatpak-flutter` keeps below the work dir.
  pub fn builder_build_dir(&self) -> PathBuf {
    self.work_dir().join(".flatpak-builder").join("build")
  }

  /// The Flutter SDK primed for (and used by) the generator.
  pub fn primed_sdk_dir(&self) -> PathBuf {
    self.builder_build_dir().join("lotti").join("flutter")
  }

  /// Filename shared by the working and output manifests.
  pub fn manifest_name(&self) -> String {
    format!("{APP_ID}.yml")
  }

  pub fn flutter_tag_or_stable(&self) -> &str {
    self.flutter_tag.as_deref().unwrap_or("stable")
  }

  /// Commit the manifests are pinned to: the PR head when building a PR.
  pub fn pinned_commit(&self) -> &str {
    self.pr_head_commit.as_deref().unwrap_or(&self.repo.commit)
  }

  /// Python interpreter for the generator scripts.
  pub fn python(&self) -> String {
    self
      .env
      .get("PYTHON")
      .filter(|p| !p.is_empty())
      .cloned()
      .unwrap_or_else(|| "python3".to_string())
  }

  pub fn generator_succeeded(&self) -> bool {
    self.generator_status == Some(0)
  }
}

/// Collect version, branch, commit and PR metadata, and look for a cached SDK.
pub fn build_context(options: PrepareOptions, printer: StatusPrinter) -> Result<PrepareContext, PrepareError> {
  let runner = CommandRunner::new()?;

  let mut env = options.extra_env.clone();
  let event_path = env::var_os("GITHUB_EVENT_PATH").map(PathBuf::from);
  env.extend(pr_aware_environment(
    env::var("GITHUB_EVENT_NAME").ok().as_deref(),
    event_path.as_deref(),
  ));

  let repo_root = options.repo_root.clone();
  let version = match env.get("LOTTI_VERSION").filter(|v| !v.is_empty()) {
    Some(version) => version.clone(),
    None => derive_version(&repo_root)?,
  };
  let release_date = env
    .get("LOTTI_RELEASE_DATE")
    .filter(|v| !v.is_empty())
    .cloned()
    .unwrap_or_else(today);
  let branch = determine_branch(&runner, &repo_root, &env, printer)?;
  let commit = git(&runner, &repo_root, &["rev-parse", "HEAD"])?;

  let repo = RepoInfo {
    version,
    release_date,
    branch,
    commit,
  };
  let mut context = PrepareContext::new(options, runner, env, repo);
  context.cached_flutter_dir = find_flutter_sdk(&[repo_root], &[], DEFAULT_MAX_DEPTH);

  printer.info(format!("Using version: {}", context.repo.version));
  printer.info(format!("Release date: {}", context.repo.release_date));
  printer.info(format!("Branch: {}", context.repo.branch));
  printer.info(format!("Commit: {}", context.repo.commit));
  match &context.cached_flutter_dir {
    Some(dir) => printer.info(format!("Found cached Flutter SDK at {}", dir.display())),
    None => printer.warn("No cached Flutter SDK found in local search roots"),
  }

  Ok(context)
}

/// Banner and effective options, on stdout.
pub fn print_intro(context: &PrepareContext) {
  let options = &context.options;
  println!("==========================================");
  println!("   Flathub Submission Preparation");
  println!("==========================================");
  println!("Version: {}", context.repo.version);
  println!("Release Date: {}", context.repo.release_date);
  println!("Branch: {}", context.repo.branch);
  println!();
  context.printer.info("Effective options:");
  println!("  PIN_COMMIT={}", options.pin_commit);
  println!("  USE_NESTED_FLUTTER={}", options.use_nested_flutter);
  println!("  DOWNLOAD_MISSING_SOURCES={}", options.download_missing_sources);
  println!("  CLEAN_AFTER_GEN={}", options.clean_after_gen);
  println!("  NO_FLATPAK_FLUTTER={}", options.no_flatpak_flutter);
  match options.flatpak_flutter_timeout {
    Some(timeout) => println!("  FLATPAK_FLUTTER_TIMEOUT={}", timeout.as_secs()),
    None => println!("  FLATPAK_FLUTTER_TIMEOUT=<unset>"),
  }
  println!("  TEST_BUILD={}", options.test_build);
  println!();
}

pub(crate) fn git(runner: &CommandRunner, cwd: &Path, args: &[&str]) -> Result<String, PrepareError> {
  let spec = CommandSpec::new("git").args(args).current_dir(cwd);
  Ok(runner.run(&spec)?)
}

/// `YYYY-MM-DD` in UTC.
fn today() -> String {
  let stamp = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
  stamp.chars().take(10).collect()
}

/// The `version:` of `pubspec.yaml` without its `+build` suffix.
pub fn derive_version(repo_root: &Path) -> Result<String, PrepareError> {
  let text = fs::read_to_string(repo_root.join("pubspec.yaml")).map_err(|_| PrepareError::UnknownVersion)?;
  text
    .lines()
    .find_map(|line| line.strip_prefix("version:"))
    .map(|raw| {
      let raw = raw.trim();
      raw.split_once('+').map_or(raw, |(version, _)| version).to_string()
    })
    .ok_or(PrepareError::UnknownVersion)
}

/// Current branch name, falling back to CI refs (then `main`) on a
/// detached HEAD. A branch missing on `origin` only warns.
fn determine_branch(
  runner: &CommandRunner,
  repo_root: &Path,
  env: &BTreeMap<String, String>,
  printer: StatusPrinter,
) -> Result<String, PrepareError> {
  let mut branch = git(runner, repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
  if branch == "HEAD" {
    branch = detached_head_branch(env, printer);
  }

  let refspec = format!("refs/heads/{branch}");
  let check = CommandSpec::new("git")
    .args(["ls-remote", "origin", refspec.as_str()])
    .current_dir(repo_root);
  match runner.output(&check) {
    Ok(output) if !output.success() => printer.warn(format!(
      "Unable to verify remote branch {branch} (git ls-remote exited with {}).",
      output.code.map_or_else(|| "signal".to_string(), |c| c.to_string())
    )),
    Ok(output) if output.stdout.trim().is_empty() => printer.warn(format!(
      "Branch {branch} not found on remote; ensure it is pushed before publishing"
    )),
    Ok(_) => {}
    Err(error) => printer.warn(format!("Unable to verify remote branch {branch}: {error}")),
  }

  debug!(branch = %branch, "determined branch");
  Ok(branch)
}

fn detached_head_branch(env: &BTreeMap<String, String>, printer: StatusPrinter) -> String {
  for key in ["GITHUB_HEAD_REF", "GITHUB_REF_NAME"] {
    if let Some(value) = env.get(key).filter(|v| !v.is_empty()) {
      printer.warn(format!(
        "Detached HEAD detected; using {} value '{value}'",
        key.to_lowercase()
      ));
      return value.clone();
    }
  }
  printer.warn("Detached HEAD with no ref info; defaulting to 'main'");
  "main".to_string()
}


#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn version_strips_build_number() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("pubspec.yaml"), "name: lotti\nversion: 0.9.700+3300\n").unwrap();
    assert_eq!(derive_version(temp.path()).unwrap(), "0.9.700");
  }

  #[test]
  fn version_missing_is_an_error() {
    let temp = tempdir().unwrap();
    assert!(matches!(derive_version(temp.path()), Err(PrepareError::UnknownVersion)));
    fs::write(temp.path().join("pubspec.yaml"), "name: lotti\n").unwrap();
    assert!(matches!(derive_version(temp.path()), Err(PrepareError::UnknownVersion)));
  }

  #[test]
  fn detached_head_prefers_head_ref() {
    let mut env = BTreeMap::new();
    assert_eq!(detached_head_branch(&env, StatusPrinter), "main");
    env.insert("GITHUB_REF_NAME".to_string(), "release".to_string());
    assert_eq!(detached_head_branch(&env, StatusPrinter), "release");
    env.insert("GITHUB_HEAD_REF".to_string(), "feature/x".to_string());
    assert_eq!(detached_head_branch(&env, StatusPrinter), "feature/x");
  }

  #[test]
  fn paths_and_pr_metadata() {
    let temp = tempdir().unwrap();
    let mut ctx = testutil::context(temp.path());
    assert!(ctx.manifest_template.ends_with("flatpak/com.matthiasn.lotti.source.yml"));
    assert!(ctx.manifest_output.ends_with("output/com.matthiasn.lotti.yml"));
    assert_eq!(ctx.pinned_commit(), "abc123");
    assert_eq!(ctx.flutter_tag_or_stable(), "stable");
    assert_eq!(ctx.python(), "python3");

    ctx.pr_head_commit = Some("feedbeef".to_string());
    assert_eq!(ctx.pinned_commit(), "feedbeef");
  }

  #[test]
  fn today_is_an_iso_date() {
    let date = today();
    assert_eq!(date.len(), 10);
    assert_eq!(date.as_bytes()[4], b'-');
  }
}
