//! The Flathub preparation pipeline.
//!
//! A run walks a fixed sequence of stages: it stages a work directory, runs
//! `flatpak-flutter`, falls back to the individual generators for anything
//! missing, copies the app assets, applies the manifest operators and
//! bundles every artifact the final manifest references. The output directory
//! then holds a manifest that builds without network access.

mod assets;
mod bundle;
mod cargo;
mod checks;
mod context;
mod error;
mod generator;
mod options;
mod postprocess;
mod pubdev;
mod status;
mod workspace;

pub use checks::assert_commit_pinned;
pub use context::{PrepareContext, RepoInfo, build_context, derive_version, print_intro};
pub use error::PrepareError;
pub use options::{FORWARDED_ENV, PrepareOptions, parse_bool};
pub use pubdev::split_package_version;
pub use status::StatusPrinter;

use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::{Document, ManifestError, OperationResult};

/// Run the whole pipeline.
pub fn prepare_flathub(options: PrepareOptions) -> Result<(), PrepareError> {
  let printer = StatusPrinter;
  let mut ctx = build_context(options, printer)?;
  print_intro(&ctx);
  run_pipeline(&mut ctx)
}

/// Stages 2 to 24 over an already built context.
pub fn run_pipeline(ctx: &mut PrepareContext) -> Result<(), PrepareError> {
  workspace::prepare_directories(ctx)?;
  workspace::prepare_manifest_for_generator(ctx)?;
  workspace::ensure_setup_helper_reference(ctx)?;
  workspace::ensure_generator_repo(ctx)?;
  workspace::stage_workspace_files(ctx)?;
  workspace::prestage_tool_path(ctx);
  workspace::prime_flutter_sdk(ctx)?;

  generator::run_flatpak_flutter(ctx)?;
  if !ctx.generator_succeeded() && ctx.generator_status.is_some() && !ctx.options.allow_fallback {
    return Err(PrepareError::GeneratorFailed);
  }
  generator::normalize_sqlite_patch(ctx)?;
  generator::pin_working_manifest(ctx)?;
  generator::stage_generated_outputs(ctx)?;
  pubdev::ensure_pubspec_sources(ctx)?;
  generator::stage_package_config(ctx)?;
  generator::ensure_flutter_sdk_json(ctx)?;

  postprocess::apply_compliance_fixes(ctx)?;
  assets::copy_assets(ctx)?;
  cargo::generate_cargo_sources(ctx)?;
  postprocess::post_process_output(ctx)?;
  bundle::bundle_sources(ctx)?;

  checks::check_compliance(ctx)?;
  checks::clean_work_dir(ctx)?;
  checks::test_build(ctx)?;
  checks::print_summary(ctx)?;
  Ok(())
}

/// Run one operator on `doc`, save when it changed anything and report its
/// messages.
pub(crate) fn apply<F>(printer: StatusPrinter, doc: &mut Document, op: F) -> Result<OperationResult, PrepareError>
where
  F: FnOnce(&mut Document) -> Result<OperationResult, ManifestError>,
{
  let result = op(doc)?;
  if result.changed {
    doc.save()?;
  }
  printer.report(&result);
  Ok(result)
}

/// Sorted files directly in `dir` named `{prefix}*{suffix}`.
pub(crate) fn files_matching(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
  let Ok(entries) = fs::read_dir(dir) else {
    return Vec::new();
  };
  let mut found: Vec<PathBuf> = entries
    .filter_map(Result::ok)
    .map(|e| e.path())
    .filter(|p| p.is_file())
    .filter(|p| {
      p.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() >= prefix.len() + suffix.len() && n.starts_with(prefix) && n.ends_with(suffix))
    })
    .collect();
  found.sort();
  found
}

/// Paths joined with commas, the list form the generator scripts take.
pub(crate) fn comma_joined(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join(",")
}
