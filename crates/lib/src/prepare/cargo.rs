//! Stage 18: `cargo-sources.json` for the Rust crates built by cargokit.
//!
//! The upstream `Cargo.lock` files are the preferred input. Pre-saved lockfiles
//! and the lockfiles of packages unpacked by the generator are fallbacks.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::context::PrepareContext;
use super::error::PrepareError;
use super::{comma_joined, files_matching};
use crate::cache::{DownloadError, download_https};
use crate::consts::{CARGO_LOCK_SOURCES, CARGO_SOURCES_JSON};
use crate::process::CommandSpec;
use crate::util::fs::copy_file;

const CARGOKIT_OUTPUT: &str = "cargo-sources-cargokit.json";

/// Directories below a pub.dev package that hold a cargokit crate.
const RUST_DIRS: &[&str] = &["rust", "android/rust", "ios/rust", "linux/rust", "macos/rust", "windows/rust"];

pub fn generate_cargo_sources(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx
    .printer
    .info("Downloading Cargo.lock files from GitHub to generate correct cargo-sources.json...");
  let downloaded = download_cargo_locks(ctx, download_https)?;

  let target = ctx.output_dir().join(CARGO_SOURCES_JSON);
  if !downloaded.is_empty() {
    if run_cargo_generator(ctx, &downloaded, &target)? {
      ctx
        .printer
        .status("Generated cargo-sources.json from downloaded Cargo.lock files");
      let lines = fs::read_to_string(&target)?.lines().count();
      ctx.printer.info(format!("Line count: {lines}"));
      return Ok(());
    }
    ctx
      .printer
      .warn("Failed to generate cargo-sources.json from downloaded files");
  }

  if target.is_file() || from_presets(ctx)? {
    return Ok(());
  }
  from_builder(ctx)?;
  Ok(())
}

/// Fetch each upstream lockfile into the output dir, keeping only files that
/// look like a `Cargo.lock`.
fn download_cargo_locks<F>(ctx: &PrepareContext, fetch: F) -> Result<Vec<PathBuf>, PrepareError>
where
  F: Fn(&str, &Path) -> Result<(), DownloadError>,
{
  let output = ctx.output_dir();
  fs::create_dir_all(output)?;

  let mut downloaded = Vec::new();
  for &(name, url) in CARGO_LOCK_SOURCES {
    let dest = output.join(format!("{name}-Cargo.lock"));
    ctx.printer.info(format!("Downloading {name} Cargo.lock..."));
    if let Err(error) = fetch(url, &dest) {
      ctx
        .printer
        .warn(format!("Failed to download {name} Cargo.lock from {url}: {error}"));
      discard(&dest)?;
      continue;
    }

    let content = fs::read(&dest).map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    match content {
      Ok(text) if text.contains("[package]") => {
        ctx.printer.status(format!("Downloaded {name}-Cargo.lock"));
        downloaded.push(dest);
      }
      Ok(_) => {
        ctx.printer.warn(format!(
          "Downloaded file for {name} did not look like a Cargo.lock; removing"
        ));
        discard(&dest)?;
      }
      Err(error) => {
        ctx
          .printer
          .warn(format!("Failed to read downloaded Cargo.lock for {name}: {error}"));
        discard(&dest)?;
      }
    }
  }
  Ok(downloaded)
}

fn discard(path: &Path) -> Result<(), PrepareError> {
  if path.exists() {
    fs::remove_file(path)?;
  }
  Ok(())
}

/// Run `cargo_generator.py` over `inputs`. `false` when the generator is
/// missing, fails, or writes nothing.
fn run_cargo_generator(ctx: &PrepareContext, inputs: &[PathBuf], target: &Path) -> Result<bool, PrepareError> {
  let generator = ctx.flatpak_flutter_repo.join("cargo_generator/cargo_generator.py");
  if !generator.is_file() {
    return Ok(false);
  }
  let spec = CommandSpec::new(ctx.python())
    .arg(&generator)
    .arg(comma_joined(inputs))
    .arg("-o")
    .arg(target);
  let output = ctx.runner.output(&spec)?;
  Ok(output.success() && target.is_file())
}

/// Generate from `flatpak/cargo-lock-files/*.lock`.
fn from_presets(ctx: &PrepareContext) -> Result<bool, PrepareError> {
  let inputs = files_matching(&ctx.flatpak_dir().join("cargo-lock-files"), "", ".lock");
  if inputs.is_empty() {
    return Ok(false);
  }
  let staged = ctx.work_dir().join(CARGOKIT_OUTPUT);
  if run_cargo_generator(ctx, &inputs, &staged)? {
    copy_file(&staged, &ctx.output_dir().join(CARGO_SOURCES_JSON))?;
    ctx
      .printer
      .status("Generated cargo-sources.json from pre-saved Cargo.lock files");
    return Ok(true);
  }
  ctx
    .printer
    .warn("Failed to generate cargo-sources.json from pre-saved Cargo.lock files");
  Ok(false)
}

/// Generate from the cargokit crates of packages in the builder's pub cache.
fn from_builder(ctx: &PrepareContext) -> Result<bool, PrepareError> {
  let build = ctx.builder_build_dir();
  if !build.is_dir() {
    return Ok(false);
  }
  let locks = builder_cargo_locks(&build);
  if locks.is_empty() {
    ctx
      .printer
      .warn("No Cargo.lock files found under .flatpak-builder; skipping cargo-sources generation");
    return Ok(false);
  }

  ctx
    .printer
    .info(format!("Found {} cargokit Cargo.lock file(s)", locks.len()));
  let staged = ctx.work_dir().join(CARGOKIT_OUTPUT);
  if run_cargo_generator(ctx, &locks, &staged)? {
    copy_file(&staged, &ctx.output_dir().join(CARGO_SOURCES_JSON))?;
    ctx
      .printer
      .status("Generated cargo-sources.json from cargokit Cargo.lock files");
    return Ok(true);
  }
  ctx
    .printer
    .warn("Failed to generate cargo-sources.json from cargokit Cargo.lock files");
  Ok(false)
}

/// `.pub-cache/hosted/pub.dev/<pkg>/<rust dir>/Cargo.lock` below `build`,
/// canonicalized and sorted.
pub(crate) fn builder_cargo_locks(build: &Path) -> Vec<PathBuf> {
  let hosted = Path::new(".pub-cache/hosted/pub.dev");
  let mut locks = BTreeSet::new();
  for entry in WalkDir::new(build).into_iter().filter_map(Result::ok) {
    if !entry.file_type().is_dir() || !entry.path().ends_with(hosted) {
      continue;
    }
    let Ok(packages) = fs::read_dir(entry.path()) else {
      continue;
    };
    for package in packages.filter_map(Result::ok) {
      for dir in RUST_DIRS {
        let lock = package.path().join(dir).join("Cargo.lock");
        if lock.is_file() {
          locks.insert(dunce::canonicalize(&lock).unwrap_or(lock));
        }
      }
    }
  }
  locks.into_iter().collect()
}
