//! Stage 13 and the pinned-package fix-up of stage 19: the pub.dev source
//! list and the archives it refers to.

use std::collections::BTreeSet;
use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use tracing::debug;
use walkdir::WalkDir;

use super::context::PrepareContext;
use super::error::PrepareError;
use super::{comma_joined, files_matching};
use super::generator::find_flutter_tools_lock;
use crate::cache::{DownloadError, download_https};
use crate::consts::{PUB_DEV_DEST_PREFIX, PUBSPEC_SOURCES_JSON};
use crate::process::CommandSpec;
use crate::util::fs::{copy_file, find_files_with_suffix};
use crate::util::hash::hash_file;

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip"];

/// Package name and version of a pub.dev `dest` such as
/// `.pub-cache/hosted/pub.dev/yaml-3.1.2`.
///
/// The last path segment is split at its first `-`; archive suffixes are
/// dropped from the version. Segments without `-` yield empty strings.
pub fn split_package_version(dest: &str) -> (String, String) {
  let segment = dest.rsplit('/').next().unwrap_or(dest);
  let Some((package, version)) = segment.split_once('-') else {
    return (String::new(), String::new());
  };
  let version = ARCHIVE_SUFFIXES
    .iter()
    .find_map(|suffix| version.strip_suffix(suffix))
    .unwrap_or(version);
  (package.to_string(), version.to_string())
}

/// Stage 13: keep the generator's `pubspec-sources.json` when it succeeded,
/// otherwise regenerate it from every lockfile at hand. Either way, stage an
/// archive for each pub.dev package it lists.
pub fn ensure_pubspec_sources(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let existing = ctx.output_dir().join(PUBSPEC_SOURCES_JSON);
  if ctx.generator_succeeded() && existing.is_file() {
    ctx.printer.info("Using pubspec-sources.json from flatpak-flutter");
    return stage_packages(ctx, &existing);
  }

  let inputs = collect_lock_inputs(ctx)?;
  ctx.printer.info("Generating pubspec-sources.json from lockfiles");
  let generated = run_pubspec_generator(ctx, &inputs)?;
  ctx
    .printer
    .status("Regenerated pubspec-sources.json with build tool dependencies");
  stage_packages(ctx, &generated)
}

/// App lockfile first, then `flutter_tools`, then every cargokit build tool.
fn collect_lock_inputs(ctx: &PrepareContext) -> Result<Vec<PathBuf>, PrepareError> {
  let app_lock = ctx.work_dir().join("pubspec.lock");
  if !app_lock.is_file() {
    return Err(PrepareError::Missing {
      what: "FATAL: Application pubspec.lock",
      path: app_lock,
    });
  }
  let mut inputs = vec![app_lock];
  inputs.extend(find_flutter_tools_lock(ctx));

  let mut cargokit = BTreeSet::new();
  for base in [ctx.builder_build_dir(), ctx.output_dir().join(".flatpak-builder/build")] {
    for lock in find_files_with_suffix(&base, "cargokit/build_tool/pubspec.lock") {
      cargokit.insert(dunce::canonicalize(&lock).unwrap_or(lock));
    }
  }
  inputs.extend(cargokit);
  inputs.extend(files_matching(&ctx.flatpak_dir().join("cache/cargokit"), "", ".pubspec.lock"));
  Ok(inputs)
}

fn run_pubspec_generator(ctx: &PrepareContext, inputs: &[PathBuf]) -> Result<PathBuf, PrepareError> {
  let generator = ctx.flatpak_flutter_repo.join("pubspec_generator/pubspec_generator.py");
  if !generator.is_file() {
    return Err(PrepareError::Missing {
      what: "pubspec_generator",
      path: generator,
    });
  }

  let temp_output = ctx.work_dir().join("pubspec-sources.generated.json");
  let spec = CommandSpec::new(ctx.python())
    .arg(&generator)
    .arg(comma_joined(inputs))
    .arg("-o")
    .arg(&temp_output);
  let output = ctx.runner.output(&spec)?;
  if !output.success() || !temp_output.is_file() {
    return Err(PrepareError::PubspecGeneration(format!("{}{}", output.stdout, output.stderr)));
  }

  let target = ctx.output_dir().join(PUBSPEC_SOURCES_JSON);
  copy_file(&temp_output, &target)?;
  fs::remove_file(&temp_output)?;
  Ok(target)
}

fn read_entries(path: &Path) -> Result<Vec<Value>, PrepareError> {
  let text = fs::read_to_string(path)?;
  let value: Value = serde_json::from_str(&text).map_err(|source| PrepareError::Json {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(match value {
    Value::Array(entries) => entries,
    _ => Vec::new(),
  })
}

/// Stage one archive per distinct pub.dev package listed in `json_path`.
fn stage_packages(ctx: &PrepareContext, json_path: &Path) -> Result<(), PrepareError> {
  if !json_path.is_file() {
    return Err(PrepareError::MissingPubspecSources);
  }
  let mut seen = BTreeSet::new();
  for entry in read_entries(json_path)? {
    let Some(dest) = entry.get("dest").and_then(Value::as_str) else {
      continue;
    };
    if !dest.starts_with(PUB_DEV_DEST_PREFIX) {
      continue;
    }
    let (package, version) = split_package_version(dest);
    if package.is_empty() || !seen.insert((package.clone(), version.clone())) {
      continue;
    }
    stage_archive(ctx, &package, &version)?;
  }
  Ok(())
}

/// Pack a locally unpacked copy of the package into the pub.dev cache.
fn stage_archive(ctx: &PrepareContext, package: &str, version: &str) -> Result<(), PrepareError> {
  let name = format!("{package}-{version}");
  let dest = ctx.flatpak_dir().join("cache/pub.dev").join(format!("{name}.tar.gz"));
  if dest.exists() {
    return Ok(());
  }

  match archive_candidates(ctx, &name).into_iter().find(|c| c.is_dir()) {
    Some(candidate) => {
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
      }
      write_tar_gz(&candidate, &name, &dest)?;
      ctx.printer.info(format!(
        "Staged pub.dev archive {name} from {}",
        candidate.display()
      ));
    }
    None => ctx
      .printer
      .warn(format!("Missing staged pub.dev archive for {name}; offline bundling may fail")),
  }
  Ok(())
}

fn archive_candidates(ctx: &PrepareContext, name: &str) -> Vec<PathBuf> {
  let hosted = Path::new(".pub-cache/hosted/pub.dev");
  let mut candidates = vec![ctx.repo_root().join(hosted).join(name)];
  if let Some(home) = env::var_os("HOME") {
    candidates.push(PathBuf::from(home).join(hosted).join(name));
  }
  if let Some(pub_cache) = ctx.env.get("PUB_CACHE").filter(|v| !v.is_empty()) {
    candidates.push(Path::new(pub_cache).join("hosted/pub.dev").join(name));
  }

  let build = ctx.builder_build_dir();
  if build.is_dir() {
    candidates.extend(
      WalkDir::new(&build)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir() && e.file_name().to_str() == Some(name))
        .filter(|e| e.path().parent().is_some_and(|p| p.ends_with(hosted)))
        .map(|e| e.into_path()),
    );
  }
  candidates
}

/// Write `dir` as `{arcname}/...` into a gzip-compressed tarball at `dest`.
pub(crate) fn write_tar_gz(dir: &Path, arcname: &str, dest: &Path) -> io::Result<()> {
  let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
  let mut archive = tar::Builder::new(encoder);
  archive.append_dir_all(arcname, dir)?;
  archive.into_inner()?.finish()?;
  debug!(dir = ?dir, dest = ?dest, "wrote tarball");
  Ok(())
}

/// Make sure `pubspec-sources.json` in the output carries an exact pub.dev
/// release that build tools pin but the generators may have skipped.
pub fn ensure_pub_package(ctx: &PrepareContext, name: &str, version: &str) -> Result<(), PrepareError> {
  let json_path = ctx.output_dir().join(PUBSPEC_SOURCES_JSON);
  let injected = inject_pub_package(&json_path, ctx.work_dir(), name, version, download_https);
  match injected {
    Ok(true) => ctx
      .printer
      .info(format!("Injected pub package {name}-{version} into pubspec-sources.json")),
    Ok(false) => {}
    Err(InjectError::Fetch(error)) => {
      debug!(error = %error, "pub.dev archive download failed");
      ctx.printer.warn(format!(
        "Failed to fetch {name}-{version} archive for sha256; skipping injection"
      ));
    }
    Err(InjectError::Other(error)) => return Err(error),
  }
  Ok(())
}

pub(crate) enum InjectError {
  Fetch(DownloadError),
  Other(PrepareError),
}

impl From<PrepareError> for InjectError {
  fn from(error: PrepareError) -> Self {
    InjectError::Other(error)
  }
}

impl From<io::Error> for InjectError {
  fn from(error: io::Error) -> Self {
    InjectError::Other(error.into())
  }
}

/// Append an archive entry for `name-version` unless its `dest` is already
/// listed. Unreadable or malformed files are left alone.
pub(crate) fn inject_pub_package<F>(
  json_path: &Path,
  scratch_dir: &Path,
  name: &str,
  version: &str,
  fetch: F,
) -> Result<bool, InjectError>
where
  F: FnOnce(&str, &Path) -> Result<(), DownloadError>,
{
  if !json_path.is_file() {
    return Ok(false);
  }
  let Ok(mut entries) = read_entries(json_path) else {
    return Ok(false);
  };

  let dest = format!("{PUB_DEV_DEST_PREFIX}{name}-{version}");
  if entries
    .iter()
    .any(|e| e.get("dest").and_then(Value::as_str) == Some(dest.as_str()))
  {
    return Ok(false);
  }

  let url = format!("https://pub.dev/api/archives/{name}-{version}.tar.gz");
  let archive = scratch_dir.join(format!("{name}-{version}.tar.gz"));
  fetch(&url, &archive).map_err(InjectError::Fetch)?;
  let sha256 = hash_file(&archive)?;
  fs::remove_file(&archive)?;

  entries.push(serde_json::json!({
    "type": "archive",
    "archive-type": "tar-gzip",
    "url": url,
    "sha256": sha256.as_str(),
    "strip-components": 0,
    "dest": dest,
  }));
  write_json(json_path, &Value::Array(entries))?;
  Ok(true)
}

/// Pretty JSON with four-space indentation and a trailing newline.
pub(crate) fn write_json(path: &Path, value: &Value) -> Result<(), PrepareError> {
  let mut buffer = Vec::new();
  let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
  value.serialize(&mut serializer).map_err(|source| PrepareError::Json {
    path: path.to_path_buf(),
    source,
  })?;
  buffer.push(b'\n');
  fs::write(path, buffer)?;
  Ok(())
}
