//! Stage 20: every archive and file the output manifest references is
//! copied (or downloaded) next to it, including an archive of the app itself.

use std::path::PathBuf;

use walkdir::WalkDir;

use super::context::PrepareContext;
use super::error::PrepareError;
use super::{apply, files_matching};
use crate::cache::{ArtifactCache, download_https};
use crate::consts::FLUTTER_RELEASES_URL;
use crate::manifest::Document;
use crate::ops::flutter::{
  apply_all_offline_fixes, bundle_app_archive, convert_flutter_git_to_archive, rewrite_flutter_git_url,
};
use crate::ops::sources::bundle_archive_sources;
use crate::process::CommandSpec;
use crate::util::fs::copy_file;
use crate::util::hash::hash_file;

pub fn bundle_sources(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx
    .printer
    .status("Bundling cached archive and file sources referenced by manifest...");
  let printer = ctx.printer;
  let mut doc = Document::load(&ctx.manifest_output)?;

  bundle_flutter_archive(ctx, &mut doc)?;

  let roots: Vec<PathBuf> = download_roots(ctx).into_iter().filter(|r| r.exists()).collect();
  let cache = ArtifactCache::new(ctx.output_dir(), ctx.options.download_missing_sources, roots)?;
  apply(printer, &mut doc, |d| bundle_archive_sources(d, &cache))?;
  apply(printer, &mut doc, rewrite_flutter_git_url)?;

  let commit = &ctx.repo.commit;
  let archive_name = format!("lotti-{commit}.tar.xz");
  let archive = ctx.output_dir().join(&archive_name);
  if !archive.is_file() {
    printer.info(format!("Creating archived app source {archive_name}"));
    let git_archive = CommandSpec::new("git")
      .args(["archive", "--format=tar", "--prefix=lotti/", commit.as_str()])
      .current_dir(ctx.repo_root());
    let compress = CommandSpec::new("xz").arg("-c");
    ctx.runner.pipe_to_file(&git_archive, &compress, &archive)?;
  }
  let sha256 = hash_file(&archive)?;
  apply(printer, &mut doc, |d| bundle_app_archive(d, &archive_name, sha256.as_str()))?;
  apply(printer, &mut doc, apply_all_offline_fixes)?;
  doc.save()?;
  Ok(())
}

fn download_roots(ctx: &PrepareContext) -> Vec<PathBuf> {
  let repo = ctx.repo_root();
  let mut roots = vec![
    ctx.flatpak_dir().join("cache/pub.dev"),
    ctx.flatpak_dir().join(".flatpak-builder/downloads"),
    repo.join(".flatpak-builder/downloads"),
  ];
  if let Some(parent) = repo.parent() {
    roots.push(parent.join(".flatpak-builder/downloads"));
  }
  roots
}

/// Without a Flutter SDK source list the SDK module still clones Flutter;
/// swap that clone for a release archive when one can be found.
fn bundle_flutter_archive(ctx: &PrepareContext, doc: &mut Document) -> Result<(), PrepareError> {
  let output = ctx.output_dir();
  if !files_matching(output, "flutter-sdk-", ".json").is_empty() {
    return Ok(());
  }

  let tag = ctx.flutter_tag_or_stable();
  let archive_name = format!("flutter_linux_{tag}-stable.tar.xz");
  let target = output.join(&archive_name);
  let mut source = find_flutter_archive(ctx, tag);

  if source.is_none() && ctx.options.download_missing_sources {
    let url = format!("{FLUTTER_RELEASES_URL}/{archive_name}");
    ctx.printer.info(format!("Downloading Flutter archive {archive_name}"));
    match download_https(&url, &target) {
      Ok(()) => source = Some(target.clone()),
      Err(error) => ctx
        .printer
        .warn(format!("Failed to download Flutter archive from {url}: {error}")),
    }
  }

  let Some(source) = source else {
    ctx
      .printer
      .warn("No cached Flutter archive found; flutter-sdk module will continue to reference upstream git");
    return Ok(());
  };
  if source != target {
    copy_file(&source, &target)?;
  }

  let sha256 = hash_file(&target)?;
  apply(ctx.printer, doc, |d| convert_flutter_git_to_archive(d, &archive_name, sha256.as_str()))?;
  ctx
    .printer
    .info(format!("Bundled Flutter archive {archive_name} for offline builds"));
  Ok(())
}

fn find_flutter_archive(ctx: &PrepareContext, tag: &str) -> Option<PathBuf> {
  let exact = ctx.output_dir().join(format!("flutter_linux_{tag}-stable.tar.xz"));
  if exact.is_file() {
    return Some(exact);
  }

  let repo = ctx.repo_root();
  let mut roots = vec![
    ctx.output_dir().to_path_buf(),
    ctx.flatpak_dir().join(".flatpak-builder"),
    repo.join(".flatpak-builder"),
  ];
  if let Some(parent) = repo.parent() {
    roots.push(parent.join(".flatpak-builder"));
  }
  roots.iter().filter(|r| r.exists()).find_map(|root| {
    WalkDir::new(root)
      .into_iter()
      .filter_map(Result::ok)
      .filter(|e| e.file_type().is_file())
      .find(|e| e.file_name().to_str().is_some_and(|n| is_flutter_archive_name(n, tag)))
      .map(|e| e.into_path())
  })
}

/// `flutter_*{tag}*.tar*`
pub(crate) fn is_flutter_archive_name(name: &str, tag: &str) -> bool {
  let Some(rest) = name.strip_prefix("flutter_") else {
    return false;
  };
  rest
    .find(tag)
    .is_some_and(|at| rest[at + tag.len()..].contains(".tar"))
}
