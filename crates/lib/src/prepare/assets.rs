//! Stage 17: metadata, icons, patches and helper trees that ship next to the
//! manifest.

use std::fs;
use std::path::{Path, PathBuf};

use super::context::PrepareContext;
use super::error::PrepareError;
use super::files_matching;
use crate::consts::{APP_ID, FLUTTER_PATCHES};
use crate::ops::sources::replace_url_with_path;
use crate::util::fs::{copy_file, copy_tree};

const FONTCONFIG: &str = "75-noto-color-emoji.conf";

pub fn copy_assets(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Copying additional files...");
  write_metainfo(ctx)?;
  copy_desktop_file(ctx)?;
  for icon in files_matching(ctx.flatpak_dir(), "app_icon_", ".png") {
    copy_to_both(ctx, &icon)?;
  }
  copy_screenshot(ctx)?;
  copy_fontconfig(ctx)?;
  copy_flutter_patches(ctx)?;

  let patches = ctx.flatpak_dir().join("patches");
  if patches.is_dir() {
    copy_tree(&patches, &ctx.output_dir().join("patches"))?;
  }
  copy_helper_dirs(ctx)?;
  Ok(())
}

/// Copy `src` under its own name into the output and work directories.
fn copy_to_both(ctx: &PrepareContext, src: &Path) -> Result<(), PrepareError> {
  if let Some(name) = src.file_name() {
    copy_file(src, &ctx.output_dir().join(name))?;
    copy_file(src, &ctx.work_dir().join(name))?;
  }
  Ok(())
}

/// Fill the version and release date into the metainfo template.
pub(crate) fn render_metainfo(template: &str, version: &str, release_date: &str) -> String {
  template
    .replace("{{LOTTI_VERSION}}", version)
    .replace("{{LOTTI_RELEASE_DATE}}", release_date)
}

fn write_metainfo(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let name = format!("{APP_ID}.metainfo.xml");
  let template = ctx.flatpak_dir().join(&name);
  if !template.is_file() {
    return Ok(());
  }
  let text = render_metainfo(
    &fs::read_to_string(&template)?,
    &ctx.repo.version,
    &ctx.repo.release_date,
  );
  fs::write(ctx.output_dir().join(&name), &text)?;
  fs::write(ctx.work_dir().join(&name), &text)?;
  Ok(())
}

fn copy_desktop_file(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let desktop = ctx.flatpak_dir().join(format!("{APP_ID}.desktop"));
  if desktop.is_file() {
    copy_to_both(ctx, &desktop)
  } else {
    ctx.printer.warn("No desktop file found");
    Ok(())
  }
}

fn copy_screenshot(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let screenshot = &ctx.screenshot_source;
  if !screenshot.is_file() {
    return Err(PrepareError::MissingScreenshot {
      path: screenshot.clone(),
      flatpak_dir: ctx.flatpak_dir().to_path_buf(),
    });
  }
  copy_to_both(ctx, screenshot)
}

fn copy_fontconfig(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let fontconfig = ctx.flatpak_dir().join(FONTCONFIG);
  if fontconfig.is_file() {
    copy_to_both(ctx, &fontconfig)?;
    ctx.printer.info("Copied emoji fontconfig file");
  } else {
    ctx
      .printer
      .warn(format!("Emoji fontconfig file not found at flatpak/{FONTCONFIG}"));
  }
  Ok(())
}

/// Ship the Flutter patches `flatpak-flutter` references and point the
/// output manifest at the local copies.
fn copy_flutter_patches(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let manifest = &ctx.manifest_output;
  for patch in FLUTTER_PATCHES {
    match find_flutter_patch(&ctx.flatpak_flutter_repo, patch) {
      Some(source) => {
        copy_file(&source, &ctx.output_dir().join(patch))?;
        copy_file(&source, &ctx.work_dir().join(patch))?;
        if replace_url_with_path(manifest, patch, patch)? == Some(true) {
          ctx.printer.info(format!("Bundled Flutter patch {patch}"));
        }
      }
      None => {
        let referenced = fs::read_to_string(manifest).is_ok_and(|text| text.contains(patch));
        if referenced {
          ctx.printer.warn(format!(
            "Referenced Flutter patch {patch} not found in flatpak-flutter sources"
          ));
        }
      }
    }
  }
  Ok(())
}

fn find_flutter_patch(generator_repo: &Path, patch: &str) -> Option<PathBuf> {
  [generator_repo.join("releases/flutter").join(patch), generator_repo.join(patch)]
    .into_iter()
    .find(|p| p.is_file())
}

/// `sqlite3_flutter_libs` and `cargokit` patch trees, from the work dir or
/// the generator's `foreign_deps`.
fn copy_helper_dirs(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let foreign = ctx.flatpak_flutter_repo.join("foreign_deps");
  for dir in ["sqlite3_flutter_libs", "cargokit"] {
    let source = [ctx.work_dir().join(dir), foreign.join(dir)]
      .into_iter()
      .find(|p| p.is_dir());
    if let Some(source) = source {
      copy_tree(&source, &ctx.output_dir().join(dir))?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prepare::context::testutil::context;
  use tempfile::tempdir;

  fn seeded(root: &Path) -> PrepareContext {
    let ctx = context(root);
    fs::create_dir_all(ctx.output_dir()).unwrap();
    let flatpak = ctx.flatpak_dir();
    fs::write(
      flatpak.join("com.matthiasn.lotti.metainfo.xml"),
      "<release version=\"{{LOTTI_VERSION}}\" date=\"{{LOTTI_RELEASE_DATE}}\"/>",
    )
    .unwrap();
    fs::write(flatpak.join("screenshot.png"), b"png").unwrap();
    fs::write(flatpak.join("app_icon_256.png"), b"icon").unwrap();
    ctx
  }

  #[test]
  fn metainfo_placeholders_filled() {
    assert_eq!(
      render_metainfo("v={{LOTTI_VERSION}} d={{LOTTI_RELEASE_DATE}}", "1.2.3", "2026-01-02"),
      "v=1.2.3 d=2026-01-02"
    );
  }

  #[test]
  fn assets_land_in_output_and_work() {
    let temp = tempdir().unwrap();
    let ctx = seeded(temp.path());
    let foreign = ctx.flatpak_flutter_repo.join("foreign_deps/cargokit");
    fs::create_dir_all(&foreign).unwrap();
    fs::write(foreign.join("run_build_tool.sh.patch"), "patch").unwrap();

    copy_assets(&ctx).unwrap();

    let metainfo = fs::read_to_string(ctx.output_dir().join("com.matthiasn.lotti.metainfo.xml")).unwrap();
    assert_eq!(metainfo, "<release version=\"0.9.700\" date=\"2026-01-02\"/>");
    assert!(ctx.work_dir().join("com.matthiasn.lotti.metainfo.xml").is_file());
    for name in ["screenshot.png", "app_icon_256.png"] {
      assert!(ctx.output_dir().join(name).is_file(), "{name}");
      assert!(ctx.work_dir().join(name).is_file(), "{name}");
    }
    assert!(ctx.output_dir().join("cargokit/run_build_tool.sh.patch").is_file());
    assert!(!ctx.output_dir().join("sqlite3_flutter_libs").exists());
  }

  #[test]
  fn missing_screenshot_aborts() {
    let temp = tempdir().unwrap();
    let ctx = seeded(temp.path());
    fs::remove_file(&ctx.screenshot_source).unwrap();
    let err = copy_assets(&ctx).unwrap_err();
    assert!(matches!(err, PrepareError::MissingScreenshot { .. }));
    assert!(err.to_string().contains("Provide flatpak/screenshot.png"));
  }

  #[test]
  fn flutter_patch_bundled_and_manifest_rewritten() {
    let temp = tempdir().unwrap();
    let ctx = seeded(temp.path());
    let releases = ctx.flatpak_flutter_repo.join("releases/flutter");
    fs::create_dir_all(&releases).unwrap();
    fs::write(releases.join("flutter-shared.sh.patch"), "diff").unwrap();
    fs::write(
      &ctx.manifest_output,
      "modules:\n  - name: flutter-sdk\n    sources:\n      - type: patch\n        url: https://example.com/flutter-shared.sh.patch\n",
    )
    .unwrap();

    copy_flutter_patches(&ctx).unwrap();

    assert!(ctx.output_dir().join("flutter-shared.sh.patch").is_file());
    let manifest = fs::read_to_string(&ctx.manifest_output).unwrap();
    assert!(manifest.contains("path: flutter-shared.sh.patch"));
    assert!(!manifest.contains("url:"));
  }
}
