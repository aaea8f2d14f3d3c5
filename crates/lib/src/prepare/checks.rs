//! Stages 21 to 24: final validation, cleanup, the optional test build and
//! the closing summary.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Sequence;

use super::context::PrepareContext;
use super::error::PrepareError;
use crate::consts::{APP_ID, COMMIT_PLACEHOLDER, FLUTTER_SDK_MODULE};
use crate::manifest::{Document, MappingExt, Source};
use crate::ops::flutter::{patches_follow_dependencies, should_remove_flutter_sdk};
use crate::process::CommandSpec;
use crate::util::fs::remove_path;
use crate::util::hash::hash_file;
use crate::validate::check_flathub_compliance;

static BRANCH_LINE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?m)^\s*branch:\s").expect("valid branch line regex"));

/// Fail when the manifest at `path` still carries the commit placeholder or
/// any `branch:` entry.
pub fn assert_commit_pinned(path: &Path, label: &'static str) -> Result<(), PrepareError> {
  let text = fs::read_to_string(path)?;
  if text.contains(COMMIT_PLACEHOLDER) {
    return Err(PrepareError::NotPinned {
      label,
      found: COMMIT_PLACEHOLDER,
    });
  }
  if BRANCH_LINE_RE.is_match(&text) {
    return Err(PrepareError::NotPinned {
      label,
      found: "branch entries",
    });
  }
  Ok(())
}

/// Fail unless every `archive` and `file` source resolves to a file in
/// `output_dir` matching its declared `sha256`.
pub fn assert_sources_bundled(doc: &Document, output_dir: &Path) -> Result<(), PrepareError> {
  fn check(modules: &Sequence, output_dir: &Path) -> Result<(), PrepareError> {
    for module in modules.iter().filter_map(|m| m.as_mapping()) {
      for source in module.seq("sources").into_iter().flatten().map(Source::from_value) {
        let (Source::Archive(map) | Source::File(map)) = source else {
          continue;
        };
        let Some(path) = source.path() else {
          match source.url() {
            Some(url) if !url.starts_with("file:") => return Err(PrepareError::Unbundled { url: url.to_string() }),
            _ => continue,
          }
        };
        let local = output_dir.join(path);
        if !local.is_file() {
          return Err(PrepareError::MissingArtifact { path: local });
        }
        if let Some(expected) = map.get_str("sha256") {
          let actual = hash_file(&local)?;
          if !actual.as_str().eq_ignore_ascii_case(expected) {
            return Err(PrepareError::ChecksumMismatch {
              path: local,
              expected: expected.to_string(),
              actual: actual.0,
            });
          }
        }
      }
      if let Some(children) = module.seq("modules") {
        check(children, output_dir)?;
      }
    }
    Ok(())
  }
  doc.modules().map_or(Ok(()), |modules| check(modules, output_dir))
}

/// Fail when package patches precede a dependency include, or when nested
/// Flutter SDK modules coexist with the top-level one.
pub fn assert_module_layout(doc: &Document, output_dir: &Path) -> Result<(), PrepareError> {
  if !patches_follow_dependencies(doc) {
    return Err(PrepareError::PatchOrder);
  }
  if should_remove_flutter_sdk(doc, output_dir) && doc.module(FLUTTER_SDK_MODULE).is_some() {
    return Err(PrepareError::DuplicateFlutterSdk);
  }
  Ok(())
}

/// Stage 21.
pub fn check_compliance(ctx: &PrepareContext) -> Result<(), PrepareError> {
  ctx.printer.status("Checking manifest for Flathub compliance...");
  let doc = Document::load(&ctx.manifest_output)?;
  let result = check_flathub_compliance(&doc);
  println!("{}", result.message);
  for detail in &result.details {
    println!("  - {detail}");
  }
  if !result.success {
    return Err(PrepareError::Compliance);
  }
  assert_commit_pinned(&ctx.manifest_output, "Output")?;
  assert_sources_bundled(&doc, ctx.output_dir())?;
  assert_module_layout(&doc, ctx.output_dir())?;
  ctx.printer.status("Flathub compliance checks passed");
  Ok(())
}

/// Stage 22.
pub fn clean_work_dir(ctx: &PrepareContext) -> Result<(), PrepareError> {
  if !ctx.options.clean_after_gen {
    return Ok(());
  }
  ctx
    .printer
    .status("Cleaning work build directory (.flatpak-builder)...");
  remove_path(&ctx.work_dir().join(".flatpak-builder"))?;
  Ok(())
}

/// Stage 23: a local `flatpak-builder` run over the output. A failed build
/// is reported, not fatal.
pub fn test_build(ctx: &PrepareContext) -> Result<(), PrepareError> {
  if !ctx.options.test_build {
    return Ok(());
  }
  ctx.printer.status("Testing build...");
  let spec = CommandSpec::new("flatpak-builder")
    .args(["--force-clean", "--repo=repo", "build-dir"])
    .arg(ctx.manifest_name())
    .current_dir(ctx.output_dir());
  let output = ctx.runner.output(&spec)?;
  if output.success() {
    ctx.printer.status("Test build successful!");
  } else {
    ctx.printer.error("Test build failed");
    println!("{}{}", output.stdout, output.stderr);
  }
  Ok(())
}

/// Stage 24.
pub fn print_summary(ctx: &PrepareContext) -> Result<(), PrepareError> {
  let output = ctx.output_dir();
  ctx.printer.status("Preparation complete!");
  println!();
  ctx
    .printer
    .info(format!("Generated files are in: {}", output.display()));
  println!();
  ctx.printer.info("Files generated:");
  let mut names: Vec<String> = fs::read_dir(output)?
    .filter_map(Result::ok)
    .map(|e| e.file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  for name in names {
    println!("  {name}");
  }
  println!();

  let root = ctx.options.flathub_root();
  let root = dunce::canonicalize(&root).unwrap_or(root);
  let (output, root) = (output.display(), root.display());
  if Path::new(&root.to_string()).is_dir() {
    ctx.printer.info("To copy to flathub repo:");
    println!("  cp -r {output}/* {root}/{APP_ID}/");
    println!();
    ctx.printer.info("Then:");
    for step in [
      format!("cd {root}"),
      format!("git checkout -b new-app-{APP_ID}"),
      format!("git add {APP_ID}"),
      format!("git commit -m \"Add {APP_ID}\""),
      format!("git push origin new-app-{APP_ID}"),
      "Create PR at https://github.com/flathub/flathub".to_string(),
    ] {
      println!("  {step}");
    }
  } else {
    ctx.printer.info("To prepare for Flathub submission:");
    println!("  1. Fork https://github.com/flathub/flathub");
    println!("  2. Clone your fork to {root}");
    println!("  3. Copy {output} to {root}/{APP_ID}");
    println!("  4. Create a pull request");
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prepare::context::testutil::context;
  use tempfile::tempdir;

  fn manifest(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("m.yml");
    fs::write(&path, text).unwrap();
    path
  }

  #[test]
  fn pinned_manifest_passes() {
    let temp = tempdir().unwrap();
    let path = manifest(temp.path(), "sources:\n  - type: git\n    commit: abc123\n");
    assert!(assert_commit_pinned(&path, "Output").is_ok());
  }

  #[test]
  fn placeholder_is_rejected() {
    let temp = tempdir().unwrap();
    let path = manifest(temp.path(), "sources:\n  - commit: COMMIT_PLACEHOLDER\n");
    let err = assert_commit_pinned(&path, "Working").unwrap_err();
    assert_eq!(
      err.to_string(),
      "Working manifest contains COMMIT_PLACEHOLDER; final manifest must be commit-pinned"
    );
  }

  #[test]
  fn branch_entries_are_rejected() {
    let temp = tempdir().unwrap();
    let path = manifest(temp.path(), "sources:\n  - type: git\n    branch: main\n");
    let err = assert_commit_pinned(&path, "Output").unwrap_err();
    assert!(matches!(err, PrepareError::NotPinned { found: "branch entries", .. }));

    let path = manifest(temp.path(), "sources:\n  - type: git\n    default-branch: main\n");
    assert!(assert_commit_pinned(&path, "Output").is_ok());
  }

  #[test]
  fn cleanup_removes_builder_dir_only_when_enabled() {
    let temp = tempdir().unwrap();
    let mut ctx = context(temp.path());
    let builder = ctx.work_dir().join(".flatpak-builder/build");
    fs::create_dir_all(&builder).unwrap();

    ctx.options.clean_after_gen = false;
    clean_work_dir(&ctx).unwrap();
    assert!(builder.exists());

    ctx.options.clean_after_gen = true;
    clean_work_dir(&ctx).unwrap();
    assert!(!ctx.work_dir().join(".flatpak-builder").exists());
  }

  #[test]
  fn compliance_failure_is_fatal() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    fs::create_dir_all(ctx.output_dir()).unwrap();
    fs::write(
      &ctx.manifest_output,
      "finish-args:\n  - --share=network\nmodules:\n  - name: lotti\n    build-options:\n      build-args:\n        - --share=network\n",
    )
    .unwrap();
    let err = check_compliance(&ctx).unwrap_err();
    assert!(matches!(err, PrepareError::Compliance));
  }

  mod bundled_tests {
    use super::*;
    use crate::manifest::testutil::doc;
    use crate::util::hash::hash_bytes;

    fn app(sources: &str) -> Document {
      doc(&format!("modules:\n  - name: lotti\n    sources:\n{sources}"))
    }

    #[test]
    fn remote_url_is_rejected() {
      let temp = tempdir().unwrap();
      let d = app("      - type: archive\n        url: https://example.com/a.tar.gz\n        sha256: abc\n");
      let err = assert_sources_bundled(&d, temp.path()).unwrap_err();
      assert!(matches!(err, PrepareError::Unbundled { ref url } if url == "https://example.com/a.tar.gz"));
    }

    #[test]
    fn missing_local_path_is_rejected() {
      let temp = tempdir().unwrap();
      let d = app("      - type: file\n        path: missing.tar.xz\n");
      let err = assert_sources_bundled(&d, temp.path()).unwrap_err();
      assert!(matches!(err, PrepareError::MissingArtifact { ref path } if path.ends_with("missing.tar.xz")));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("a.tar.gz"), b"payload").unwrap();
      let d = app(&format!(
        "      - type: archive\n        path: a.tar.gz\n        sha256: {}\n",
        "0".repeat(64)
      ));
      let err = assert_sources_bundled(&d, temp.path()).unwrap_err();
      assert!(matches!(err, PrepareError::ChecksumMismatch { ref actual, .. } if actual == hash_bytes(b"payload").as_str()));
    }

    #[test]
    fn nested_modules_are_checked() {
      let temp = tempdir().unwrap();
      let d = doc(
        "modules:\n  - name: lotti\n    modules:\n      - name: dep\n        sources:\n          - type: file\n            url: https://example.com/dep.bin\n",
      );
      assert!(matches!(
        assert_sources_bundled(&d, temp.path()),
        Err(PrepareError::Unbundled { .. })
      ));
    }

    #[test]
    fn fully_bundled_manifest_passes() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("a.tar.gz"), b"payload").unwrap();
      fs::write(temp.path().join("b.bin"), b"other").unwrap();
      let d = app(&format!(
        "      - type: git\n        url: https://github.com/matthiasn/lotti\n        commit: abc123\n      - type: archive\n        path: a.tar.gz\n        sha256: {}\n      - type: file\n        path: b.bin\n      - type: file\n        url: file:///tmp/local.bin\n",
        hash_bytes(b"payload")
      ));
      assert!(assert_sources_bundled(&d, temp.path()).is_ok());
    }
  }

  mod layout_tests {
    use super::*;
    use crate::manifest::testutil::doc;

    #[test]
    fn patch_before_dependency_include_is_rejected() {
      let temp = tempdir().unwrap();
      let d = doc(
        "modules:\n  - name: lotti\n    sources:\n      - type: patch\n        path: sqlite3_flutter_libs/0.5.34-CMakeLists.txt.patch\n      - pubspec-sources.json\n",
      );
      assert!(matches!(assert_module_layout(&d, temp.path()), Err(PrepareError::PatchOrder)));
    }

    #[test]
    fn nested_sdk_with_top_level_module_is_rejected() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("flutter-sdk-3.35.4.json"), "{}").unwrap();
      let text = "modules:\n  - name: flutter-sdk\n  - name: lotti\n    modules:\n      - flutter-sdk-3.35.4.json\n";
      assert!(matches!(
        assert_module_layout(&doc(text), temp.path()),
        Err(PrepareError::DuplicateFlutterSdk)
      ));

      let text = "modules:\n  - name: lotti\n    modules:\n      - flutter-sdk-3.35.4.json\n";
      assert!(assert_module_layout(&doc(text), temp.path()).is_ok());
    }
  }

  #[test]
  fn unbundled_source_fails_final_checks() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path());
    fs::create_dir_all(ctx.output_dir()).unwrap();
    fs::write(
      &ctx.manifest_output,
      "finish-args:\n  - --share=network\nmodules:\n  - name: lotti\n    build-commands:\n      - flutter pub get --offline\n    sources:\n      - type: git\n        url: https://github.com/matthiasn/lotti\n        commit: abc123\n      - type: archive\n        url: https://example.com/a.tar.gz\n        sha256: abc\n",
    )
    .unwrap();
    let err = check_compliance(&ctx).unwrap_err();
    assert!(matches!(err, PrepareError::Unbundled { .. }));
  }
}
