use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::DownloadError;
use crate::manifest::ManifestError;
use crate::process::ProcessError;

/// Errors that abort the preparation pipeline.
#[derive(Debug, Error)]
pub enum PrepareError {
  /// A required input file or directory is absent.
  #[error("{what} not found at {}", path.display())]
  Missing { what: &'static str, path: PathBuf },

  /// `pubspec.yaml` has no `version:` line.
  #[error("Unable to determine Lotti version. Define it in pubspec.yaml before running the orchestrator.")]
  UnknownVersion,

  /// The generator failed and fallback generation was not allowed.
  #[error("flatpak-flutter failed; set ALLOW_FALLBACK=true to proceed with fallback generation")]
  GeneratorFailed,

  /// A manifest still references a branch or the commit placeholder.
  #[error("{label} manifest contains {found}; final manifest must be commit-pinned")]
  NotPinned { label: &'static str, found: &'static str },

  /// The screenshot shipped with the metadata is missing.
  #[error(
    "Screenshot asset is missing: expected {} relative to {}. Provide flatpak/screenshot.png before running the Flathub prep.",
    path.display(),
    flatpak_dir.display()
  )]
  MissingScreenshot { path: PathBuf, flatpak_dir: PathBuf },

  /// Lockfile-based `pubspec-sources.json` generation failed.
  #[error("Failed to generate pubspec-sources.json:\n{0}")]
  PubspecGeneration(String),

  /// `pubspec-sources.json` is absent after the generation stages.
  #[error("pubspec-sources.json missing after preparation; offline bundle is incomplete")]
  MissingPubspecSources,

  /// An `archive` or `file` source still points at a remote URL.
  #[error("{url} was not bundled into the output directory")]
  Unbundled { url: String },

  /// A bundled source names a file absent from the output directory.
  #[error("bundled source {} is missing", path.display())]
  MissingArtifact { path: PathBuf },

  /// A bundled file does not hash to its declared `sha256`.
  #[error("SHA-256 mismatch for {}: manifest declares {expected}, file has {actual}", path.display())]
  ChecksumMismatch {
    path: PathBuf,
    expected: String,
    actual: String,
  },

  /// Cargokit or sqlite patches precede a generated dependency include.
  #[error("package patches must follow pubspec-sources.json and cargo-sources.json")]
  PatchOrder,

  /// Nested Flutter SDK modules are referenced next to a top-level SDK module.
  #[error("lotti references nested Flutter SDK modules but the top-level flutter-sdk module is still present")]
  DuplicateFlutterSdk,

  /// The final manifest breaks the Flathub rules.
  #[error("FATAL: Flathub compliance violations found in final manifest")]
  Compliance,

  /// A JSON dependency list could not be read or written.
  #[error("invalid JSON in {}: {source}", path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error(transparent)]
  Download(#[from] DownloadError),

  #[error(transparent)]
  Io(#[from] io::Error),
}
