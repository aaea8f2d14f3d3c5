mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use manifest_tool_lib::consts::SETUP_HELPER_NAME;
use manifest_tool_lib::ops::flutter::{
  add_media_kit_mimalloc_source, add_sqlite3_source, apply_all_offline_fixes, ensure_dart_pub_offline_in_build,
  ensure_flutter_pub_get_offline, ensure_rust_sdk_env, normalize_flutter_sdk_module, normalize_sdk_copy,
  remove_flutter_config_command, remove_network_from_build_args, remove_rustup_install,
  reorder_patches_after_dependencies, rewrite_flutter_git_url,
};
use manifest_tool_lib::ops::sources::remove_rustup_sources;
use manifest_tool_lib::sdk::DEFAULT_MAX_DEPTH;
use tracing_subscriber::EnvFilter;

use cmd::{Layout, OfflineSourceArgs, PrepareArgs, cmd_edit};
use output::{error_chain, print_error};

/// manifest-tool - prepare the lotti Flathub manifest for offline builds
#[derive(Parser)]
#[command(name = "manifest-tool")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct ManifestArg {
  /// Manifest file path
  #[arg(long)]
  manifest: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
  /// Replace a manifest source url with a local path entry
  ReplaceUrlWithPath {
    #[command(flatten)]
    target: ManifestArg,
    /// Identifier to match within the url
    #[arg(long)]
    identifier: String,
    /// Replacement path value
    #[arg(long)]
    path: String,
  },

  /// Ensure flutter-sdk ships the setup helper and lotti sees the SDK on PATH
  EnsureSetupHelper {
    #[command(flatten)]
    target: ManifestArg,
    /// Helper script basename to embed
    #[arg(long, default_value = SETUP_HELPER_NAME)]
    helper: String,
  },

  /// Pin the lotti source to a specific commit
  PinCommit {
    #[command(flatten)]
    target: ManifestArg,
    /// Commit SHA to pin
    #[arg(long)]
    commit: String,
    /// Repository URL to match (repeatable)
    #[arg(long = "repo-url")]
    repo_urls: Vec<String>,
  },

  /// Update the manifest for a build (pull request or regular push)
  UpdateManifest {
    #[command(flatten)]
    target: ManifestArg,
    /// Commit SHA to pin for non-PR builds (default: current HEAD)
    #[arg(long)]
    commit: Option<String>,
    /// GitHub event name (e.g. pull_request)
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: Option<String>,
    /// Path to the GitHub event JSON file
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,
  },

  /// Ensure a string module include is present (e.g. rustup-1.83.0.json)
  EnsureModuleInclude {
    #[command(flatten)]
    target: ManifestArg,
    /// Module include name
    #[arg(long)]
    name: String,
    /// Insert before the module with this name
    #[arg(long)]
    before: Option<String>,
  },

  /// Attach flutter-sdk JSON modules under lotti
  EnsureNestedSdk {
    #[command(flatten)]
    target: ManifestArg,
    /// Directory containing the Flutter SDK JSON files
    #[arg(long)]
    output_dir: PathBuf,
  },

  /// Normalize PATH settings for the lotti module
  NormalizeLottiEnv {
    #[command(flatten)]
    target: ManifestArg,
    /// SDK layout to normalize
    #[arg(long, value_enum, default_value_t = Layout::Top)]
    layout: Layout,
    /// Target append-path instead of env.PATH
    #[arg(long)]
    append_path: bool,
  },

  /// Ensure the lotti module bundles and invokes setup-flutter.sh
  EnsureLottiSetupHelper {
    #[command(flatten)]
    target: ManifestArg,
    /// SDK layout to target
    #[arg(long, value_enum, default_value_t = Layout::Top)]
    layout: Layout,
    /// Helper script basename
    #[arg(long, default_value = SETUP_HELPER_NAME)]
    helper: String,
  },

  /// Remove --share=network from build-args
  RemoveNetworkFromBuildArgs(ManifestArg),

  /// Add --offline to flutter pub get commands
  EnsureFlutterPubGetOffline(ManifestArg),

  /// Remove flutter config commands from lotti
  RemoveFlutterConfig(ManifestArg),

  /// Add --no-pub to flutter build commands in lotti
  EnsureDartPubOfflineInBuild(ManifestArg),

  /// Add the SQLite autoconf sources used by sqlite3_flutter_libs
  #[command(name = "add-sqlite3-source")]
  AddSqlite3Source(ManifestArg),

  /// Add the mimalloc sources used by media_kit
  AddMediaKitMimallocSource(ManifestArg),

  /// Put the Rust SDK extension on lotti's PATH
  EnsureRustSdkEnv(ManifestArg),

  /// Remove rustup install commands from lotti
  RemoveRustupInstall(ManifestArg),

  /// Print 1 when the top-level flutter-sdk module can be removed, else 0
  ShouldRemoveFlutterSdk {
    #[command(flatten)]
    target: ManifestArg,
    /// Directory containing the Flutter SDK JSON files
    #[arg(long)]
    output_dir: PathBuf,
  },

  /// Reduce flutter-sdk build commands to the install steps
  NormalizeFlutterSdkModule(ManifestArg),

  /// Make lotti's SDK copy work for both SDK layouts
  NormalizeSdkCopy(ManifestArg),

  /// Replace Flutter git sources with a local archive
  ConvertFlutterGitToArchive {
    #[command(flatten)]
    target: ManifestArg,
    /// Archive filename
    #[arg(long)]
    archive: String,
    /// Archive SHA256 hash
    #[arg(long)]
    sha256: String,
  },

  /// Reset Flutter git sources to the canonical upstream URL
  RewriteFlutterGitUrl(ManifestArg),

  /// Attach offline JSON sources to the lotti module
  AddOfflineSources {
    #[command(flatten)]
    target: ManifestArg,
    #[command(flatten)]
    sources: OfflineSourceArgs,
  },

  /// Bundle archive and file sources referenced by the manifest
  BundleArchiveSources {
    #[command(flatten)]
    target: ManifestArg,
    /// Directory for cached artifacts
    #[arg(long)]
    output_dir: PathBuf,
    /// Download sources that are not cached locally
    #[arg(long)]
    download_missing: bool,
    /// Additional directory to search for cached artifacts (repeatable)
    #[arg(long = "search-root")]
    search_roots: Vec<PathBuf>,
  },

  /// Bundle the application source archive
  BundleAppArchive {
    #[command(flatten)]
    target: ManifestArg,
    /// Archive filename, relative to the output directory
    #[arg(long)]
    archive: String,
    /// Archive SHA256 hash
    #[arg(long)]
    sha256: String,
    /// Directory containing offline artifacts
    #[arg(long)]
    output_dir: PathBuf,
  },

  /// Remove rustup-*.json references from sources
  RemoveRustupSources(ManifestArg),

  /// Apply all offline fixes (setup helper removal, SDK paths, cargokit patches)
  ApplyOfflineFixes(ManifestArg),

  /// Move cargokit and sqlite patches after the dependency includes
  ReorderPatches(ManifestArg),

  /// Check the manifest for Flathub compliance violations
  CheckFlathubCompliance(ManifestArg),

  /// Emit shell assignments for PR-aware manifest pinning
  PrAwarePin {
    /// GitHub event name (e.g. pull_request)
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: Option<String>,
    /// Path to the GitHub event payload JSON
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,
  },

  /// Find a cached Flutter SDK installation
  FindFlutterSdk {
    /// Root directory to search (repeatable)
    #[arg(long = "search-root", required = true)]
    search_roots: Vec<PathBuf>,
    /// Path to exclude from the search (repeatable)
    #[arg(long)]
    exclude: Vec<PathBuf>,
    /// Maximum search depth
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
  },

  /// Prepare the offline Flathub submission
  PrepareFlathub(PrepareArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli.command) {
    Ok(code) => code,
    Err(err) => {
      print_error(&error_chain(&err));
      ExitCode::FAILURE
    }
  }
}

fn run(command: Commands) -> Result<ExitCode> {
  let done = |result: Result<()>| result.map(|()| ExitCode::SUCCESS);

  match command {
    Commands::ReplaceUrlWithPath {
      target,
      identifier,
      path,
    } => cmd::cmd_replace_url_with_path(&target.manifest, &identifier, &path),
    Commands::EnsureSetupHelper { target, helper } => done(cmd::cmd_ensure_setup_helper(&target.manifest, &helper)),
    Commands::PinCommit {
      target,
      commit,
      repo_urls,
    } => done(cmd::cmd_pin_commit(&target.manifest, &commit, &repo_urls)),
    Commands::UpdateManifest {
      target,
      commit,
      event_name,
      event_path,
    } => done(cmd::cmd_update_manifest(
      &target.manifest,
      commit,
      event_name.as_deref(),
      event_path.as_deref(),
    )),
    Commands::EnsureModuleInclude { target, name, before } => done(cmd::cmd_ensure_module_include(
      &target.manifest,
      &name,
      before.as_deref(),
    )),
    Commands::EnsureNestedSdk { target, output_dir } => done(cmd::cmd_ensure_nested_sdk(&target.manifest, &output_dir)),
    Commands::NormalizeLottiEnv {
      target,
      layout,
      append_path,
    } => done(cmd::cmd_normalize_lotti_env(&target.manifest, layout, append_path)),
    Commands::EnsureLottiSetupHelper { target, layout, helper } => {
      done(cmd::cmd_ensure_lotti_setup_helper(&target.manifest, layout, &helper))
    }
    Commands::RemoveNetworkFromBuildArgs(target) => done(cmd_edit(&target.manifest, remove_network_from_build_args)),
    Commands::EnsureFlutterPubGetOffline(target) => done(cmd_edit(&target.manifest, ensure_flutter_pub_get_offline)),
    Commands::RemoveFlutterConfig(target) => done(cmd_edit(&target.manifest, remove_flutter_config_command)),
    Commands::EnsureDartPubOfflineInBuild(target) => {
      done(cmd_edit(&target.manifest, ensure_dart_pub_offline_in_build))
    }
    Commands::AddSqlite3Source(target) => done(cmd_edit(&target.manifest, add_sqlite3_source)),
    Commands::AddMediaKitMimallocSource(target) => done(cmd_edit(&target.manifest, add_media_kit_mimalloc_source)),
    Commands::EnsureRustSdkEnv(target) => done(cmd_edit(&target.manifest, ensure_rust_sdk_env)),
    Commands::RemoveRustupInstall(target) => done(cmd_edit(&target.manifest, remove_rustup_install)),
    Commands::ShouldRemoveFlutterSdk { target, output_dir } => {
      done(cmd::cmd_should_remove_flutter_sdk(&target.manifest, &output_dir))
    }
    Commands::NormalizeFlutterSdkModule(target) => done(cmd_edit(&target.manifest, normalize_flutter_sdk_module)),
    Commands::NormalizeSdkCopy(target) => done(cmd_edit(&target.manifest, normalize_sdk_copy)),
    Commands::ConvertFlutterGitToArchive {
      target,
      archive,
      sha256,
    } => done(cmd::cmd_convert_flutter_git_to_archive(&target.manifest, &archive, &sha256)),
    Commands::RewriteFlutterGitUrl(target) => done(cmd_edit(&target.manifest, rewrite_flutter_git_url)),
    Commands::AddOfflineSources { target, sources } => done(cmd::cmd_add_offline_sources(&target.manifest, &sources)),
    Commands::BundleArchiveSources {
      target,
      output_dir,
      download_missing,
      search_roots,
    } => done(cmd::cmd_bundle_archive_sources(
      &target.manifest,
      &output_dir,
      download_missing,
      search_roots,
    )),
    Commands::BundleAppArchive {
      target,
      archive,
      sha256,
      output_dir,
    } => done(cmd::cmd_bundle_app_archive(&target.manifest, &archive, &sha256, &output_dir)),
    Commands::RemoveRustupSources(target) => done(cmd_edit(&target.manifest, remove_rustup_sources)),
    Commands::ApplyOfflineFixes(target) => done(cmd_edit(&target.manifest, apply_all_offline_fixes)),
    Commands::ReorderPatches(target) => done(cmd_edit(&target.manifest, reorder_patches_after_dependencies)),
    Commands::CheckFlathubCompliance(target) => cmd::cmd_check_flathub_compliance(&target.manifest),
    Commands::PrAwarePin { event_name, event_path } => {
      cmd::cmd_pr_aware_pin(event_name.as_deref(), event_path.as_deref());
      Ok(ExitCode::SUCCESS)
    }
    Commands::FindFlutterSdk {
      search_roots,
      exclude,
      max_depth,
    } => Ok(cmd::cmd_find_flutter_sdk(&search_roots, &exclude, max_depth)),
    Commands::PrepareFlathub(args) => done(cmd::cmd_prepare_flathub(args)),
  }
}
