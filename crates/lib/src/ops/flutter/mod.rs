//! Flutter-specific operators.
//!
//! Grouped by concern:
//! - [`sdk`]: where the Flutter SDK comes from and where it lives at build time
//! - [`helpers`]: the `setup-flutter.sh` helper and the bundled app archive
//! - [`build`]: build-command hygiene enforced by Flathub
//! - [`rust`]: Rust toolchain wiring through the SDK extension
//! - [`plugins`]: extra sources needed by native plugins
//! - [`patches`]: ordering of patches relative to generated dependency lists
//! - [`offline`]: the composed set of fixes for a fully offline build

mod build;
mod helpers;
mod offline;
mod patches;
mod plugins;
mod rust;
mod sdk;

pub use build::{
  ensure_dart_pub_offline_in_build, ensure_flutter_pub_get_offline, remove_flutter_config_command,
  remove_network_from_build_args,
};
pub use helpers::{bundle_app_archive, ensure_setup_helper_command, ensure_setup_helper_source};
pub use offline::{
  apply_all_offline_fixes, ensure_cargo_config_in_place, ensure_rustup_in_path, fix_flutter_sdk_paths,
  remove_flutter_sdk_source, remove_setup_flutter_command,
};
pub use patches::{
  add_cargokit_offline_patches, cargokit_packages_from_pubspec, patches_follow_dependencies,
  reorder_patches_after_dependencies,
};
pub use plugins::{add_media_kit_mimalloc_source, add_sqlite3_patch, add_sqlite3_source};
pub use rust::{ensure_rust_sdk_env, remove_rustup_install};
pub use sdk::{
  SDK_COPY_FALLBACK, convert_flutter_git_to_archive, ensure_nested_sdk, flutter_sdk_jsons,
  normalize_flutter_sdk_module, normalize_lotti_env, normalize_sdk_copy, remove_flutter_sdk_module,
  rewrite_flutter_git_url, should_remove_flutter_sdk,
};

/// Whether `url` points at an upstream `flutter/flutter` repository.
pub(crate) fn is_flutter_repo_url(url: &str) -> bool {
  url.contains("flutter/flutter")
}
