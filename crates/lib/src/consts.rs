//! Fixed names, URLs and versions shared by the operators and the pipeline.

/// Application id used for manifest and metadata filenames.
pub const APP_ID: &str = "com.matthiasn.lotti";

/// Name of the application module inside the manifest.
pub const APP_MODULE: &str = "lotti";

/// Name of the top-level Flutter SDK module.
pub const FLUTTER_SDK_MODULE: &str = "flutter-sdk";

/// Repository URLs that identify the application's own git source.
pub const DEFAULT_REPO_URLS: &[&str] = &["https://github.com/matthiasn/lotti", "git@github.com:matthiasn/lotti"];

/// Canonical upstream Flutter repository.
pub const FLUTTER_GIT_URL: &str = "https://github.com/flutter/flutter.git";

/// Marker placed in the template manifest where a commit must be pinned.
pub const COMMIT_PLACEHOLDER: &str = "COMMIT_PLACEHOLDER";

/// Filename the setup helper is installed under inside the SDK.
pub const SETUP_HELPER_NAME: &str = "setup-flutter.sh";

/// Flutter SDK location for the top-level module layout.
pub const APP_FLUTTER_DIR: &str = "/app/flutter";
/// `bin` directory of [`APP_FLUTTER_DIR`].
pub const APP_FLUTTER_BIN: &str = "/app/flutter/bin";

/// Flutter SDK location for the nested module layout.
pub const NESTED_FLUTTER_DIR: &str = "/var/lib/flutter";
/// `bin` directory of [`NESTED_FLUTTER_DIR`].
pub const NESTED_FLUTTER_BIN: &str = "/var/lib/flutter/bin";

/// Toolchain provided by the `rust-stable` SDK extension.
pub const RUST_SDK_BIN: &str = "/usr/lib/sdk/rust-stable/bin";

/// Rustup installation used by the generated rustup modules.
pub const RUSTUP_HOME: &str = "/var/lib/rustup";
pub const RUSTUP_BIN: &str = "/var/lib/rustup/bin";

/// Per-build cargo home inside the app build directory.
pub const LOCAL_CARGO_BIN: &str = "/run/build/lotti/.cargo/bin";
pub const CARGO_HOME: &str = "/run/build/lotti/.cargo";

/// Generated dependency includes that patches must follow.
pub const PUBSPEC_SOURCES_JSON: &str = "pubspec-sources.json";
pub const CARGO_SOURCES_JSON: &str = "cargo-sources.json";

/// Destination prefix of hosted pub.dev packages inside the build dir.
pub const PUB_DEV_DEST_PREFIX: &str = ".pub-cache/hosted/pub.dev/";

/// Patch shipped for every cargokit-based plugin.
pub const CARGOKIT_PATCH: &str = "cargokit/run_build_tool.sh.patch";

/// Plugins that build their native code through cargokit.
pub const CARGOKIT_PACKAGES: &[&str] = &["super_native_extensions", "flutter_vodozemac", "irondash_engine_context"];

/// Plugin versions patched when no `pubspec-sources.json` is available.
pub const CARGOKIT_FALLBACK_PACKAGES: &[&str] = &[
  "super_native_extensions-0.9.1",
  "flutter_vodozemac-0.2.2",
  "irondash_engine_context-0.5.5",
];

/// SQLite release bundled for `sqlite3_flutter_libs`, and the stale
/// version the generator's patch may still name.
pub const SQLITE_VERSION: &str = "3500400";
pub const SQLITE_STALE_VERSION: &str = "3500100";
pub const SQLITE_SHA256: &str = "a3db587a1b92ee5ddac2f66b3edb41b26f9c867275782d46c3a088977d6a5b18";

/// Where CMake FetchContent looks for the SQLite tarball, per Flatpak arch.
pub const SQLITE_DESTS: &[(&str, &str)] = &[
  (
    "x86_64",
    "./build/linux/x64/release/_deps/sqlite3-subbuild/sqlite3-populate-prefix/src",
  ),
  (
    "aarch64",
    "./build/linux/arm64/release/_deps/sqlite3-subbuild/sqlite3-populate-prefix/src",
  ),
];
/// SQLite autoconf tarball and the CMake patch that points at it.
pub const SQLITE_AUTOCONF_VERSION: &str = "sqlite-autoconf-3500400";
pub const SQLITE_URL: &str = "https://www.sqlite.org/2025/sqlite-autoconf-3500400.tar.gz";
pub const SQLITE_PATCH: &str = "sqlite3_flutter_libs/0.5.34-CMakeLists.txt.patch";
pub const SQLITE_PATCH_DEST: &str = ".pub-cache/hosted/pub.dev/sqlite3_flutter_libs-0.5.39";

/// mimalloc release fetched by media_kit's CMake build, per Flatpak arch.
pub const MIMALLOC_URL: &str = "https://github.com/microsoft/mimalloc/archive/refs/tags/v2.1.2.tar.gz";
pub const MIMALLOC_SHA256: &str = "2b1bff6f717f9725c70bf8d79e4786da13de8a270059e4ba0bdd262ae7be46eb";
pub const MIMALLOC_DESTS: &[(&str, &str)] = &[
  ("x86_64", "./build/linux/x64/release"),
  ("aarch64", "./build/linux/arm64/release"),
];
pub const MIMALLOC_FILENAME: &str = "mimalloc-2.1.2.tar.gz";

/// Pinned pub.dev package injected into the generated sources.
pub const PINNED_PUB_PACKAGE: &str = "yaml";
pub const PINNED_PUB_VERSION: &str = "3.1.2";

/// Connect timeout applied to every HTTPS download, in seconds.
pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Exit status reported when the generator exceeds its timeout.
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// Upstream of the `flatpak-flutter` generator.
pub const FLATPAK_FLUTTER_GIT_URL: &str = "https://github.com/TheAppgineer/flatpak-flutter.git";

/// Local path dependency staged for `flutter pub get` inside the generator.
pub const LOCAL_TOOL_PATH: &str = "tool/lotti_custom_lint";

/// Pinned Cargo.lock files of the cargokit plugins, by package name.
pub const CARGO_LOCK_SOURCES: &[(&str, &str)] = &[
  (
    "flutter_vodozemac",
    "https://raw.githubusercontent.com/famedly/dart-vodozemac/5319314eb397bc3c8de06baddbe64fa721596ce0/rust/Cargo.lock",
  ),
  (
    "super_native_extensions",
    "https://raw.githubusercontent.com/superlistapp/super_native_extensions/super_native_extensions-v0.9.1/super_native_extensions/rust/Cargo.lock",
  ),
  (
    "irondash_engine_context",
    "https://raw.githubusercontent.com/irondash/irondash/65343873472d6796c0388362a8e04b6e9a499044/Cargo.lock",
  ),
];

/// Flutter release archives for the `stable` channel.
pub const FLUTTER_RELEASES_URL: &str = "https://storage.googleapis.com/flutter_infra_release/releases/stable/linux";

/// Patches of the Flutter SDK shipped by `flatpak-flutter`.
pub const FLUTTER_PATCHES: &[&str] = &["flutter-shared.sh.patch", "flutter-pre-3_35-shared.sh.patch"];

/// Screenshot bundled with the app metadata and where it is installed.
pub const SCREENSHOT_SOURCE: &str = "screenshot.png";
pub const SCREENSHOT_INSTALL_PATH: &str = "/app/share/app-info/screenshots/com.matthiasn.lotti/main.png";
