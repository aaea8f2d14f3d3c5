//! Rust toolchain wiring for cargokit plugins.
//!
//! Rust comes from the `rust-stable` SDK extension; nothing installs rustup
//! inside the build.

use tracing::debug;

use crate::consts::{APP_MODULE, LOCAL_CARGO_BIN, RUST_SDK_BIN};
use crate::manifest::{
  Document, ManifestError, MappingExt, OperationResult, append_path, build_options_mut, env_mut, env_var,
  join_path_list, split_path_list,
};
use crate::ops::{from_messages, remove_matching};

/// Put the Rust SDK first, drop the local cargo shim dir and duplicates.
fn with_rust_sdk(current: Option<&str>) -> String {
  let mut entries: Vec<String> = Vec::new();
  for entry in split_path_list(current.unwrap_or_default()) {
    if entry != LOCAL_CARGO_BIN && !entries.contains(&entry) {
      entries.push(entry);
    }
  }
  if !entries.iter().any(|e| e == RUST_SDK_BIN) {
    entries.insert(0, RUST_SDK_BIN.to_string());
  }
  join_path_list(&entries)
}

/// Make the Rust SDK extension's `bin` visible to the app build, both in
/// `append-path` and `env.PATH`.
pub fn ensure_rust_sdk_env(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();

    let append = with_rust_sdk(append_path(module));
    if append_path(module) != Some(append.as_str()) {
      build_options_mut(module)?.set_str("append-path", &append);
      messages.push("Added Rust SDK path to append-path".to_string());
    }

    let path = with_rust_sdk(env_var(module, "PATH"));
    if env_var(module, "PATH") != Some(path.as_str()) {
      env_mut(module)?.set_str("PATH", &path);
      messages.push("Updated PATH with Rust SDK path".to_string());
    }

    if !messages.is_empty() {
      debug!("configured Rust SDK environment");
    }
    Ok(from_messages(messages))
  })
}

fn is_rustup_command(command: &str) -> bool {
  ["rustup.rs", "rustup.sh", "rustup-init", ".cargo/bin"]
    .iter()
    .any(|needle| command.contains(needle))
}

/// Drop rustup bootstrap commands (and local cargo PATH exports) from the app
/// build.
pub fn remove_rustup_install(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(commands) = module.seq_mut("build-commands") else {
      return Ok(OperationResult::unchanged());
    };
    let removed = remove_matching(commands, |c| c.as_str().is_some_and(is_rustup_command));
    Ok(if removed > 0 {
      OperationResult::changed("Removed rustup installation (using SDK extension instead)")
    } else {
      OperationResult::unchanged()
    })
  })
}
