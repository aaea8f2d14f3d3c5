//! Fixes that make the final manifest build without network access.
//!
//! In the offline layout the Flutter SDK is unpacked under `/var/lib/flutter`
//! by the nested SDK module, rustup comes from a generated `rustup-*.json`
//! module and cargo reads vendored crates from the build directory.

use serde_yaml::Value;

use super::patches::add_cargokit_offline_patches;
use crate::consts::{
  APP_FLUTTER_BIN, APP_FLUTTER_DIR, APP_MODULE, CARGO_HOME, FLUTTER_SDK_MODULE, NESTED_FLUTTER_BIN,
  NESTED_FLUTTER_DIR, PUBSPEC_SOURCES_JSON, RUSTUP_BIN, RUSTUP_HOME, SETUP_HELPER_NAME,
};
use crate::manifest::{
  Document, ManifestError, MappingExt, OperationResult, build_commands_mut, env_mut, join_path_list, merge_results,
  split_path_list,
};
use crate::ops::{from_messages, remove_matching, string_list};

const CARGO_DIR_COMMAND: &str = "mkdir -p .cargo";
const CARGO_LINK_COMMAND: &str = "ln -sfn ../cargo .cargo/cargo";
const CARGO_CONFIG_COMMAND: &str = "cp cargo/config .cargo/config.toml 2>/dev/null || true";

/// Drop `setup-flutter.sh` invocations from the app build; the offline SDK
/// module already does the setup.
pub fn remove_setup_flutter_command(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(commands) = module.seq_mut("build-commands") else {
      return Ok(OperationResult::unchanged());
    };
    let mut removed = Vec::new();
    commands.retain(|c| match c.as_str() {
      Some(cmd) if cmd.contains(SETUP_HELPER_NAME) => {
        removed.push(format!("Removed command: {cmd}"));
        false
      }
      _ => true,
    });
    Ok(if removed.is_empty() {
      OperationResult::unchanged()
    } else {
      OperationResult::changed(removed.join("; "))
    })
  })
}

/// Replace `from` with `to` inside a `:`-separated list, dropping duplicates.
fn replace_path_entry(value: &str, from: &str, to: &str) -> String {
  let mut entries: Vec<String> = Vec::new();
  for entry in split_path_list(&value.replace(from, to)) {
    if !entries.contains(&entry) {
      entries.push(entry);
    }
  }
  join_path_list(&entries)
}

fn truncate_chars(text: &str, max: usize) -> &str {
  match text.char_indices().nth(max) {
    Some((index, _)) => &text[..index],
    None => text,
  }
}

/// Point the app build at the nested SDK under `/var/lib/flutter`, in
/// commands, `env.PATH` and `append-path`.
pub fn fix_flutter_sdk_paths(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();

    if let Some(commands) = module.seq_mut("build-commands") {
      for command in commands.iter_mut() {
        let Some(cmd) = command.as_str() else {
          continue;
        };
        if cmd.contains(APP_FLUTTER_DIR) && !cmd.contains(NESTED_FLUTTER_DIR) {
          messages.push(format!("Fixed path in command: {}...", truncate_chars(cmd, 50)));
          *command = Value::from(cmd.replace(APP_FLUTTER_DIR, NESTED_FLUTTER_DIR));
        }
      }
    }

    if let Some(options) = module.get_mut("build-options").and_then(Value::as_mapping_mut) {
      if let Some(env) = options.get_mut("env").and_then(Value::as_mapping_mut) {
        let fixed = env
          .get_str("PATH")
          .filter(|p| p.contains(APP_FLUTTER_BIN))
          .map(|p| replace_path_entry(p, APP_FLUTTER_BIN, NESTED_FLUTTER_BIN));
        if let Some(path) = fixed {
          env.set_str("PATH", &path);
          messages.push("Fixed PATH environment variable".to_string());
        }
      }

      let fixed = options
        .get_str("append-path")
        .filter(|p| p.contains(APP_FLUTTER_BIN))
        .map(|p| replace_path_entry(p, APP_FLUTTER_BIN, NESTED_FLUTTER_BIN));
      if let Some(append) = fixed {
        options.set_str("append-path", &append);
        messages.push("Fixed append-path".to_string());
      }
    }

    Ok(from_messages(messages))
  })
}

/// Drop the `setup-flutter.sh` helper file from `flutter-sdk`.
pub fn remove_flutter_sdk_source(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(FLUTTER_SDK_MODULE, |module| {
    let Some(sources) = module.seq_mut("sources") else {
      return Ok(OperationResult::unchanged());
    };
    let removed = remove_matching(sources, |s| {
      s.as_mapping().and_then(|m| m.get_str("dest-filename")) == Some(SETUP_HELPER_NAME)
    });
    Ok(if removed > 0 {
      OperationResult::changed("Removed setup-flutter.sh source from flutter-sdk")
    } else {
      OperationResult::unchanged()
    })
  })
}

fn has_rustup_module(doc: &Document) -> bool {
  doc.modules().into_iter().flatten().any(|m| match m {
    Value::String(include) => include.contains("rustup"),
    Value::Mapping(module) => module.get_str("name") == Some("rustup"),
    _ => false,
  })
}

/// When a rustup module is part of the build, put its `bin` first on the app
/// module's search paths and point `RUSTUP_HOME` at it.
///
/// Only existing `build-options` (and `env`) are touched.
pub fn ensure_rustup_in_path(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  if !has_rustup_module(doc) {
    return Ok(OperationResult::unchanged());
  }

  doc.update_module(APP_MODULE, |module| {
    let Some(options) = module.get_mut("build-options").and_then(Value::as_mapping_mut) else {
      return Ok(OperationResult::unchanged());
    };
    let mut messages = Vec::new();

    if let Some(env) = options.get_mut("env").and_then(Value::as_mapping_mut) {
      let prefixed = env
        .get_str("PATH")
        .filter(|p| !p.contains(RUSTUP_BIN))
        .map(|p| format!("{RUSTUP_BIN}:{p}"));
      if let Some(path) = prefixed {
        env.set_str("PATH", &path);
        messages.push(format!("Added {RUSTUP_BIN} to PATH"));
      }

      let had_home = env.contains_key("RUSTUP_HOME");
      if env.set_str("RUSTUP_HOME", RUSTUP_HOME) {
        let verb = if had_home { "Fixed" } else { "Set" };
        messages.push(format!("{verb} RUSTUP_HOME to {RUSTUP_HOME}"));
      }
    }

    let prefixed = options
      .get_str("append-path")
      .filter(|p| !p.contains(RUSTUP_BIN))
      .map(|p| format!("{RUSTUP_BIN}:{p}"));
    if let Some(append) = prefixed {
      options.set_str("append-path", &append);
      messages.push(format!("Added {RUSTUP_BIN} to append-path"));
    }

    Ok(from_messages(messages))
  })
}

fn is_source_build_marker(command: &str) -> bool {
  let lower = command.to_lowercase();
  lower.contains("building") && lower.contains("from source")
}

/// Give cargo a `CARGO_HOME` inside the build directory that sees the
/// vendored crates and their offline config.
///
/// The setup commands go right after the "Building ... from source" echo, or
/// at index 3 when there is none.
pub fn ensure_cargo_config_in_place(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  let steps = [
    (CARGO_DIR_COMMAND, "Ensured .cargo directory exists"),
    (CARGO_LINK_COMMAND, "Linked cargo vendor directory into CARGO_HOME"),
    (CARGO_CONFIG_COMMAND, "Added cargo config copy command"),
  ];

  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();
    if env_mut(module)?.set_str("CARGO_HOME", CARGO_HOME) {
      messages.push(format!("Set CARGO_HOME to {CARGO_HOME}"));
    }

    let present: Vec<&str> = string_list(module, "build-commands").collect();
    if steps.iter().all(|(cmd, _)| present.contains(cmd)) {
      return Ok(from_messages(messages));
    }

    let commands = build_commands_mut(module)?;
    let marker = commands
      .iter()
      .position(|c| c.as_str().is_some_and(is_source_build_marker));
    let mut index = marker.map_or(3.min(commands.len()), |i| i + 1);
    for (cmd, message) in steps {
      if let Some(existing) = commands.iter().position(|c| c.as_str() == Some(cmd)) {
        index = existing + 1;
        continue;
      }
      commands.insert(index, Value::from(cmd));
      index += 1;
      messages.push(message.to_string());
    }

    Ok(from_messages(messages))
  })
}

/// Run every offline fix in a fixed order.
///
/// Cargokit plugins are detected from a `pubspec-sources.json` next to the
/// manifest when there is one.
pub fn apply_all_offline_fixes(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  let pubspec_json = doc
    .path()
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .map(|dir| dir.join(PUBSPEC_SOURCES_JSON))
    .filter(|path| path.is_file());

  Ok(merge_results([
    remove_setup_flutter_command(doc)?,
    fix_flutter_sdk_paths(doc)?,
    remove_flutter_sdk_source(doc)?,
    add_cargokit_offline_patches(doc, pubspec_json.as_deref())?,
    ensure_rustup_in_path(doc)?,
    ensure_cargo_config_in_place(doc)?,
  ]))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::testutil::{doc, sample};
  use crate::manifest::{append_path, env_var};
  use std::fs;
  use tempfile::tempdir;

  fn commands(d: &Document) -> Vec<String> {
    string_list(d.module(APP_MODULE).unwrap(), "build-commands")
      .map(str::to_string)
      .collect()
  }

  mod command_tests {
    use super::*;

    #[test]
    fn setup_command_removed_with_joined_message() {
      let mut d = doc(
        "modules:\n  - name: lotti\n    build-commands:\n      - setup-flutter.sh -C /app\n      - echo ok\n",
      );
      let result = remove_setup_flutter_command(&mut d).unwrap();
      assert_eq!(result.messages, ["Removed command: setup-flutter.sh -C /app"]);
      assert_eq!(commands(&d), ["echo ok"]);
      assert!(!remove_setup_flutter_command(&mut d).unwrap().changed);
    }

    #[test]
    fn sdk_paths_move_to_var_lib() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    build-options:
      append-path: /app/flutter/bin:/usr/bin
      env:
        PATH: /app/flutter/bin:/var/lib/flutter/bin:/usr/bin
    build-commands:
      - cp -r /app/flutter /run/build/lotti/flutter_sdk
      - echo done
"#,
      );
      let result = fix_flutter_sdk_paths(&mut d).unwrap();
      assert_eq!(
        result.messages,
        [
          "Fixed path in command: cp -r /app/flutter /run/build/lotti/flutter_sdk...",
          "Fixed PATH environment variable",
          "Fixed append-path",
        ]
      );
      let lotti = d.module(APP_MODULE).unwrap();
      assert_eq!(env_var(lotti, "PATH"), Some("/var/lib/flutter/bin:/usr/bin"));
      assert_eq!(append_path(lotti), Some("/var/lib/flutter/bin:/usr/bin"));
      assert_eq!(commands(&d)[0], "cp -r /var/lib/flutter /run/build/lotti/flutter_sdk");
      assert_eq!(fix_flutter_sdk_paths(&mut d).unwrap(), OperationResult::unchanged());
    }

    #[test]
    fn long_commands_are_truncated_in_messages() {
      assert_eq!(truncate_chars("abcdef", 3), "abc");
      assert_eq!(truncate_chars("äöü", 5), "äöü");
    }
  }

  mod rustup_tests {
    use super::*;

    const WITH_RUSTUP: &str = r#"
modules:
  - rustup-1.83.0.json
  - name: lotti
    build-options:
      append-path: /usr/bin
      env:
        PATH: /usr/bin
        RUSTUP_HOME: /usr/lib/sdk/rust-stable
"#;

    #[test]
    fn rustup_bin_and_home_fixed() {
      let mut d = doc(WITH_RUSTUP);
      let result = ensure_rustup_in_path(&mut d).unwrap();
      assert_eq!(
        result.messages,
        [
          "Added /var/lib/rustup/bin to PATH",
          "Fixed RUSTUP_HOME to /var/lib/rustup",
          "Added /var/lib/rustup/bin to append-path",
        ]
      );
      let lotti = d.module(APP_MODULE).unwrap();
      assert_eq!(env_var(lotti, "RUSTUP_HOME"), Some(RUSTUP_HOME));
      assert_eq!(append_path(lotti), Some("/var/lib/rustup/bin:/usr/bin"));
      assert_eq!(ensure_rustup_in_path(&mut d).unwrap(), OperationResult::unchanged());
    }

    #[test]
    fn without_rustup_module_nothing_happens() {
      let mut d = sample();
      assert_eq!(ensure_rustup_in_path(&mut d).unwrap(), OperationResult::unchanged());
    }
  }

  mod cargo_config_tests {
    use super::*;

    #[test]
    fn commands_follow_marker() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    build-commands:
      - echo start
      - echo "Building cargokit plugins from source"
      - flutter build linux
"#,
      );
      let result = ensure_cargo_config_in_place(&mut d).unwrap();
      assert_eq!(result.messages.len(), 4);
      assert_eq!(
        commands(&d),
        [
          "echo start",
          "echo \"Building cargokit plugins from source\"",
          CARGO_DIR_COMMAND,
          CARGO_LINK_COMMAND,
          CARGO_CONFIG_COMMAND,
          "flutter build linux",
        ]
      );
      assert_eq!(env_var(d.module(APP_MODULE).unwrap(), "CARGO_HOME"), Some(CARGO_HOME));
      assert_eq!(ensure_cargo_config_in_place(&mut d).unwrap(), OperationResult::unchanged());
    }

    #[test]
    fn partial_setup_only_adds_missing_steps() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    build-options:
      env:
        CARGO_HOME: /run/build/lotti/.cargo
    build-commands:
      - mkdir -p .cargo
      - flutter build linux
"#,
      );
      let result = ensure_cargo_config_in_place(&mut d).unwrap();
      assert_eq!(
        result.messages,
        ["Linked cargo vendor directory into CARGO_HOME", "Added cargo config copy command"]
      );
      assert_eq!(
        commands(&d),
        [CARGO_DIR_COMMAND, CARGO_LINK_COMMAND, CARGO_CONFIG_COMMAND, "flutter build linux"]
      );
    }
  }

  mod apply_all_tests {
    use super::*;

    #[test]
    fn composition_is_idempotent() {
      let mut d = sample();
      let first = apply_all_offline_fixes(&mut d).unwrap();
      assert!(first.changed);
      assert!(first.messages.iter().any(|m| m.contains("cargokit patch")));

      let snapshot = d.to_yaml_string().unwrap();
      assert_eq!(apply_all_offline_fixes(&mut d).unwrap(), OperationResult::unchanged());
      assert_eq!(d.to_yaml_string().unwrap(), snapshot);
    }

    #[test]
    fn pubspec_next_to_manifest_drives_cargokit_detection() {
      let temp = tempdir().unwrap();
      let path = temp.path().join("com.matthiasn.lotti.yml");
      fs::write(&path, crate::manifest::testutil::SAMPLE_MANIFEST).unwrap();
      fs::write(temp.path().join(PUBSPEC_SOURCES_JSON), "[]").unwrap();

      let mut d = Document::load(&path).unwrap();
      let result = apply_all_offline_fixes(&mut d).unwrap();
      assert!(!result.messages.iter().any(|m| m.contains("cargokit patch")));
    }
  }
}
