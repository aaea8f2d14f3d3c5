//! The `setup-flutter.sh` helper and the bundled application archive.

use serde_yaml::Value;
use tracing::warn;

use super::is_flutter_repo_url;
use crate::consts::{APP_MODULE, CARGO_SOURCES_JSON, FLUTTER_SDK_MODULE, PUBSPEC_SOURCES_JSON, SETUP_HELPER_NAME};
use crate::manifest::{
  Document, ManifestError, MappingExt, OperationResult, Source, build_commands_mut, module_sources_mut,
};
use crate::ops::{from_messages, mapping, remove_matching, string_list};

/// Ensure `flutter-sdk` ships `helper_name` as `flutter/bin/setup-flutter.sh`.
///
/// An existing entry (detected by `dest-filename`) is updated in place.
pub fn ensure_setup_helper_source(doc: &mut Document, helper_name: &str) -> Result<OperationResult, ManifestError> {
  doc.update_module(FLUTTER_SDK_MODULE, |module| {
    let existing = module
      .seq("sources")
      .into_iter()
      .flatten()
      .position(|s| s.as_mapping().and_then(|m| m.get_str("dest-filename")) == Some(SETUP_HELPER_NAME));

    let message = format!("Ensured setup helper {helper_name} in flutter-sdk sources");
    let Some(index) = existing else {
      module_sources_mut(module)?.push(mapping([
        ("type", Value::from("file")),
        ("path", Value::from(helper_name)),
        ("dest", Value::from("flutter/bin")),
        ("dest-filename", Value::from(SETUP_HELPER_NAME)),
      ]));
      return Ok(OperationResult::changed(message));
    };

    let source = module
      .seq_mut("sources")
      .and_then(|sources| sources.get_mut(index))
      .and_then(Value::as_mapping_mut);
    let Some(source) = source else {
      return Ok(OperationResult::unchanged());
    };
    let mut changed = source.set_str("type", "file");
    changed |= source.set_str("path", helper_name);
    changed |= source.set_str("dest", "flutter/bin");
    changed |= source.remove_key("url").is_some();
    Ok(if changed {
      OperationResult::changed(message)
    } else {
      OperationResult::unchanged()
    })
  })
}

/// Render the helper invocation for the app build.
fn setup_helper_command(working_dir: Option<&str>, enable_debug: bool, resolver_paths: &[String]) -> String {
  let mut parts = vec![SETUP_HELPER_NAME.to_string()];
  for path in resolver_paths.iter().filter(|p| !p.is_empty()) {
    parts.push("-r".to_string());
    parts.push(path.clone());
  }
  if let Some(dir) = working_dir.filter(|d| !d.is_empty() && *d != ".") {
    parts.push("-C".to_string());
    parts.push(dir.to_string());
  }
  if enable_debug {
    parts.push("-d".to_string());
  }
  parts.join(" ")
}

/// Ensure the app build runs the setup helper.
///
/// An existing helper invocation is replaced when it differs. A new one goes
/// right after the `echo ... setting up ...` line, or at index 1.
pub fn ensure_setup_helper_command(
  doc: &mut Document,
  working_dir: Option<&str>,
  enable_debug: bool,
  resolver_paths: &[String],
) -> Result<OperationResult, ManifestError> {
  let command = setup_helper_command(working_dir, enable_debug, resolver_paths);

  doc.update_module(APP_MODULE, |module| {
    let current: Vec<&str> = string_list(module, "build-commands").collect();
    if current.contains(&command.as_str()) {
      return Ok(OperationResult::unchanged());
    }

    let existing = module
      .seq("build-commands")
      .into_iter()
      .flatten()
      .position(|c| c.as_str().is_some_and(|c| c.contains(SETUP_HELPER_NAME)));
    let anchor = module.seq("build-commands").into_iter().flatten().position(|c| {
      c.as_str().is_some_and(|c| {
        let lower = c.to_lowercase();
        lower.starts_with("echo") && lower.contains("setting up")
      })
    });

    let commands = build_commands_mut(module)?;
    match existing {
      Some(index) => commands[index] = Value::from(command.as_str()),
      None => {
        let index = anchor.map_or(1.min(commands.len()), |i| i + 1);
        commands.insert(index, Value::from(command.as_str()));
      }
    }
    Ok(OperationResult::changed(format!("Ensured setup helper command: {command}")))
  })
}

/// Make the app module build from the bundled source archive.
///
/// Flutter git checkouts are removed from `lotti` and a local file source for
/// `archive_path` leads the list. A warning is logged when the generated
/// pubspec/cargo includes are missing, since the archive alone cannot build
/// offline.
pub fn bundle_app_archive(
  doc: &mut Document,
  archive_path: &str,
  sha256: &str,
) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();

    if let Some(sources) = module.seq_mut("sources") {
      let removed = remove_matching(sources, |s| {
        matches!(Source::from_value(s), Source::Git(m) if m.get_str("url").is_some_and(is_flutter_repo_url))
      });
      if removed > 0 {
        messages.push("Removed Flutter git source from lotti".to_string());
      }
    }

    let sources = module_sources_mut(module)?;
    let has_archive = sources
      .iter()
      .any(|s| matches!(Source::from_value(s), Source::File(m) if m.get_str("path") == Some(archive_path)));
    if !has_archive {
      sources.insert(
        0,
        mapping([
          ("type", Value::from("file")),
          ("path", Value::from(archive_path)),
          ("sha256", Value::from(sha256)),
        ]),
      );
      messages.push(format!("Added app archive {archive_path}"));
    }

    for include in [PUBSPEC_SOURCES_JSON, CARGO_SOURCES_JSON] {
      if !sources.iter().any(|s| s.as_str() == Some(include)) {
        warn!(include = %include, "app module does not reference generated sources");
      }
    }

    Ok(from_messages(messages))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::testutil::{doc, sample};

  fn commands(d: &Document) -> Vec<String> {
    string_list(d.module(APP_MODULE).unwrap(), "build-commands")
      .map(str::to_string)
      .collect()
  }

  mod helper_source_tests {
    use super::*;

    #[test]
    fn adds_helper_file_once() {
      let mut d = sample();
      let result = ensure_setup_helper_source(&mut d, "setup-flutter.sh").unwrap();
      assert_eq!(result.messages, ["Ensured setup helper setup-flutter.sh in flutter-sdk sources"]);

      let sources = d.module(FLUTTER_SDK_MODULE).unwrap().seq("sources").unwrap().clone();
      let helper = sources.last().unwrap().as_mapping().unwrap();
      assert_eq!(helper.get_str("dest"), Some("flutter/bin"));
      assert_eq!(helper.get_str("dest-filename"), Some(SETUP_HELPER_NAME));

      assert_eq!(
        ensure_setup_helper_source(&mut d, "setup-flutter.sh").unwrap(),
        OperationResult::unchanged()
      );
    }

    #[test]
    fn updates_existing_entry_in_place() {
      let mut d = doc(
        r#"
modules:
  - name: flutter-sdk
    sources:
      - type: file
        url: https://example.com/setup-flutter.sh
        dest: flutter/bin
        dest-filename: setup-flutter.sh
"#,
      );
      assert!(ensure_setup_helper_source(&mut d, "helper.sh").unwrap().changed);
      let sources = d.module(FLUTTER_SDK_MODULE).unwrap().seq("sources").unwrap().clone();
      assert_eq!(sources.len(), 1);
      let helper = sources[0].as_mapping().unwrap();
      assert_eq!(helper.get_str("path"), Some("helper.sh"));
      assert!(!helper.contains_key("url"));
    }
  }

  mod helper_command_tests {
    use super::*;

    #[test]
    fn renders_flags() {
      assert_eq!(setup_helper_command(None, false, &[]), "setup-flutter.sh");
      assert_eq!(setup_helper_command(Some("."), false, &[]), "setup-flutter.sh");
      assert_eq!(
        setup_helper_command(Some("/var/lib"), true, &["/var/lib/flutter".to_string()]),
        "setup-flutter.sh -r /var/lib/flutter -C /var/lib -d"
      );
    }

    #[test]
    fn inserts_after_setting_up_echo() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    build-commands:
      - echo "Building lotti"
      - echo "Setting up Flutter SDK"
      - flutter build linux
"#,
      );
      let result = ensure_setup_helper_command(&mut d, Some("/var/lib"), false, &[]).unwrap();
      assert_eq!(result.messages, ["Ensured setup helper command: setup-flutter.sh -C /var/lib"]);
      assert_eq!(commands(&d)[2], "setup-flutter.sh -C /var/lib");
      assert!(!ensure_setup_helper_command(&mut d, Some("/var/lib"), false, &[]).unwrap().changed);
    }

    #[test]
    fn defaults_to_second_position_and_replaces_stale_invocation() {
      let mut d = sample();
      ensure_setup_helper_command(&mut d, Some("/app"), false, &[]).unwrap();
      assert_eq!(commands(&d)[1], "setup-flutter.sh -C /app");

      ensure_setup_helper_command(&mut d, Some("/var/lib"), false, &[]).unwrap();
      let cmds = commands(&d);
      assert_eq!(cmds.len(), 3);
      assert_eq!(cmds[1], "setup-flutter.sh -C /var/lib");
    }
  }

  mod app_archive_tests {
    use super::*;

    #[test]
    fn leads_sources_and_drops_flutter_git() {
      let mut d = doc(
        r#"
modules:
  - name: lotti
    sources:
      - type: git
        url: https://github.com/flutter/flutter.git
      - pubspec-sources.json
      - cargo-sources.json
"#,
      );
      let result = bundle_app_archive(&mut d, "lotti-abc.tar.xz", "feed").unwrap();
      assert_eq!(
        result.messages,
        ["Removed Flutter git source from lotti", "Added app archive lotti-abc.tar.xz"]
      );
      let sources = d.module(APP_MODULE).unwrap().seq("sources").unwrap().clone();
      assert_eq!(sources.len(), 3);
      let archive = sources[0].as_mapping().unwrap();
      assert_eq!(archive.get_str("path"), Some("lotti-abc.tar.xz"));
      assert_eq!(archive.get_str("sha256"), Some("feed"));

      assert_eq!(
        bundle_app_archive(&mut d, "lotti-abc.tar.xz", "feed").unwrap(),
        OperationResult::unchanged()
      );
    }
  }
}
