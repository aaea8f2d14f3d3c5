//! Build-command hygiene: no network and no implicit `pub get`.

use serde_yaml::{Mapping, Value};

use crate::consts::APP_MODULE;
use crate::manifest::{Document, ManifestError, MappingExt, OperationResult};
use crate::ops::remove_matching;
use crate::validate::is_flutter_config_command;

const SHARE_NETWORK: &str = "--share=network";

fn display_name(module: &Mapping) -> String {
  module.get_str("name").unwrap_or("unnamed").to_string()
}

/// Rewrite every string command for which `rewrite` returns a new value.
/// Returns whether anything changed.
fn rewrite_commands<F>(module: &mut Mapping, mut rewrite: F) -> bool
where
  F: FnMut(&str) -> Option<String>,
{
  let Some(commands) = module.seq_mut("build-commands") else {
    return false;
  };
  let mut changed = false;
  for command in commands.iter_mut() {
    if let Some(updated) = command.as_str().and_then(&mut rewrite) {
      *command = Value::from(updated);
      changed = true;
    }
  }
  changed
}

/// Drop `--share=network` from `build-options.build-args` of every module.
///
/// An emptied `build-args` is removed, then an emptied `build-options`.
pub fn remove_network_from_build_args(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_all_modules(|module| {
    let name = display_name(module);
    let Some(options) = module.get_mut("build-options").and_then(Value::as_mapping_mut) else {
      return Ok(OperationResult::unchanged());
    };
    let Some(args) = options.seq_mut("build-args") else {
      return Ok(OperationResult::unchanged());
    };
    if remove_matching(args, |arg| arg.as_str() == Some(SHARE_NETWORK)) == 0 {
      return Ok(OperationResult::unchanged());
    }

    if args.is_empty() {
      options.remove_key("build-args");
    }
    if options.is_empty() {
      module.remove_key("build-options");
    }
    Ok(OperationResult::changed(format!("Removed {SHARE_NETWORK} from {name}")))
  })
}

/// Drop `flutter config` invocations from the app build.
pub fn remove_flutter_config_command(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let Some(commands) = module.seq_mut("build-commands") else {
      return Ok(OperationResult::unchanged());
    };
    let removed = remove_matching(commands, |c| c.as_str().is_some_and(is_flutter_config_command));
    Ok(if removed > 0 {
      OperationResult::changed("Removed flutter config command from lotti build steps")
    } else {
      OperationResult::unchanged()
    })
  })
}

/// Add `--offline` to every `flutter pub get`, in any module.
pub fn ensure_flutter_pub_get_offline(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_all_modules(|module| {
    let name = display_name(module);
    let changed = rewrite_commands(module, |command| {
      (command.contains("flutter pub get") && !command.contains("--offline"))
        .then(|| command.replace("flutter pub get", "flutter pub get --offline"))
    });
    Ok(if changed {
      OperationResult::changed(format!("Added --offline flag to flutter pub get in {name}"))
    } else {
      OperationResult::unchanged()
    })
  })
}

/// Add `--no-pub` to `flutter build linux` in the app build so the build
/// does not resolve packages again.
pub fn ensure_dart_pub_offline_in_build(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let changed = rewrite_commands(module, |command| {
      (command.contains("flutter build linux") && !command.contains("--no-pub"))
        .then(|| command.replace("flutter build linux", "flutter build linux --no-pub"))
    });
    Ok(if changed {
      OperationResult::changed("Added --no-pub flag to skip automatic pub get during build")
    } else {
      OperationResult::unchanged()
    })
  })
}
