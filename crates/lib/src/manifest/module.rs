//! Helpers for navigating inline modules and their raw YAML fields.

use serde_yaml::{Mapping, Sequence, Value};

use super::ManifestError;

/// Convenience accessors on raw YAML mappings.
///
/// Mutating helpers keep insertion order: existing keys are updated in place
/// and removals shift the remaining entries down.
pub trait MappingExt {
  /// String value stored under `key`.
  fn get_str(&self, key: &str) -> Option<&str>;

  /// Set `key` to a string, returning `true` if the stored value changed.
  fn set_str(&mut self, key: &str, value: &str) -> bool;

  /// Remove `key` without disturbing the order of the remaining keys.
  fn remove_key(&mut self, key: &str) -> Option<Value>;

  /// Sequence stored under `key`.
  fn seq(&self, key: &str) -> Option<&Sequence>;

  /// Mutable sequence stored under `key`, without creating it.
  fn seq_mut(&mut self, key: &str) -> Option<&mut Sequence>;

  /// Mapping stored under `key`.
  fn map(&self, key: &str) -> Option<&Mapping>;

  /// Sequence stored under `key`, created (or replacing a scalar) when
  /// needed.
  fn ensure_seq(&mut self, key: &str) -> Result<&mut Sequence, ManifestError>;

  /// Mapping stored under `key`, created when absent.
  ///
  /// Returns a contract error if the key holds something other than a mapping.
  fn ensure_map(&mut self, key: &str) -> Result<&mut Mapping, ManifestError>;
}

impl MappingExt for Mapping {
  fn get_str(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(Value::as_str)
  }

  fn set_str(&mut self, key: &str, value: &str) -> bool {
    if self.get_str(key) == Some(value) {
      return false;
    }
    self.insert(Value::from(key), Value::from(value));
    true
  }

  fn remove_key(&mut self, key: &str) -> Option<Value> {
    self.shift_remove(key)
  }

  fn seq(&self, key: &str) -> Option<&Sequence> {
    self.get(key).and_then(Value::as_sequence)
  }

  fn seq_mut(&mut self, key: &str) -> Option<&mut Sequence> {
    self.get_mut(key).and_then(Value::as_sequence_mut)
  }

  fn map(&self, key: &str) -> Option<&Mapping> {
    self.get(key).and_then(Value::as_mapping)
  }

  fn ensure_seq(&mut self, key: &str) -> Result<&mut Sequence, ManifestError> {
    if !matches!(self.get(key), Some(Value::Sequence(_))) {
      self.insert(Value::from(key), Value::Sequence(Sequence::new()));
    }
    self.seq_mut(key).ok_or_else(|| ManifestError::Contract {
      field: key.to_string(),
      expected: "a list",
    })
  }

  fn ensure_map(&mut self, key: &str) -> Result<&mut Mapping, ManifestError> {
    if !self.contains_key(key) {
      self.insert(Value::from(key), Value::Mapping(Mapping::new()));
    }
    match self.get_mut(key) {
      Some(Value::Mapping(map)) => Ok(map),
      _ => Err(ManifestError::Contract {
        field: key.to_string(),
        expected: "a mapping",
      }),
    }
  }
}

/// Name of an inline module entry; string includes have none.
pub fn module_name(value: &Value) -> Option<&str> {
  value.as_mapping().and_then(|m| m.get_str("name"))
}

pub fn find_module<'a>(modules: &'a Sequence, name: &str) -> Option<&'a Mapping> {
  modules
    .iter()
    .filter_map(Value::as_mapping)
    .find(|m| m.get_str("name") == Some(name))
}

pub fn find_module_mut<'a>(modules: &'a mut Sequence, name: &str) -> Option<&'a mut Mapping> {
  modules
    .iter_mut()
    .filter_map(Value::as_mapping_mut)
    .find(|m| m.get_str("name") == Some(name))
}

/// Depth-first walk over every inline module, descending into nested
/// `modules` lists.
pub fn visit_modules_mut(
  modules: &mut Sequence,
  f: &mut dyn FnMut(&mut Mapping) -> Result<(), ManifestError>,
) -> Result<(), ManifestError> {
  for module in modules.iter_mut().filter_map(Value::as_mapping_mut) {
    f(module)?;
    if let Some(children) = module.seq_mut("modules") {
      visit_modules_mut(children, f)?;
    }
  }
  Ok(())
}

/// The module's `sources`, created when absent.
pub fn module_sources_mut(module: &mut Mapping) -> Result<&mut Sequence, ManifestError> {
  module.ensure_seq("sources")
}

/// The module's `build-commands`, created when absent.
pub fn build_commands_mut(module: &mut Mapping) -> Result<&mut Sequence, ManifestError> {
  module.ensure_seq("build-commands")
}

pub fn build_options_mut(module: &mut Mapping) -> Result<&mut Mapping, ManifestError> {
  module.ensure_map("build-options")
}

/// `build-options.env`, created along with `build-options` when absent.
pub fn env_mut(module: &mut Mapping) -> Result<&mut Mapping, ManifestError> {
  build_options_mut(module)?.ensure_map("env")
}

/// Value of `build-options.env.<key>`.
pub fn env_var<'a>(module: &'a Mapping, key: &str) -> Option<&'a str> {
  module
    .map("build-options")
    .and_then(|opts| opts.map("env"))
    .and_then(|env| env.get_str(key))
}

/// Value of `build-options.append-path`.
pub fn append_path(module: &Mapping) -> Option<&str> {
  module.map("build-options").and_then(|opts| opts.get_str("append-path"))
}

/// Split a `:`-separated search path, dropping empty entries.
pub fn split_path_list(value: &str) -> Vec<String> {
  value.split(':').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

pub fn join_path_list(entries: &[String]) -> String {
  entries.join(":")
}

/// Put `entry` first in a `:`-separated path list, keeping the other entries
/// in order and dropping duplicates. Returns `None` when the list already
/// starts with `entry` and has no duplicates.
pub fn prepend_path_entry(current: Option<&str>, entry: &str) -> Option<String> {
  let mut entries: Vec<String> = Vec::new();
  entries.push(entry.to_string());
  for item in split_path_list(current.unwrap_or_default()) {
    if !entries.contains(&item) {
      entries.push(item);
    }
  }
  let joined = join_path_list(&entries);
  (current != Some(joined.as_str())).then_some(joined)
}
