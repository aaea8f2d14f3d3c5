//! In-memory Flathub manifest documents.
//!
//! A [`Document`] wraps the raw YAML mapping of a manifest file together with
//! the path it was loaded from and a dirty bit. Operators in [`crate::ops`]
//! mutate the mapping in place and flag the document as changed; persisting is
//! left to the caller.

mod module;
mod result;
mod source;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Sequence, Value};
use thiserror::Error;
use tracing::debug;

pub use module::{
  MappingExt, append_path, build_commands_mut, build_options_mut, env_mut, env_var, find_module, find_module_mut,
  join_path_list, module_name, module_sources_mut, prepend_path_entry, split_path_list, visit_modules_mut,
};
pub use result::{OperationResult, merge_results};
pub use source::{Source, SourceKind, kind_of};

/// Errors raised while loading, saving or inspecting a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  /// The manifest file does not exist.
  #[error("manifest not found: {}", .0.display())]
  NotFound(PathBuf),

  /// Failed to read the manifest file.
  #[error("failed to read manifest {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to write the manifest file.
  #[error("failed to write manifest {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The file is not valid YAML.
  #[error("failed to parse manifest {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  /// Serializing the in-memory mapping failed.
  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_yaml::Error),

  /// The top level of the file is not a mapping.
  #[error("manifest {} must contain a mapping at the top level", .0.display())]
  NotAMapping(PathBuf),

  /// A field exists but has the wrong shape.
  #[error("manifest field '{field}' must be {expected}")]
  Contract { field: String, expected: &'static str },
}

/// A Flathub manifest loaded into memory.
#[derive(Debug, Clone)]
pub struct Document {
  path: PathBuf,
  data: Mapping,
  changed: bool,
}

impl Document {
  /// Create a document from an already parsed mapping.
  pub fn new(path: impl Into<PathBuf>, data: Mapping) -> Self {
    Self {
      path: path.into(),
      data,
      changed: false,
    }
  }

  /// Load a manifest, failing with [`ManifestError::NotFound`] if it is absent.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
    Self::read(path.as_ref(), false)
  }

  /// Load a manifest, starting from an empty mapping if the file is absent.
  pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
    Self::read(path.as_ref(), true)
  }

  fn read(path: &Path, allow_missing: bool) -> Result<Self, ManifestError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        if allow_missing {
          debug!(path = ?path, "manifest missing, starting empty");
          return Ok(Self::new(path, Mapping::new()));
        }
        return Err(ManifestError::NotFound(path.to_path_buf()));
      }
      Err(source) => {
        return Err(ManifestError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    Self::parse(path, &content)
  }

  /// Parse manifest text, recording `path` as its location.
  pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self, ManifestError> {
    let path = path.into();
    if content.trim().is_empty() {
      return Ok(Self::new(path, Mapping::new()));
    }

    let value: Value = serde_yaml::from_str(content).map_err(|source| ManifestError::Parse {
      path: path.clone(),
      source,
    })?;

    match value {
      Value::Mapping(data) => Ok(Self::new(path, data)),
      Value::Null => Ok(Self::new(path, Mapping::new())),
      _ => Err(ManifestError::NotAMapping(path)),
    }
  }

  /// Write the document back to its path and clear the dirty bit.
  ///
  /// The file is replaced atomically through a temporary file in the same
  /// directory.
  pub fn save(&mut self) -> Result<(), ManifestError> {
    let content = self.to_yaml_string()?;
    let write_err = |source: io::Error| ManifestError::Write {
      path: self.path.clone(),
      source,
    };

    let parent = match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(content.as_bytes()).map_err(write_err)?;
    tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

    debug!(path = ?self.path, "saved manifest");
    self.changed = false;
    Ok(())
  }

  /// Render the current mapping as YAML text.
  pub fn to_yaml_string(&self) -> Result<String, ManifestError> {
    serde_yaml::to_string(&self.data).map_err(ManifestError::Serialize)
  }

  /// Return the top-level `modules` sequence, creating it when absent.
  pub fn ensure_modules(&mut self) -> Result<&mut Sequence, ManifestError> {
    if !self.data.contains_key("modules") {
      self.data.insert(Value::from("modules"), Value::Sequence(Sequence::new()));
      self.changed = true;
    }
    self.modules_mut()?.ok_or_else(|| ManifestError::Contract {
      field: "modules".to_string(),
      expected: "a list",
    })
  }

  /// The top-level `modules` sequence, if present.
  pub fn modules(&self) -> Option<&Sequence> {
    self.data.get("modules").and_then(Value::as_sequence)
  }

  /// Mutable access to `modules` without creating it.
  pub fn modules_mut(&mut self) -> Result<Option<&mut Sequence>, ManifestError> {
    match self.data.get_mut("modules") {
      None => Ok(None),
      Some(Value::Sequence(modules)) => Ok(Some(modules)),
      Some(_) => Err(ManifestError::Contract {
        field: "modules".to_string(),
        expected: "a list",
      }),
    }
  }

  /// Find a top-level inline module by name.
  pub fn module(&self, name: &str) -> Option<&Mapping> {
    self.modules().and_then(|modules| find_module(modules, name))
  }

  /// Find a top-level inline module by name for mutation.
  pub fn module_mut(&mut self, name: &str) -> Result<Option<&mut Mapping>, ManifestError> {
    Ok(self.modules_mut()?.and_then(|modules| find_module_mut(modules, name)))
  }

  /// Run `f` against the named module and mark the document changed when the
  /// returned result says so. A missing module is a no-op.
  pub fn update_module<F>(&mut self, name: &str, f: F) -> Result<OperationResult, ManifestError>
  where
    F: FnOnce(&mut Mapping) -> Result<OperationResult, ManifestError>,
  {
    let Some(module) = self.module_mut(name)? else {
      return Ok(OperationResult::unchanged());
    };
    let result = f(module)?;
    if result.changed {
      self.changed = true;
    }
    Ok(result)
  }

  /// Run `f` against every inline module, nested ones included.
  pub fn update_all_modules<F>(&mut self, mut f: F) -> Result<OperationResult, ManifestError>
  where
    F: FnMut(&mut Mapping) -> Result<OperationResult, ManifestError>,
  {
    let Some(modules) = self.modules_mut()? else {
      return Ok(OperationResult::unchanged());
    };
    let mut merged = OperationResult::unchanged();
    visit_modules_mut(modules, &mut |module| {
      merged = std::mem::take(&mut merged).merge(f(module)?);
      Ok(())
    })?;
    if merged.changed {
      self.changed = true;
    }
    Ok(merged)
  }

  pub fn mark_changed(&mut self) {
    self.changed = true;
  }

  pub fn is_changed(&self) -> bool {
    self.changed
  }

  pub fn data(&self) -> &Mapping {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut Mapping {
    &mut self.data
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[cfg(test)]
pub(crate) mod testutil {
  use super::Document;

  /// Manifest shaped like the template the pipeline starts from.
  pub const SAMPLE_MANIFEST: &str = r#"
modules:
  - name: flutter-sdk
    build-commands:
      - mv flutter /app/flutter
      - export PATH=/app/flutter/bin:$PATH
      - /app/flutter/bin/flutter --version
    sources:
      - type: git
        url: https://github.com/flutter/flutter.git
        dest: flutter
  - name: lotti
    modules: []
    sources:
      - type: git
        url: https://github.com/matthiasn/lotti
        commit: COMMIT_PLACEHOLDER
      - type: git
        url: https://example.com/alt.git
        dest: flutter
      - type: archive
        url: https://example.com/archive.tar.gz
      - type: file
        url: https://example.com/helper.dat
    build-options:
      append-path: /usr/bin
      env:
        PATH: /usr/bin
    build-commands:
      - cp -r /app/flutter /run/build/lotti/flutter_sdk
      - echo build
"#;

  pub fn doc(yaml: &str) -> Document {
    Document::parse("test.yml", yaml).unwrap()
  }

  pub fn sample() -> Document {
    doc(SAMPLE_MANIFEST)
  }
}
