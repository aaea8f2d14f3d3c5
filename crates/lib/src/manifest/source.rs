//! Typed view over manifest `sources` entries.

use serde_yaml::{Mapping, Value};

use super::MappingExt;

/// The `type` of a source entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// A bare string naming a generated JSON/YAML file.
  Include,
  Git,
  Archive,
  File,
  Patch,
  Dir,
  /// Any other entry; left untouched by every operator.
  Other,
}

/// Borrowed view of a single entry in a `sources` list.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
  Include(&'a str),
  Git(&'a Mapping),
  Archive(&'a Mapping),
  File(&'a Mapping),
  Patch(&'a Mapping),
  Dir(&'a Mapping),
  Other(&'a Value),
}

impl<'a> Source<'a> {
  pub fn from_value(value: &'a Value) -> Self {
    match value {
      Value::String(include) => Source::Include(include),
      Value::Mapping(map) => match map.get_str("type") {
        Some("git") => Source::Git(map),
        Some("archive") => Source::Archive(map),
        Some("file") => Source::File(map),
        Some("patch") => Source::Patch(map),
        Some("dir") => Source::Dir(map),
        _ => Source::Other(value),
      },
      _ => Source::Other(value),
    }
  }

  pub fn kind(&self) -> SourceKind {
    match self {
      Source::Include(_) => SourceKind::Include,
      Source::Git(_) => SourceKind::Git,
      Source::Archive(_) => SourceKind::Archive,
      Source::File(_) => SourceKind::File,
      Source::Patch(_) => SourceKind::Patch,
      Source::Dir(_) => SourceKind::Dir,
      Source::Other(_) => SourceKind::Other,
    }
  }

  /// The raw mapping for typed entries.
  pub fn mapping(&self) -> Option<&'a Mapping> {
    match *self {
      Source::Git(m) | Source::Archive(m) | Source::File(m) | Source::Patch(m) | Source::Dir(m) => Some(m),
      Source::Include(_) => None,
      Source::Other(v) => v.as_mapping(),
    }
  }

  pub fn url(&self) -> Option<&'a str> {
    self.mapping().and_then(|m| m.get_str("url"))
  }

  pub fn path(&self) -> Option<&'a str> {
    self.mapping().and_then(|m| m.get_str("path"))
  }

  pub fn dest(&self) -> Option<&'a str> {
    self.mapping().and_then(|m| m.get_str("dest"))
  }

  /// Whether this is a string include of a generated dependency list.
  pub fn is_dependency_include(&self) -> bool {
    matches!(self, Source::Include(name)
      if name.ends_with(crate::consts::PUBSPEC_SOURCES_JSON) || name.ends_with(crate::consts::CARGO_SOURCES_JSON))
  }
}

/// Classify a raw value without holding a borrow.
pub fn kind_of(value: &Value) -> SourceKind {
  Source::from_value(value).kind()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_entries() {
    let values: Vec<Value> = serde_yaml::from_str(
      r#"
- pubspec-sources.json
- type: git
  url: https://example.com/repo.git
- type: archive
  path: a.tar.xz
- type: shell
  commands: [true]
- 42
"#,
    )
    .unwrap();
    let kinds: Vec<_> = values.iter().map(kind_of).collect();
    assert_eq!(
      kinds,
      [
        SourceKind::Include,
        SourceKind::Git,
        SourceKind::Archive,
        SourceKind::Other,
        SourceKind::Other
      ]
    );
    assert_eq!(Source::from_value(&values[1]).url(), Some("https://example.com/repo.git"));
    assert_eq!(Source::from_value(&values[2]).path(), Some("a.tar.xz"));
    assert!(Source::from_value(&values[0]).is_dependency_include());
  }
}
