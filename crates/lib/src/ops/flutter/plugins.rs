//! Extra sources for plugins whose CMake build would otherwise download at
//! configure time.

use serde_yaml::{Mapping, Value};

use crate::consts::{
  APP_MODULE, MIMALLOC_DESTS, MIMALLOC_FILENAME, MIMALLOC_SHA256, MIMALLOC_URL, SQLITE_AUTOCONF_VERSION,
  SQLITE_DESTS, SQLITE_PATCH, SQLITE_PATCH_DEST, SQLITE_SHA256, SQLITE_STALE_VERSION, SQLITE_URL,
  SQLITE_VERSION,
};
use crate::manifest::{Document, ManifestError, MappingExt, OperationResult, module_sources_mut};
use crate::ops::{arches, from_messages, mapping, remove_matching};

fn is_file_at(source: &Mapping, dest: &str) -> bool {
  source.get_str("type") == Some("file") && source.get_str("dest") == Some(dest)
}

fn mentions_sqlite_version(source: &Mapping, version: &str) -> bool {
  let tag = format!("sqlite-autoconf-{version}");
  ["url", "path", "dest-filename"]
    .iter()
    .any(|key| source.get_str(key).is_some_and(|v| v.contains(&tag)))
}

fn is_sqlite_dest(dest: Option<&str>) -> bool {
  dest.is_some_and(|d| SQLITE_DESTS.iter().any(|(_, known)| *known == d))
}

/// Provide the SQLite autoconf tarball where `sqlite3_flutter_libs`' CMake
/// FetchContent expects it, one `file` source per architecture.
///
/// Entries for the stale SQLite release are removed first.
pub fn add_sqlite3_source(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();
    let sources = module_sources_mut(module)?;

    let removed = remove_matching(sources, |s| {
      s.as_mapping().is_some_and(|m| {
        m.get_str("type") == Some("file")
          && is_sqlite_dest(m.get_str("dest"))
          && mentions_sqlite_version(m, SQLITE_STALE_VERSION)
      })
    });
    if removed > 0 {
      messages.push(format!("Removed outdated SQLite {SQLITE_STALE_VERSION} sources"));
    }

    for (arch, dest) in SQLITE_DESTS {
      let present = sources
        .iter()
        .filter_map(Value::as_mapping)
        .any(|m| is_file_at(m, dest) && mentions_sqlite_version(m, SQLITE_VERSION));
      if present {
        continue;
      }
      sources.push(mapping([
        ("type", Value::from("file")),
        ("only-arches", arches(arch)),
        ("url", Value::from(SQLITE_URL)),
        ("sha256", Value::from(SQLITE_SHA256)),
        ("dest", Value::from(*dest)),
        ("dest-filename", Value::from(format!("{SQLITE_AUTOCONF_VERSION}.tar.gz"))),
      ]));
      messages.push(format!("Added SQLite 3.50.4 file for {arch}"));
    }

    Ok(from_messages(messages))
  })
}

/// Provide the mimalloc tarball `media_kit_libs_linux` fetches during
/// configure, one `file` source per architecture.
pub fn add_media_kit_mimalloc_source(doc: &mut Document) -> Result<OperationResult, ManifestError> {
  doc.update_module(APP_MODULE, |module| {
    let mut messages = Vec::new();
    let sources = module_sources_mut(module)?;

    for (arch, dest) in MIMALLOC_DESTS {
      let present = sources.iter().filter_map(Value::as_mapping).any(|m| {
        is_file_at(m, dest)
          && m.get_str("url").is_some_and(|u| u.contains("mimalloc"))
          && m.seq("only-arches").is_some_and(|a| a.iter().any(|v| v.as_str() == Some(*arch)))
      });
      if present {
        continue;
      }
      sources.push(mapping([
        ("type", Value::from("file")),
        ("only-arches", arches(arch)),
        ("url", Value::from(MIMALLOC_URL)),
        ("sha256", Value::from(MIMALLOC_SHA256)),
        ("dest", Value::from(*dest)),
        ("dest-filename", Value::from(MIMALLOC_FILENAME)),
      ]));
      messages.push(format!("Added mimalloc source for {arch}"));
    }

    Ok(from_messages(messages))
  })
}

/// Add the `sqlite3_flutter_libs` CMakeLists patch that keeps its build
/// offline. Defaults to the shipped patch and plugin version.
pub fn add_sqlite3_patch(
  doc: &mut Document,
  patch_path: Option<&str>,
  dest: Option<&str>,
) -> Result<OperationResult, ManifestError> {
  let patch_path = patch_path.unwrap_or(SQLITE_PATCH);
  let dest = dest.unwrap_or(SQLITE_PATCH_DEST);

  doc.update_module(APP_MODULE, |module| {
    let present = module
      .seq("sources")
      .into_iter()
      .flatten()
      .filter_map(Value::as_mapping)
      .any(|m| m.get_str("type") == Some("patch") && m.get_str("path") == Some(patch_path));
    if present {
      return Ok(OperationResult::unchanged());
    }
    module_sources_mut(module)?.push(mapping([
      ("type", Value::from("patch")),
      ("path", Value::from(patch_path)),
      ("dest", Value::from(dest)),
    ]));
    Ok(OperationResult::changed(format!("Added SQLite patch {patch_path}")))
  })
}
