//! Artifact cache for offline bundling.
//!
//! Resolves archive and file sources to local copies inside the output
//! directory. Lookup order is: already bundled, any configured search root,
//! then an HTTPS download when downloads are enabled. Outcomes are reported as
//! short status messages rather than errors so a single missing artifact does
//! not abort a bundling pass.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::consts::DOWNLOAD_CONNECT_TIMEOUT_SECS;
use crate::util::fs::{copy_file, find_file};
use crate::util::hash::hash_file;

/// Errors from a direct HTTPS download.
#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("invalid URL {url}: {source}")]
  InvalidUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  #[error("refusing to download {url}: scheme {scheme} is not https")]
  UnsupportedScheme { url: String, scheme: String },

  #[error("download of {url} failed: {message}")]
  Http { url: String, message: String },

  #[error("failed to write {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A bundled artifact: its filename, digest and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub filename: String,
  pub sha256: String,
  pub local_path: PathBuf,
}

/// Resolves artifacts into the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
  output_dir: PathBuf,
  download_missing: bool,
  search_roots: Vec<PathBuf>,
}

impl ArtifactCache {
  /// Create a cache rooted at `output_dir`, creating the directory.
  pub fn new(output_dir: impl Into<PathBuf>, download_missing: bool, search_roots: Vec<PathBuf>) -> io::Result<Self> {
    let output_dir = output_dir.into();
    fs::create_dir_all(&output_dir)?;
    Ok(Self {
      output_dir,
      download_missing,
      search_roots,
    })
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  /// Make `filename` available in the output directory.
  ///
  /// Returns the local path (or `None` when the artifact could not be
  /// resolved) together with status messages: `BUNDLE`, `MISSING`,
  /// `UNSUPPORTED`, `DOWNLOAD` or `ERROR`.
  pub fn ensure_local(&self, filename: &str, source_url: &str) -> (Option<PathBuf>, Vec<String>) {
    let mut messages = Vec::new();
    let destination = self.output_dir.join(filename);
    if destination.exists() {
      return (Some(destination), messages);
    }

    if let Some(found) = self.find_in_roots(filename) {
      let same = dunce::canonicalize(&found).ok() == dunce::canonicalize(&destination).ok();
      if !same {
        if let Err(e) = copy_file(&found, &destination) {
          warn!(path = ?found, error = %e, "failed to copy cached artifact");
          messages.push(format!("ERROR {filename} {e}"));
          return (None, messages);
        }
      }
      let message = format!("BUNDLE {filename}");
      debug!("{message}");
      messages.push(message);
      return (Some(destination), messages);
    }

    if !self.download_missing {
      let message = format!("MISSING {filename} {source_url}");
      debug!("{message}");
      messages.push(message);
      return (None, messages);
    }

    let scheme = url_scheme(source_url);
    if scheme != "https" {
      let shown = if scheme.is_empty() { "<none>" } else { scheme.as_str() };
      let message = format!("UNSUPPORTED {filename} scheme {shown} {source_url}");
      warn!("{message}");
      messages.push(message);
      return (None, messages);
    }

    match download_https(source_url, &destination) {
      Ok(()) => {
        let message = format!("DOWNLOAD {filename} {source_url}");
        debug!("{message}");
        messages.push(message);
        (Some(destination), messages)
      }
      Err(e) => {
        warn!(url = %source_url, error = %e, "download failed");
        let _ = fs::remove_file(&destination);
        messages.push(format!("ERROR {filename} {e}"));
        (None, messages)
      }
    }
  }

  /// Describe a bundled file as a cache entry.
  pub fn entry(&self, filename: &str, path: &Path) -> io::Result<CacheEntry> {
    Ok(CacheEntry {
      filename: filename.to_string(),
      sha256: hash_file(path)?.0,
      local_path: path.to_path_buf(),
    })
  }

  fn find_in_roots(&self, filename: &str) -> Option<PathBuf> {
    self.search_roots.iter().find_map(|root| find_file(root, filename))
  }
}

/// Lower-cased scheme of `raw`, or an empty string when it has none.
fn url_scheme(raw: &str) -> String {
  match Url::parse(raw) {
    Ok(url) => url.scheme().to_ascii_lowercase(),
    Err(_) => String::new(),
  }
}

/// Last path segment of a URL, ignoring query and fragment.
pub fn url_filename(raw: &str) -> String {
  let from_url = Url::parse(raw)
    .ok()
    .and_then(|url| url.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
    .filter(|name| !name.is_empty());

  from_url
    .or_else(|| {
      raw
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
    })
    .unwrap_or_else(|| "download".to_string())
}

/// Download `url` to `dest`, streaming the body to disk.
///
/// Only `https` URLs are fetched. A partial file is removed on failure.
pub fn download_https(url: &str, dest: &Path) -> Result<(), DownloadError> {
  let parsed = Url::parse(url).map_err(|source| DownloadError::InvalidUrl {
    url: url.to_string(),
    source,
  })?;
  if parsed.scheme() != "https" {
    return Err(DownloadError::UnsupportedScheme {
      url: url.to_string(),
      scheme: parsed.scheme().to_string(),
    });
  }

  info!(url = %url, "fetching URL");

  let http_err = |e: reqwest::Error| DownloadError::Http {
    url: url.to_string(),
    message: e.to_string(),
  };
  let client = reqwest::blocking::Client::builder()
    .connect_timeout(Duration::from_secs(DOWNLOAD_CONNECT_TIMEOUT_SECS))
    .timeout(None)
    .build()
    .map_err(http_err)?;
  let mut response = client.get(parsed).send().map_err(http_err)?;
  if !response.status().is_success() {
    return Err(DownloadError::Http {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let io_err = |source: io::Error| DownloadError::Io {
    path: dest.to_path_buf(),
    source,
  };
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(io_err)?;
  }
  let mut file = fs::File::create(dest).map_err(io_err)?;
  if let Err(e) = response.copy_to(&mut file) {
    drop(file);
    let _ = fs::remove_file(dest);
    return Err(http_err(e));
  }

  info!(path = ?dest, "download complete");
  Ok(())
}
