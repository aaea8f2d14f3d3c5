//! Flathub compliance checks for build-time network access.
//!
//! Flathub builders have no network. A manifest is rejected when a module
//! requests network access in `build-args`, runs `flutter config`, or fetches
//! packages with `pub get` without `--offline`. A `flutter build` that may
//! trigger an implicit pub get is reported as a warning. `finish-args` are
//! runtime permissions and are not inspected.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Sequence, Value};
use tracing::debug;

use crate::manifest::{Document, MappingExt};

static FLUTTER_CONFIG_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"flutter\s+config").expect("valid flutter config regex"));

/// Whether a build command runs `flutter config`.
pub fn is_flutter_config_command(command: &str) -> bool {
  FLUTTER_CONFIG_RE.is_match(command)
}

/// Outcome of a compliance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
  pub success: bool,
  pub message: String,
  /// One line per finding, e.g. `modules.lotti: flutter config command found`.
  pub details: Vec<String>,
}

/// Check a manifest against Flathub's offline-build rules.
pub fn check_flathub_compliance(doc: &Document) -> ValidationResult {
  let mut violations = Vec::new();
  let mut warnings = Vec::new();

  if let Some(modules) = doc.modules() {
    check_modules(modules, "modules", &mut violations, &mut warnings);
  }

  let (success, message) = if !violations.is_empty() {
    (
      false,
      format!("Flathub compliance check failed: {} violation(s)", violations.len()),
    )
  } else if !warnings.is_empty() {
    (
      true,
      format!("Flathub compliance check passed with {} warning(s)", warnings.len()),
    )
  } else {
    (true, "Flathub compliance check passed".to_string())
  };

  debug!(violations = violations.len(), warnings = warnings.len(), "compliance check finished");

  violations.extend(warnings);
  ValidationResult {
    success,
    message,
    details: violations,
  }
}

fn check_modules(modules: &Sequence, prefix: &str, violations: &mut Vec<String>, warnings: &mut Vec<String>) {
  for (index, module) in modules.iter().enumerate() {
    let Some(module) = module.as_mapping() else {
      continue;
    };
    let label = match module.get_str("name") {
      Some(name) => format!("{prefix}.{name}"),
      None => format!("{prefix}[{index}]"),
    };

    let network_in_args = module
      .map("build-options")
      .and_then(|opts| opts.seq("build-args"))
      .is_some_and(|args| args.iter().any(|a| a.as_str() == Some("--share=network")));
    if network_in_args {
      violations.push(format!("{label}: --share=network in build-args"));
    }

    for command in module.seq("build-commands").into_iter().flatten().filter_map(Value::as_str) {
      if is_flutter_config_command(command) {
        violations.push(format!("{label}: flutter config command found"));
      }
      if command.contains("pub get") && !command.contains("--offline") {
        violations.push(format!("{label}: 'pub get' without --offline"));
      }
      if command.contains("flutter build") && !command.contains("--no-pub") {
        warnings.push(format!("{label}: 'flutter build' without --no-pub"));
      }
    }

    if let Some(children) = module.seq("modules") {
      check_modules(children, &format!("{label}.modules"), violations, warnings);
    }
  }
}
