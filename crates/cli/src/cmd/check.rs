use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use manifest_tool_lib::manifest::Document;
use manifest_tool_lib::validate::check_flathub_compliance;

/// Print the validator verdict; exit 1 on any violation.
pub fn cmd_check_flathub_compliance(manifest: &Path) -> Result<ExitCode> {
  let doc = Document::load(manifest).with_context(|| format!("Failed to load manifest: {}", manifest.display()))?;
  let result = check_flathub_compliance(&doc);

  println!("{}", result.message);
  for detail in &result.details {
    println!("  - {detail}");
  }

  Ok(if result.success {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}
