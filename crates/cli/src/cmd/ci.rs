use std::path::Path;

use manifest_tool_lib::ci::{format_shell_assignments, pr_aware_environment};

/// Write `KEY=value` lines for `eval`; nothing outside pull requests.
pub fn cmd_pr_aware_pin(event_name: Option<&str>, event_path: Option<&Path>) {
  let assignments = pr_aware_environment(event_name, event_path);
  if assignments.is_empty() {
    return;
  }
  println!("{}", format_shell_assignments(&assignments));
}
