//! CI adapter: pull-request metadata from GitHub Actions event payloads.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

/// Derive PR-aware shell variables from a GitHub event.
///
/// For `pull_request` events whose payload carries a head commit and clone
/// URL, returns `PR_MODE`, `PR_HEAD_SHA`, `PR_HEAD_REF` and `PR_HEAD_URL`.
/// Any other input yields an empty map; this function never fails.
pub fn pr_aware_environment(event_name: Option<&str>, event_path: Option<&Path>) -> BTreeMap<String, String> {
  let mut assignments = BTreeMap::new();

  if event_name != Some("pull_request") {
    return assignments;
  }
  let Some(path) = event_path.filter(|p| p.is_file()) else {
    return assignments;
  };

  let payload: serde_json::Value = match fs::read_to_string(path)
    .map_err(|e| e.to_string())
    .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
  {
    Ok(payload) => payload,
    Err(e) => {
      warn!(path = ?path, error = %e, "failed to load event payload");
      return assignments;
    }
  };

  let field = |pointer: &str| {
    payload
      .pointer(pointer)
      .and_then(serde_json::Value::as_str)
      .unwrap_or_default()
      .to_string()
  };
  let sha = field("/pull_request/head/sha");
  let head_ref = field("/pull_request/head/ref");
  let url = field("/pull_request/head/repo/clone_url");

  if sha.is_empty() || url.is_empty() {
    debug!(path = ?path, "event payload lacks head sha or clone url");
    return assignments;
  }

  assignments.insert("PR_MODE".to_string(), "true".to_string());
  assignments.insert("PR_HEAD_SHA".to_string(), sha);
  assignments.insert("PR_HEAD_REF".to_string(), head_ref);
  assignments.insert("PR_HEAD_URL".to_string(), url);
  assignments
}

/// Render assignments as `KEY=value` lines suitable for `eval` in a shell.
///
/// `true`/`false` are written bare and lower-cased; everything else is
/// POSIX-quoted.
pub fn format_shell_assignments(assignments: &BTreeMap<String, String>) -> String {
  assignments
    .iter()
    .map(|(key, value)| {
      let rendered = match value.to_ascii_lowercase().as_str() {
        lowered @ ("true" | "false") => lowered.to_string(),
        _ => shlex::try_quote(value)
          .map(|q| q.into_owned())
          .unwrap_or_else(|_| format!("'{}'", value.replace('\0', "").replace('\'', r"'\''"))),
      };
      format!("{key}={rendered}")
    })
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn write_event(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("event.json");
    fs::write(&path, body).unwrap();
    path
  }

  #[test]
  fn extracts_pull_request_head() {
    let temp = tempdir().unwrap();
    let path = write_event(
      temp.path(),
      r#"{"pull_request":{"head":{"sha":"abc","ref":"feat","repo":{"clone_url":"https://x/fork.git"}}}}"#,
    );

    let env = pr_aware_environment(Some("pull_request"), Some(&path));
    assert_eq!(env["PR_MODE"], "true");
    assert_eq!(env["PR_HEAD_SHA"], "abc");
    assert_eq!(env["PR_HEAD_REF"], "feat");
    assert_eq!(env["PR_HEAD_URL"], "https://x/fork.git");
  }

  #[test]
  fn other_events_are_ignored() {
    let temp = tempdir().unwrap();
    let path = write_event(temp.path(), r#"{"pull_request":{"head":{"sha":"abc","repo":{"clone_url":"u"}}}}"#);
    assert!(pr_aware_environment(Some("push"), Some(&path)).is_empty());
    assert!(pr_aware_environment(None, Some(&path)).is_empty());
  }

  #[test]
  fn bad_payloads_yield_empty_map() {
    let temp = tempdir().unwrap();
    assert!(pr_aware_environment(Some("pull_request"), None).is_empty());
    assert!(pr_aware_environment(Some("pull_request"), Some(&temp.path().join("absent.json"))).is_empty());

    let garbage = write_event(temp.path(), "{not json");
    assert!(pr_aware_environment(Some("pull_request"), Some(&garbage)).is_empty());

    let missing_url = write_event(temp.path(), r#"{"pull_request":{"head":{"sha":"abc"}}}"#);
    assert!(pr_aware_environment(Some("pull_request"), Some(&missing_url)).is_empty());

    let wrong_shape = write_event(temp.path(), r#"{"pull_request":[1,2,3]}"#);
    assert!(pr_aware_environment(Some("pull_request"), Some(&wrong_shape)).is_empty());
  }

  #[test]
  fn shell_assignments_quote_values() {
    let mut env = BTreeMap::new();
    env.insert("PR_MODE".to_string(), "True".to_string());
    env.insert("PR_HEAD_REF".to_string(), "it's here".to_string());
    env.insert("PR_HEAD_SHA".to_string(), "abc123".to_string());

    let rendered = format_shell_assignments(&env);
    let lines: Vec<_> = rendered.lines().collect();
    let quoted = lines[0].strip_prefix("PR_HEAD_REF=").unwrap();
    assert_eq!(shlex::split(quoted), Some(vec!["it's here".to_string()]));
    assert_eq!(lines[1], "PR_HEAD_SHA=abc123");
    assert_eq!(lines[2], "PR_MODE=true");
  }

  #[test]
  fn empty_map_renders_empty() {
    assert_eq!(format_shell_assignments(&BTreeMap::new()), "");
  }
}
