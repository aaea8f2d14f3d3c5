use std::path::PathBuf;
use std::process::ExitCode;

use manifest_tool_lib::sdk::find_flutter_sdk;

/// Print the first Flutter SDK found; exit 1 when there is none.
pub fn cmd_find_flutter_sdk(search_roots: &[PathBuf], exclude: &[PathBuf], max_depth: usize) -> ExitCode {
  match find_flutter_sdk(search_roots, exclude, max_depth) {
    Some(path) => {
      println!("{}", path.display());
      ExitCode::SUCCESS
    }
    None => ExitCode::FAILURE,
  }
}
