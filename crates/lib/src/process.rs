//! Subprocess execution for git, xz and the external generators.
//!
//! Every command is resolved to an absolute executable path before it is
//! spawned. Commands run on a private current-thread tokio runtime so the
//! pipeline can stay synchronous while still getting timeouts that kill the
//! child process.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors raised while running a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
  /// The executable could not be found on `PATH`.
  #[error("executable not found: {0}")]
  NotFound(String),

  /// `PATH` lookup produced a relative path.
  #[error("executable {name} resolved to non-absolute path {}", path.display())]
  NotAbsolute { name: String, path: PathBuf },

  /// The process could not be started or waited on.
  #[error("failed to run {cmd}: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: io::Error,
  },

  /// The process exceeded its timeout and was killed.
  #[error("{cmd} timed out after {}s", timeout.as_secs())]
  Timeout { cmd: String, timeout: Duration },

  /// The process exited unsuccessfully.
  #[error("{cmd} failed with code {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".to_string()))]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  /// The async runtime backing the runner could not be created.
  #[error("failed to start process runtime: {0}")]
  Runtime(#[source] io::Error),
}

/// A command to run: program, arguments, working directory and extra
/// environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
  program: String,
  args: Vec<OsString>,
  cwd: Option<PathBuf>,
  env: BTreeMap<String, String>,
  timeout: Option<Duration>,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
      timeout: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
    for (key, value) in vars {
      self.env.insert(key.clone(), value.clone());
    }
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg.to_string_lossy())?;
    }
    Ok(())
  }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl Output {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Resolve `program` to an absolute executable path.
///
/// Absolute paths are accepted as-is; bare names are looked up on `PATH` and
/// a relative lookup result is refused.
pub fn resolve_executable(program: &str) -> Result<PathBuf, ProcessError> {
  let candidate = Path::new(program);
  if candidate.is_absolute() {
    return Ok(candidate.to_path_buf());
  }
  let resolved = which::which(program).map_err(|_| ProcessError::NotFound(program.to_string()))?;
  if !resolved.is_absolute() {
    return Err(ProcessError::NotAbsolute {
      name: program.to_string(),
      path: resolved,
    });
  }
  Ok(resolved)
}

/// Runs subprocesses to completion.
pub struct CommandRunner {
  runtime: tokio::runtime::Runtime,
}

impl CommandRunner {
  pub fn new() -> Result<Self, ProcessError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(ProcessError::Runtime)?;
    Ok(Self { runtime })
  }

  /// Run a command and capture its output regardless of exit status.
  pub fn output(&self, spec: &CommandSpec) -> Result<Output, ProcessError> {
    self.runtime.block_on(run_captured(spec, None))
  }

  /// Run a command, requiring success, and return trimmed stdout.
  pub fn run(&self, spec: &CommandSpec) -> Result<String, ProcessError> {
    let output = self.output(spec)?;
    if !output.success() {
      return Err(ProcessError::Failed {
        cmd: spec.to_string(),
        code: output.code,
        stderr: output.stderr.trim().to_string(),
      });
    }
    Ok(output.stdout.trim().to_string())
  }

  /// Run a command with `input` written to its stdin.
  pub fn run_with_input(&self, spec: &CommandSpec, input: &[u8]) -> Result<Output, ProcessError> {
    self.runtime.block_on(run_captured(spec, Some(input)))
  }

  /// Pipe the stdout of `producer` through `filter` into `dest`, e.g.
  /// `git archive | xz -c > dest`. Both commands must succeed.
  pub fn pipe_to_file(&self, producer: &CommandSpec, filter: &CommandSpec, dest: &Path) -> Result<(), ProcessError> {
    let produced = self.runtime.block_on(run_raw(producer, None))?;
    if produced.code != Some(0) {
      return Err(ProcessError::Failed {
        cmd: producer.to_string(),
        code: produced.code,
        stderr: String::from_utf8_lossy(&produced.stderr).trim().to_string(),
      });
    }
    self.runtime.block_on(run_to_file(filter, produced.stdout, dest))
  }
}

struct RawOutput {
  code: Option<i32>,
  stdout: Vec<u8>,
  stderr: Vec<u8>,
}

fn build_command(spec: &CommandSpec) -> Result<Command, ProcessError> {
  let program = resolve_executable(&spec.program)?;
  let mut command = Command::new(&program);
  command.args(&spec.args).kill_on_drop(true);
  if let Some(cwd) = &spec.cwd {
    command.current_dir(cwd);
  }
  for (key, value) in &spec.env {
    command.env(key, value);
  }
  debug!(program = ?program, cwd = ?spec.cwd, "spawning process");
  Ok(command)
}

async fn run_captured(spec: &CommandSpec, input: Option<&[u8]>) -> Result<Output, ProcessError> {
  let raw = run_raw(spec, input).await?;
  let result = Output {
    code: raw.code,
    stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
    stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
  };

  if !result.success() && !result.stderr.is_empty() {
    debug!(stderr = %result.stderr, "command stderr");
  }

  Ok(result)
}

async fn run_raw(spec: &CommandSpec, input: Option<&[u8]>) -> Result<RawOutput, ProcessError> {
  let cmd = spec.to_string();
  info!(cmd = %cmd, "executing command");

  let mut command = build_command(spec)?;
  command
    .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  let spawn_err = |source: io::Error| ProcessError::Spawn {
    cmd: cmd.clone(),
    source,
  };
  let mut child = command.spawn().map_err(spawn_err)?;

  if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
    stdin.write_all(data).await.map_err(spawn_err)?;
    drop(stdin);
  }

  let waited = match spec.timeout {
    Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
      Ok(result) => result,
      Err(_) => {
        warn!(cmd = %cmd, timeout_secs = timeout.as_secs(), "command timed out");
        return Err(ProcessError::Timeout {
          cmd: cmd.clone(),
          timeout,
        });
      }
    },
    None => child.wait_with_output().await,
  };
  let output = waited.map_err(spawn_err)?;

  Ok(RawOutput {
    code: output.status.code(),
    stdout: output.stdout,
    stderr: output.stderr,
  })
}

async fn run_to_file(spec: &CommandSpec, input: Vec<u8>, dest: &Path) -> Result<(), ProcessError> {
  let cmd = spec.to_string();
  info!(cmd = %cmd, dest = ?dest, "executing command into file");

  let spawn_err = |source: io::Error| ProcessError::Spawn {
    cmd: cmd.clone(),
    source,
  };
  let file = std::fs::File::create(dest).map_err(spawn_err)?;

  let mut command = build_command(spec)?;
  command.stdin(Stdio::piped()).stdout(Stdio::from(file)).stderr(Stdio::piped());

  let mut child = command.spawn().map_err(spawn_err)?;
  if let Some(mut stdin) = child.stdin.take() {
    stdin.write_all(&input).await.map_err(spawn_err)?;
    drop(stdin);
  }

  let output = child.wait_with_output().await.map_err(spawn_err)?;
  if !output.status.success() {
    let _ = std::fs::remove_file(dest);
    return Err(ProcessError::Failed {
      cmd,
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(())
}
