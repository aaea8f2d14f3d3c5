//! Human-facing progress lines for the preparation pipeline.

use std::fmt::Display;

use owo_colors::{OwoColorize, Stream};

use crate::manifest::OperationResult;

/// Prints `[✓]`, `[i]`, `[!]` and `[✗]` prefixed lines to stderr, coloured
/// when the terminal supports it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusPrinter;

impl StatusPrinter {
  pub fn status(&self, message: impl Display) {
    eprintln!("{} {message}", "[✓]".if_supports_color(Stream::Stderr, |s| s.green()));
  }

  pub fn info(&self, message: impl Display) {
    eprintln!("{} {message}", "[i]".if_supports_color(Stream::Stderr, |s| s.blue()));
  }

  pub fn warn(&self, message: impl Display) {
    eprintln!("{} {message}", "[!]".if_supports_color(Stream::Stderr, |s| s.yellow()));
  }

  pub fn error(&self, message: impl Display) {
    eprintln!("{} {message}", "[✗]".if_supports_color(Stream::Stderr, |s| s.red()));
  }

  /// One info line per operator message.
  pub fn report(&self, result: &OperationResult) {
    for message in &result.messages {
      self.info(message);
    }
  }
}
