//! Change records returned by manifest operators.

/// Outcome of a single manifest operation.
///
/// `changed` reports whether the document was mutated; `messages` describe
/// what happened and may be present even when nothing changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
  pub changed: bool,
  pub messages: Vec<String>,
}

impl OperationResult {
  pub fn new(changed: bool, messages: Vec<String>) -> Self {
    Self { changed, messages }
  }

  /// The identity result: nothing changed, nothing to report.
  pub fn unchanged() -> Self {
    Self::default()
  }

  pub fn changed(message: impl Into<String>) -> Self {
    Self {
      changed: true,
      messages: vec![message.into()],
    }
  }

  pub fn changed_with(messages: Vec<String>) -> Self {
    Self {
      changed: true,
      messages,
    }
  }

  pub fn add_message(&mut self, message: impl Into<String>) {
    self.messages.push(message.into());
  }

  /// Combine two results: `changed` is OR-ed, messages are concatenated.
  pub fn merge(mut self, other: OperationResult) -> Self {
    self.changed |= other.changed;
    self.messages.extend(other.messages);
    self
  }
}

impl FromIterator<OperationResult> for OperationResult {
  fn from_iter<I: IntoIterator<Item = OperationResult>>(iter: I) -> Self {
    iter.into_iter().fold(Self::unchanged(), Self::merge)
  }
}

pub fn merge_results(results: impl IntoIterator<Item = OperationResult>) -> OperationResult {
  results.into_iter().collect()
}
