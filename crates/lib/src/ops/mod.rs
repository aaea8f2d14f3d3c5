//! Manifest operators.
//!
//! Every operator takes a [`Document`](crate::manifest::Document), mutates it
//! in place and returns an [`OperationResult`] describing what changed.
//! Operators are idempotent: running one twice leaves the document as the first
//! run did and the second run reports `unchanged`. A no-op never touches the
//! document or its dirty bit. Operators never save; persisting is up to the
//! caller.

pub mod flutter;
pub mod manifest;
pub mod sources;

use serde_yaml::{Mapping, Sequence, Value};

use crate::manifest::{MappingExt, OperationResult};

/// `changed` when any message was produced, otherwise `unchanged`.
pub(crate) fn from_messages(messages: Vec<String>) -> OperationResult {
  if messages.is_empty() {
    OperationResult::unchanged()
  } else {
    OperationResult::changed_with(messages)
  }
}

/// Build a YAML mapping from key/value pairs, keeping their order.
pub(crate) fn mapping<I>(fields: I) -> Value
where
  I: IntoIterator<Item = (&'static str, Value)>,
{
  let mut map = Mapping::new();
  for (key, value) in fields {
    map.insert(Value::from(key), value);
  }
  Value::Mapping(map)
}

/// A single-element `only-arches` list.
pub(crate) fn arches(arch: &str) -> Value {
  Value::Sequence(vec![Value::from(arch)])
}

/// String entries of `module[key]`, skipping anything that is not a string.
pub(crate) fn string_list<'a>(module: &'a Mapping, key: &str) -> impl Iterator<Item = &'a str> {
  module.seq(key).into_iter().flatten().filter_map(Value::as_str)
}

/// Remove every element of `list` matching `pred`, returning how many went.
pub(crate) fn remove_matching<F>(list: &mut Sequence, mut pred: F) -> usize
where
  F: FnMut(&Value) -> bool,
{
  let before = list.len();
  list.retain(|value| !pred(value));
  before - list.len()
}
