//! manifest-tool-lib: preparing the lotti Flathub submission for offline builds
//!
//! The crate is split into two layers:
//! - [`manifest`] and [`ops`]: an in-memory Flathub manifest plus small,
//!   idempotent operators that each report what they changed
//! - [`prepare`]: the staged pipeline that drives the external generators,
//!   bundles artifacts and applies the operators in a fixed order
//!
//! Supporting modules cover the artifact cache, the compliance validator, the
//! CI adapter, Flutter SDK discovery and subprocess execution.

pub mod cache;
pub mod ci;
pub mod consts;
pub mod manifest;
pub mod ops;
pub mod prepare;
pub mod process;
pub mod sdk;
pub mod util;
pub mod validate;
