//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain errors describe what went wrong in registry and subscription
//! operations. Operational helpers add context and report failures
//! in the binary and the eventing bridge.

pub mod domain;
pub mod operational;

pub use {
    domain::{Result, WatchError},
    operational::{ErrorReporter, ResultExt},
};
