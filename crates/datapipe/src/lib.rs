//! datapipe command-line tooling
//!
//! The extractor itself lives in `datapipe-extract` and runs on Lambda. This
//! crate provisions the surrounding infrastructure, ships new function code,
//! checks the deployed pipeline end to end and tears everything down again.

pub mod check;
pub mod cleanup;
pub mod deploy;
pub mod extract;

mod stack;

pub use stack::{load_sdk_config, stack_outputs, StackInfo};
