//! Reproducible pipeline runner.
//!
//! Runs an ordered list of step scripts into version-stamped run directories,
//! reusing outputs of earlier runs where it is safe. The crate keeps a strict
//! split:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, range resolution,
//!   link planning). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Isolated behind traits where tests need to substitute them.
//!
//! Orchestration modules ([`pipeline`], [`single`]) coordinate core logic with
//! I/O; [`request`] builds the validated configuration they consume.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod request;
pub mod single;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
