//! Side effects of a run: config and resource files, git, child processes
//! and the run directory layout.

pub mod config;
pub mod executor;
pub mod git;
pub mod history;
pub mod linker;
pub mod pipeline_spec;
pub mod process;
pub mod repro_set;
pub mod stamp;
