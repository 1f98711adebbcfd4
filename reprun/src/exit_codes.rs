//! Stable exit codes for reprun commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, unclean tree, range contradiction or VCS failure.
/// Nothing was executed.
pub const INVALID: i32 = 1;
/// A step script failed to start or exited nonzero.
pub const STEP_FAILED: i32 = 3;
