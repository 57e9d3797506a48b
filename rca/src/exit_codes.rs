//! Stable exit codes for `rca` CLI commands.

/// Command succeeded; `diagnose` produced a genuine diagnosis.
pub const OK: i32 = 0;
/// Command failed due to invalid invocation, config or other errors.
pub const INVALID: i32 = 1;
/// `rca diagnose` substituted the placeholder result (timeout or failure).
pub const PLACEHOLDER: i32 = 2;
